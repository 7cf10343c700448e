//! Bit-banged single-wire master for the Makita battery connector.
//!
//! All timing is expressed in 16 µs units. The bus idles high through the
//! pack's pull-up; the master only ever drives it low or lets go.

use charger_core::charger::makita::{BatteryPort, OneWireBus, OneWireError};

/// Length of one timing unit in microseconds.
pub const UNIT_MICROS: u32 = 16;

/// 20 ms grace before a low idle line counts as stuck.
const IDLE_RECHECK_UNITS: u16 = 1_250;
const RESET_LOW_UNITS: u16 = 47;
const PRESENCE_SAMPLE_UNITS: u16 = 4;
const RESET_RECOVER_UNITS: u16 = 26;
const WRITE_ZERO_LOW_UNITS: u16 = 6;
const WRITE_ZERO_HIGH_UNITS: u16 = 2;
const WRITE_ONE_LOW_UNITS: u16 = 1;
const WRITE_ONE_HIGH_UNITS: u16 = 7;
const READ_LOW_UNITS: u16 = 1;
const READ_SAMPLE_UNITS: u16 = 1;
const READ_RECOVER_UNITS: u16 = 6;

/// Pin-level access needed by [`OneWireMaster`].
pub trait OneWireLine {
    fn drive_low(&mut self);

    fn release(&mut self);

    fn is_high(&mut self) -> bool;

    /// Level of the separate status input; `true` when the pack pulls it low.
    fn status_active(&mut self) -> bool;

    /// Busy-waits for `units` × 16 µs.
    fn delay_units(&mut self, units: u16);
}

/// Drives the connector pins with the pack's reset and slot timing.
pub struct OneWireMaster<L> {
    line: L,
}

impl<L: OneWireLine> OneWireMaster<L> {
    pub const fn new(line: L) -> Self {
        Self { line }
    }

    #[cfg(test)]
    pub fn line(&self) -> &L {
        &self.line
    }

    fn write_bit(&mut self, bit: bool) {
        let (low, high) = if bit {
            (WRITE_ONE_LOW_UNITS, WRITE_ONE_HIGH_UNITS)
        } else {
            (WRITE_ZERO_LOW_UNITS, WRITE_ZERO_HIGH_UNITS)
        };
        self.line.drive_low();
        self.line.delay_units(low);
        self.line.release();
        self.line.delay_units(high);
    }

    fn read_bit(&mut self) -> bool {
        self.line.drive_low();
        self.line.delay_units(READ_LOW_UNITS);
        self.line.release();
        self.line.delay_units(READ_SAMPLE_UNITS);
        let bit = self.line.is_high();
        self.line.delay_units(READ_RECOVER_UNITS);
        bit
    }
}

impl<L: OneWireLine> OneWireBus for OneWireMaster<L> {
    fn reset(&mut self) -> Result<(), OneWireError> {
        self.line.release();
        if !self.line.is_high() {
            self.line.delay_units(IDLE_RECHECK_UNITS);
            if !self.line.is_high() {
                return Err(OneWireError::LineStuckLow);
            }
        }

        self.line.drive_low();
        self.line.delay_units(RESET_LOW_UNITS);
        self.line.release();
        self.line.delay_units(PRESENCE_SAMPLE_UNITS);
        let present = !self.line.is_high();
        self.line.delay_units(RESET_RECOVER_UNITS);

        if present {
            Ok(())
        } else {
            Err(OneWireError::NoPresence)
        }
    }

    fn send(&mut self, byte: u8) {
        for bit in 0..8 {
            self.write_bit(byte & (1 << bit) != 0);
        }
    }

    fn recv(&mut self) -> u8 {
        (0..8).fold(0u8, |byte, bit| {
            if self.read_bit() {
                byte | (1 << bit)
            } else {
                byte
            }
        })
    }
}

impl<L: OneWireLine> BatteryPort for OneWireMaster<L> {
    fn status_asserted(&mut self) -> bool {
        self.line.status_active()
    }
}

#[cfg(target_os = "none")]
pub use target::ConnectorPins;

#[cfg(target_os = "none")]
mod target {
    use embassy_stm32::gpio::{Input, OutputOpenDrain};
    use embassy_time::{Duration, block_for};

    use super::{OneWireLine, UNIT_MICROS};

    /// Data pin (open drain) and status input of the battery connector.
    pub struct ConnectorPins<'d> {
        data: OutputOpenDrain<'d>,
        status: Input<'d>,
    }

    impl<'d> ConnectorPins<'d> {
        pub fn new(data: OutputOpenDrain<'d>, status: Input<'d>) -> Self {
            Self { data, status }
        }
    }

    impl OneWireLine for ConnectorPins<'_> {
        fn drive_low(&mut self) {
            self.data.set_low();
        }

        fn release(&mut self) {
            self.data.set_high();
        }

        fn is_high(&mut self) -> bool {
            self.data.is_high()
        }

        fn status_active(&mut self) -> bool {
            self.status.is_low()
        }

        fn delay_units(&mut self, units: u16) {
            block_for(Duration::from_micros(u64::from(units) * u64::from(UNIT_MICROS)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Edge {
        Low,
        Release,
        Wait(u16),
        Sample,
    }

    /// Records every edge and answers samples from a scripted bit stream.
    #[derive(Default)]
    struct ScriptedLine {
        edges: Vec<Edge, 256>,
        samples: Vec<bool, 16>,
        cursor: usize,
        status: bool,
    }

    impl ScriptedLine {
        fn answering(samples: &[bool]) -> Self {
            let mut line = Self::default();
            line.samples
                .extend_from_slice(samples)
                .expect("sample script fits");
            line
        }
    }

    impl OneWireLine for ScriptedLine {
        fn drive_low(&mut self) {
            self.edges.push(Edge::Low).expect("edge log full");
        }

        fn release(&mut self) {
            self.edges.push(Edge::Release).expect("edge log full");
        }

        fn is_high(&mut self) -> bool {
            self.edges.push(Edge::Sample).expect("edge log full");
            let level = self.samples.get(self.cursor).copied().unwrap_or(true);
            self.cursor += 1;
            level
        }

        fn status_active(&mut self) -> bool {
            self.status
        }

        fn delay_units(&mut self, units: u16) {
            self.edges.push(Edge::Wait(units)).expect("edge log full");
        }
    }

    #[test]
    fn reset_detects_presence_pulse() {
        let mut master = OneWireMaster::new(ScriptedLine::answering(&[true, false]));
        assert_eq!(master.reset(), Ok(()));
        assert_eq!(
            master.line().edges.as_slice(),
            &[
                Edge::Release,
                Edge::Sample,
                Edge::Low,
                Edge::Wait(47),
                Edge::Release,
                Edge::Wait(4),
                Edge::Sample,
                Edge::Wait(26),
            ]
        );
    }

    #[test]
    fn reset_reports_missing_pack_and_stuck_line() {
        let mut master = OneWireMaster::new(ScriptedLine::answering(&[true, true]));
        assert_eq!(master.reset(), Err(OneWireError::NoPresence));

        let mut master = OneWireMaster::new(ScriptedLine::answering(&[false, false]));
        assert_eq!(master.reset(), Err(OneWireError::LineStuckLow));
        assert_eq!(
            master.line().edges.as_slice(),
            &[Edge::Release, Edge::Sample, Edge::Wait(1_250), Edge::Sample]
        );
    }

    #[test]
    fn brief_low_idle_line_is_rechecked() {
        let mut master = OneWireMaster::new(ScriptedLine::answering(&[false, true, false]));
        assert_eq!(master.reset(), Ok(()));
        assert_eq!(
            &master.line().edges[..5],
            &[
                Edge::Release,
                Edge::Sample,
                Edge::Wait(1_250),
                Edge::Sample,
                Edge::Low,
            ]
        );
    }

    #[test]
    fn bytes_are_sent_lsb_first() {
        let mut master = OneWireMaster::new(ScriptedLine::default());
        master.send(0x01);

        let edges = master.line().edges.as_slice();
        // First slot carries bit 0 = 1: short low, long release.
        assert_eq!(
            &edges[..4],
            &[Edge::Low, Edge::Wait(1), Edge::Release, Edge::Wait(7)]
        );
        // Remaining slots are zeros.
        assert_eq!(
            &edges[4..8],
            &[Edge::Low, Edge::Wait(6), Edge::Release, Edge::Wait(2)]
        );
        assert_eq!(edges.len(), 32);
    }

    #[test]
    fn received_bits_assemble_lsb_first() {
        let script = [false, true, true, false, false, false, false, true];
        let mut master = OneWireMaster::new(ScriptedLine::answering(&script));
        assert_eq!(master.recv(), 0b1000_0110);
    }

    #[test]
    fn status_input_is_forwarded() {
        let mut master = OneWireMaster::new(ScriptedLine {
            status: true,
            ..ScriptedLine::default()
        });
        assert!(master.status_asserted());
    }
}
