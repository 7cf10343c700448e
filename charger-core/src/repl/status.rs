//! Shared status surface for the REPL.
//!
//! The firmware and emulator implement [`StatusProvider`] so `status` shows
//! the same live readings on both. [`StatusFormatter`] keeps the text
//! identical across front ends.

use core::fmt;

use crate::charger::ChargeState;
use crate::counters::ElapsedTime;
use crate::failure::{FailureFlags, RegulationMode};
use crate::instrument::{ChargeMode, InstrumentMode};
use crate::measurement::Measurements;
use crate::profile::ChargeProfile;

/// Snapshot of everything `status` prints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub mode: InstrumentMode,
    /// `None` while the instrument runs as a power supply.
    pub charge_state: Option<ChargeState>,
    pub profile_index: u8,
    pub charge_mode: ChargeMode,
    pub measured: Measurements,
    pub target: Measurements,
    pub relay_closed: bool,
    pub output_requested: bool,
    pub regulation: RegulationMode,
    pub percent: u8,
    pub elapsed: ElapsedTime,
    pub capacity_mah: u32,
    pub power_good: bool,
    pub failures: FailureFlags,
}

/// Platform hook that supplies live status information.
pub trait StatusProvider {
    /// Returns a snapshot if the platform can currently provide one.
    fn snapshot(&mut self) -> Option<StatusSnapshot>;
}

/// Renders a [`StatusSnapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes the mode line (e.g. `charger state=charging profile=2 mode=cccv`).
    ///
    /// # Errors
    ///
    /// Propagates writer failures.
    pub fn write_mode_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let snapshot = self.snapshot;
        match snapshot.charge_state {
            Some(state) => write!(
                writer,
                "charger state={state} profile={} mode={}",
                snapshot.profile_index, snapshot.charge_mode
            ),
            None => write!(writer, "{} profile={}", snapshot.mode, snapshot.profile_index),
        }
    }

    /// Writes the output line (e.g. `output 4150mV 1480mA target=4200mV/1500mA relay=closed reg=cc`).
    ///
    /// # Errors
    ///
    /// Propagates writer failures.
    pub fn write_output_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let snapshot = self.snapshot;
        write!(
            writer,
            "output {}mV {}mA target={}mV/{}mA relay={} enabled={} reg={}",
            snapshot.measured.voltage,
            snapshot.measured.current,
            snapshot.target.voltage,
            snapshot.target.current,
            if snapshot.relay_closed { "closed" } else { "open" },
            if snapshot.output_requested { "yes" } else { "no" },
            snapshot.regulation,
        )
    }

    /// Writes the session line (e.g. `session battery=65% elapsed=0:12:03 capacity=250mAh`).
    ///
    /// # Errors
    ///
    /// Propagates writer failures.
    pub fn write_session_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let snapshot = self.snapshot;
        write!(
            writer,
            "session battery={}% elapsed={} capacity={}mAh",
            snapshot.percent, snapshot.elapsed, snapshot.capacity_mah
        )
    }

    /// Writes the failure line (e.g. `failures none power=good`).
    ///
    /// # Errors
    ///
    /// Propagates writer failures.
    pub fn write_failures_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "failures {} power={}",
            self.snapshot.failures,
            if self.snapshot.power_good { "good" } else { "bad" }
        )
    }
}

/// Writes one profile summary line for `profile show` and `profile list`.
///
/// # Errors
///
/// Propagates writer failures.
pub fn write_profile_line<W: fmt::Write>(
    writer: &mut W,
    index: u8,
    profile: &ChargeProfile,
) -> fmt::Result {
    write!(
        writer,
        "{index}: {} charge={}mV/{}mA open={}mV/{}mA min={}mV restart={}mV stop={}%",
        profile.name,
        profile.charge_voltage,
        profile.charge_current,
        profile.open_voltage,
        profile.open_current,
        profile.min_battery_voltage,
        profile.restart_voltage,
        profile.stop_percent,
    )?;
    if profile.ccc_mode() {
        writer.write_str(" ccc")?;
    }
    if profile.uses_alternate_protocol() {
        writer.write_str(" 1-wire")?;
    }
    if profile.auto_restart() {
        writer.write_str(" auto-restart")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile;
    use heapless::String;

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            mode: InstrumentMode::Charger,
            charge_state: Some(ChargeState::Charging),
            profile_index: 2,
            charge_mode: ChargeMode::CcCv,
            measured: Measurements::new(4_150, 1_480),
            target: Measurements::new(4_200, 1_500),
            relay_closed: true,
            output_requested: true,
            regulation: RegulationMode::ConstantCurrent,
            percent: 65,
            elapsed: ElapsedTime {
                ticks: 0,
                seconds: 3,
                minutes: 12,
                hours: 0,
            },
            capacity_mah: 250,
            power_good: true,
            failures: FailureFlags::empty(),
        }
    }

    #[test]
    fn renders_charger_lines() {
        let snapshot = snapshot();
        let formatter = StatusFormatter::new(&snapshot);

        let mut line: String<96> = String::new();
        formatter.write_mode_line(&mut line).expect("fits");
        assert_eq!(line.as_str(), "charger state=charging profile=2 mode=cccv");

        line.clear();
        formatter.write_output_line(&mut line).expect("fits");
        assert_eq!(
            line.as_str(),
            "output 4150mV 1480mA target=4200mV/1500mA relay=closed enabled=yes reg=cc"
        );

        line.clear();
        formatter.write_session_line(&mut line).expect("fits");
        assert_eq!(
            line.as_str(),
            "session battery=65% elapsed=0:12:03 capacity=250mAh"
        );

        line.clear();
        formatter.write_failures_line(&mut line).expect("fits");
        assert_eq!(line.as_str(), "failures none power=good");
    }

    #[test]
    fn supply_mode_omits_the_charge_state() {
        let snapshot = StatusSnapshot {
            mode: InstrumentMode::PowerSupply,
            charge_state: None,
            ..snapshot()
        };
        let mut line: String<64> = String::new();
        StatusFormatter::new(&snapshot)
            .write_mode_line(&mut line)
            .expect("fits");
        assert_eq!(line.as_str(), "supply profile=2");
    }

    #[test]
    fn profile_line_lists_options() {
        let mut line: String<128> = String::new();
        write_profile_line(&mut line, 0, &profile::builtin(0)).expect("fits");
        assert!(line.starts_with("0: Makita 18V 3pin charge=21000mV/2000mA"));
        assert!(line.ends_with(" 1-wire"));
    }
}
