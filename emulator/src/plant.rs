//! Simulated regulator, battery and Makita pack.

use charger_core::charger::makita::{BATTERY_MESSAGE_LEN, BatteryPort, OneWireBus, OneWireError};
use charger_core::failure::{OutputDirective, RegulationMode};
use charger_core::measurement::Measurements;
use charger_core::profile::MAX_VOLTAGE;

/// Simulated tick length.
pub const TICK_MS: u64 = 10;
const TICK_HOURS: f64 = 10.0 / 3_600_000.0;

/// Lithium-ish cell stack charged through a fixed internal resistance.
#[derive(Clone, Debug)]
pub struct Battery {
    pub empty_mv: f64,
    pub full_mv: f64,
    pub capacity_mah: f64,
    pub charge_mah: f64,
    pub resistance_ohm: f64,
    /// Status line pulled active by the pack.
    pub fault: bool,
}

impl Battery {
    /// Builds a pack whose resting voltage is `millivolts`.
    ///
    /// The cell count is inferred from a 3.7 V nominal cell and the curve is
    /// stretched when the resting voltage falls outside it.
    pub fn resting_at(millivolts: u16) -> Self {
        let resting = f64::from(millivolts);
        let cells = (resting / 3_700.0).round().max(1.0);
        let empty_mv = (cells * 3_000.0).min(resting);
        let full_mv = (cells * 4_200.0).max(resting);
        let capacity_mah = 500.0;
        let soc = (resting - empty_mv) / (full_mv - empty_mv);
        Self {
            empty_mv,
            full_mv,
            capacity_mah,
            charge_mah: soc * capacity_mah,
            resistance_ohm: 0.15 * cells,
            fault: false,
        }
    }

    pub fn open_circuit_mv(&self) -> f64 {
        let soc = (self.charge_mah / self.capacity_mah).clamp(0.0, 1.0);
        self.empty_mv + (self.full_mv - self.empty_mv) * soc
    }
}

/// One simulated reading and the regime the regulator settled in.
#[derive(Clone, Copy, Debug)]
pub struct Reading {
    pub measured: Measurements,
    pub regulation: RegulationMode,
}

/// Constant-current / constant-voltage source driving an optional battery.
#[derive(Clone, Debug, Default)]
pub struct Plant {
    battery: Option<Battery>,
    pack_cursor: usize,
}

impl Plant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn battery(&self) -> Option<&Battery> {
        self.battery.as_ref()
    }

    pub fn insert(&mut self, battery: Battery) {
        self.battery = Some(battery);
    }

    pub fn remove(&mut self) -> bool {
        self.battery.take().is_some()
    }

    /// Toggles the pack's status line; returns the new level.
    pub fn toggle_fault(&mut self) -> Option<bool> {
        let battery = self.battery.as_mut()?;
        battery.fault = !battery.fault;
        Some(battery.fault)
    }

    /// Advances the plant by one tick under `directive`, tracking `target`.
    pub fn step(&mut self, directive: OutputDirective, target: Measurements) -> Reading {
        let delivering = directive.relay_closed && directive.mode != RegulationMode::Off;
        let target_mv = f64::from(target.voltage.min(MAX_VOLTAGE));
        let target_ma = f64::from(target.current);

        let Some(battery) = self.battery.as_mut() else {
            return if delivering {
                reading(target_mv, 0.0, RegulationMode::ConstantVoltage)
            } else {
                reading(0.0, 0.0, RegulationMode::Off)
            };
        };

        let ocv = battery.open_circuit_mv();
        if !delivering {
            return reading(ocv, 0.0, RegulationMode::Off);
        }

        // Current needed to pull the terminals up to the voltage target.
        let wanted_ma = (target_mv - ocv) / battery.resistance_ohm;
        let (voltage, current, regulation) = if wanted_ma > target_ma {
            (
                ocv + target_ma * battery.resistance_ohm,
                target_ma,
                RegulationMode::ConstantCurrent,
            )
        } else if wanted_ma > 0.0 {
            (target_mv, wanted_ma, RegulationMode::ConstantVoltage)
        } else {
            (ocv, 0.0, RegulationMode::ConstantVoltage)
        };

        battery.charge_mah =
            (battery.charge_mah + current * TICK_HOURS).min(battery.capacity_mah);
        reading(voltage, current, regulation)
    }
}

fn reading(voltage_mv: f64, current_ma: f64, regulation: RegulationMode) -> Reading {
    Reading {
        measured: Measurements::new(to_unit(voltage_mv), to_unit(current_ma)),
        regulation,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_unit(value: f64) -> u16 {
    value.round().clamp(0.0, f64::from(u16::MAX)) as u16
}

/// The inserted pack answers resets and streams a fixed identity message.
impl OneWireBus for Plant {
    fn reset(&mut self) -> Result<(), OneWireError> {
        self.pack_cursor = 0;
        if self.battery.is_some() {
            Ok(())
        } else {
            Err(OneWireError::NoPresence)
        }
    }

    fn send(&mut self, _byte: u8) {}

    fn recv(&mut self) -> u8 {
        let index = self.pack_cursor % BATTERY_MESSAGE_LEN;
        self.pack_cursor += 1;
        PACK_MESSAGE[index]
    }
}

impl BatteryPort for Plant {
    fn status_asserted(&mut self) -> bool {
        self.battery.as_ref().is_some_and(|battery| battery.fault)
    }
}

const PACK_MESSAGE: [u8; BATTERY_MESSAGE_LEN] = [
    0x42, 0x4C, 0x31, 0x38, 0x33, 0x30, 0x00, 0x00, 0x14, 0x05, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0F, 0x00, 0x00, 0x00,
];
