//! Debounced safety layer evaluated on every 100 Hz tick.
//!
//! The monitor owns all failure state and is written only from the tick
//! context. Any asserted failure opens the output relay and forces regulation
//! off regardless of what the charge state machine wants.

use core::fmt;

use crate::measurement::Measurements;

/// Low-power counter value that confirms input power is healthy again.
pub const LOW_POWER_CONFIRM: i8 = 50;
/// Counter increment per tick while input power is good.
pub const LOW_POWER_RECOVER_STEP: i8 = 5;
/// Output excess voltage above target that counts towards an overvoltage trip (mV).
pub const OVERVOLTAGE_EXCESS_MV: u16 = 1_000;
/// Output excess current above target that must accompany the excess voltage (mA).
pub const OVERVOLTAGE_EXCESS_MA: u16 = 300;
/// Consecutive ticks of excess before the overvoltage failure latches.
pub const OVERVOLTAGE_TRIP_TICKS: u8 = 25;
/// Hardware current limit (mA).
pub const OVERCURRENT_LIMIT_MA: u16 = 9_000;
/// Consecutive ticks above the limit before the overcurrent failure latches.
pub const OVERCURRENT_TRIP_TICKS: u8 = 15;
/// Ticks the relay is given to settle after closing.
pub const RELAY_SETTLE_TICKS: u8 = 3;

/// Set of asserted failures.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FailureFlags(u8);

impl FailureFlags {
    pub const LOW_POWER: Self = Self(0x01);
    pub const OVERVOLTAGE: Self = Self(0x02);
    pub const OVERCURRENT: Self = Self(0x04);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x07)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    fn set(&mut self, other: Self, asserted: bool) {
        if asserted {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    /// Flags present in `self` but not in `previous`.
    #[must_use]
    pub const fn added_since(self, previous: Self) -> Self {
        Self(self.0 & !previous.0)
    }

    /// Iterates over the individual failures in this set.
    pub fn kinds(self) -> impl Iterator<Item = FailureKind> {
        FailureKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(kind.flag()))
    }
}

impl fmt::Display for FailureFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for kind in self.kinds() {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{kind}")?;
        }
        Ok(())
    }
}

/// A single failure condition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FailureKind {
    LowPower,
    Overvoltage,
    Overcurrent,
}

impl FailureKind {
    pub const ALL: [FailureKind; 3] = [
        FailureKind::LowPower,
        FailureKind::Overvoltage,
        FailureKind::Overcurrent,
    ];

    #[must_use]
    pub const fn flag(self) -> FailureFlags {
        match self {
            FailureKind::LowPower => FailureFlags::LOW_POWER,
            FailureKind::Overvoltage => FailureFlags::OVERVOLTAGE,
            FailureKind::Overcurrent => FailureFlags::OVERCURRENT,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::LowPower => "low-power",
            FailureKind::Overvoltage => "overvoltage",
            FailureKind::Overcurrent => "overcurrent",
        })
    }
}

/// Regulation mode handed to the PID loop.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum RegulationMode {
    #[default]
    Off,
    ConstantVoltage,
    ConstantCurrent,
}

impl RegulationMode {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            RegulationMode::Off => 0,
            RegulationMode::ConstantVoltage => 1,
            RegulationMode::ConstantCurrent => 2,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => RegulationMode::ConstantVoltage,
            2 => RegulationMode::ConstantCurrent,
            _ => RegulationMode::Off,
        }
    }
}

impl fmt::Display for RegulationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegulationMode::Off => "off",
            RegulationMode::ConstantVoltage => "cv",
            RegulationMode::ConstantCurrent => "cc",
        })
    }
}

/// Per-tick inputs for the monitor. Measurements and targets are display units.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FailureInputs {
    pub power_good: bool,
    pub measured: Measurements,
    pub target: Measurements,
    pub output_requested: bool,
    /// Mode the PID loop currently reports.
    pub regulation: RegulationMode,
}

/// What the output stage should do after this tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OutputDirective {
    pub relay_closed: bool,
    pub mode: RegulationMode,
}

impl OutputDirective {
    pub const OFF: Self = Self {
        relay_closed: false,
        mode: RegulationMode::Off,
    };
}

/// Outcome of one monitor tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FailureReport {
    pub directive: OutputDirective,
    pub flags: FailureFlags,
    /// Failures asserted during this tick.
    pub tripped: FailureFlags,
    /// Failures cleared during this tick.
    pub cleared: FailureFlags,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum RelayPhase {
    Tripped,
    Settling(u8),
    Running,
}

/// Debounce counters and latched flags.
#[derive(Clone, Debug)]
pub struct FailureMonitor {
    flags: FailureFlags,
    low_power_counter: i8,
    overvoltage_ticks: u8,
    overcurrent_ticks: u8,
    phase: RelayPhase,
}

impl Default for FailureMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureMonitor {
    /// Starts with low power asserted until input power is confirmed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            flags: FailureFlags::LOW_POWER,
            low_power_counter: 0,
            overvoltage_ticks: 0,
            overcurrent_ticks: 0,
            phase: RelayPhase::Tripped,
        }
    }

    #[must_use]
    pub const fn flags(&self) -> FailureFlags {
        self.flags
    }

    /// Returns `true` when output may be energized.
    #[must_use]
    pub const fn output_permitted(&self) -> bool {
        self.flags.is_empty() && matches!(self.phase, RelayPhase::Running)
    }

    /// Clears the latched overvoltage and overcurrent failures.
    ///
    /// The debounce counters restart, so a condition that is still present
    /// trips again after its full debounce window.
    pub fn clear_latched(&mut self) -> FailureFlags {
        let cleared = FailureFlags(
            self.flags.0 & (FailureFlags::OVERVOLTAGE.0 | FailureFlags::OVERCURRENT.0),
        );
        self.flags.set(FailureFlags::OVERVOLTAGE, false);
        self.flags.set(FailureFlags::OVERCURRENT, false);
        self.overvoltage_ticks = 0;
        self.overcurrent_ticks = 0;
        cleared
    }

    /// Evaluates one 10 ms tick.
    pub fn tick(&mut self, inputs: &FailureInputs) -> FailureReport {
        let before = self.flags;

        self.update_low_power(inputs.power_good);
        self.update_overvoltage(inputs);
        self.update_overcurrent(inputs);

        let directive = self.advance_phase(inputs);

        FailureReport {
            directive,
            flags: self.flags,
            tripped: self.flags.added_since(before),
            cleared: before.added_since(self.flags),
        }
    }

    fn update_low_power(&mut self, power_good: bool) {
        if power_good {
            self.low_power_counter = self
                .low_power_counter
                .saturating_add(LOW_POWER_RECOVER_STEP);
            if self.low_power_counter >= LOW_POWER_CONFIRM {
                self.low_power_counter = LOW_POWER_CONFIRM;
                self.flags.set(FailureFlags::LOW_POWER, false);
            }
        } else {
            self.low_power_counter = self.low_power_counter.saturating_sub(1);
            if self.low_power_counter <= 0 {
                self.low_power_counter = 0;
                self.flags.set(FailureFlags::LOW_POWER, true);
            }
        }
    }

    fn update_overvoltage(&mut self, inputs: &FailureInputs) {
        let excess_voltage = inputs
            .measured
            .voltage
            .saturating_sub(inputs.target.voltage)
            > OVERVOLTAGE_EXCESS_MV;
        let excess_current = inputs
            .measured
            .current
            .saturating_sub(inputs.target.current)
            > OVERVOLTAGE_EXCESS_MA;

        if excess_voltage && excess_current {
            self.overvoltage_ticks = self.overvoltage_ticks.saturating_add(1);
            if self.overvoltage_ticks >= OVERVOLTAGE_TRIP_TICKS {
                self.flags.set(FailureFlags::OVERVOLTAGE, true);
            }
        } else {
            self.overvoltage_ticks = 0;
        }
    }

    fn update_overcurrent(&mut self, inputs: &FailureInputs) {
        if inputs.measured.current > OVERCURRENT_LIMIT_MA {
            self.overcurrent_ticks = self.overcurrent_ticks.saturating_add(1);
            if self.overcurrent_ticks >= OVERCURRENT_TRIP_TICKS {
                self.flags.set(FailureFlags::OVERCURRENT, true);
            }
        } else {
            self.overcurrent_ticks = 0;
        }
    }

    fn advance_phase(&mut self, inputs: &FailureInputs) -> OutputDirective {
        if !self.flags.is_empty() {
            self.phase = RelayPhase::Tripped;
            return OutputDirective::OFF;
        }

        match self.phase {
            RelayPhase::Tripped => {
                self.phase = RelayPhase::Settling(1);
                OutputDirective {
                    relay_closed: true,
                    mode: RegulationMode::Off,
                }
            }
            RelayPhase::Settling(count) => {
                self.phase = if count + 1 >= RELAY_SETTLE_TICKS {
                    RelayPhase::Running
                } else {
                    RelayPhase::Settling(count + 1)
                };
                OutputDirective {
                    relay_closed: true,
                    mode: RegulationMode::Off,
                }
            }
            RelayPhase::Running => OutputDirective {
                relay_closed: true,
                mode: running_mode(inputs),
            },
        }
    }
}

fn running_mode(inputs: &FailureInputs) -> RegulationMode {
    if !inputs.output_requested {
        RegulationMode::Off
    } else if inputs.regulation == RegulationMode::Off {
        RegulationMode::ConstantCurrent
    } else {
        inputs.regulation
    }
}
