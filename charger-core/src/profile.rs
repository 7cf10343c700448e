//! Charge profiles: one parameter set per battery chemistry or pack.

use core::fmt;

use heapless::String;

/// Maximum number of characters kept for a profile name.
pub const PROFILE_NAME_LEN: usize = 20;
/// Number of profile slots in the catalog.
pub const PROFILE_SLOTS: usize = 10;
/// Highest voltage the output stage can regulate (mV).
pub const MAX_VOLTAGE: u16 = 24_000;
/// Highest current the output stage can regulate (mA).
pub const MAX_CURRENT: u16 = 6_000;
/// Minimum distance kept between the finish threshold and the no-battery threshold (mA).
pub const THRESHOLD_GAP_MA: u16 = 10;

/// Bit flags selecting optional charger behaviour.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ProfileOptions(u8);

impl ProfileOptions {
    /// Detect and authenticate the pack over the 1-wire status pin.
    pub const ALTERNATE_PROTOCOL: Self = Self(0x01);
    /// Constant-current charge without a CV phase; the voltage target is raised to the limit.
    pub const CCC_MODE: Self = Self(0x02);
    /// Restart charging once the resting voltage drops under the restart level.
    pub const AUTO_RESTART: Self = Self(0x04);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn toggle(&mut self, other: Self) {
        self.0 ^= other.0;
    }
}

impl core::ops::BitOr for ProfileOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Reasons a profile cannot be used for charging.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProfileError {
    /// The minimum valid voltage is not below the charge voltage.
    VoltageWindowEmpty,
    /// The charge current does not exceed the open-circuit current by the threshold gap.
    ChargeCurrentTooLow,
    /// The stop percentage is outside 1..=100.
    StopPercentOutOfRange,
    /// The finish threshold would collide with the no-battery threshold.
    FinishThresholdTooLow,
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileError::VoltageWindowEmpty => f.write_str("min voltage must be below charge voltage"),
            ProfileError::ChargeCurrentTooLow => {
                f.write_str("charge current must exceed open current by 10 mA")
            }
            ProfileError::StopPercentOutOfRange => f.write_str("stop percent must be 1..=100"),
            ProfileError::FinishThresholdTooLow => f.write_str("finish threshold below 10 mA"),
        }
    }
}

/// Declarative parameters for one charging regime. Voltages in mV, currents in mA.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChargeProfile {
    pub name: String<PROFILE_NAME_LEN>,
    pub charge_voltage: u16,
    pub charge_current: u16,
    pub open_voltage: u16,
    pub open_current: u16,
    pub min_battery_voltage: u16,
    pub restart_voltage: u16,
    pub stop_percent: u8,
    pub options: ProfileOptions,
}

impl ChargeProfile {
    /// Builds a profile, truncating `name` to [`PROFILE_NAME_LEN`] characters.
    #[must_use]
    pub fn new(
        name: &str,
        charge: (u16, u16),
        open: (u16, u16),
        min_battery_voltage: u16,
        restart_voltage: u16,
        stop_percent: u8,
        options: ProfileOptions,
    ) -> Self {
        Self {
            name: truncated_name(name),
            charge_voltage: charge.0,
            charge_current: charge.1,
            open_voltage: open.0,
            open_current: open.1,
            min_battery_voltage,
            restart_voltage,
            stop_percent,
            options,
        }
    }

    #[must_use]
    pub fn uses_alternate_protocol(&self) -> bool {
        self.options.contains(ProfileOptions::ALTERNATE_PROTOCOL)
    }

    #[must_use]
    pub fn ccc_mode(&self) -> bool {
        self.options.contains(ProfileOptions::CCC_MODE)
    }

    #[must_use]
    pub fn auto_restart(&self) -> bool {
        self.options.contains(ProfileOptions::AUTO_RESTART)
    }

    /// Current below which the charge counts as finished (mA).
    #[must_use]
    pub fn finish_threshold(&self) -> u16 {
        let scaled = u32::from(self.charge_current) * u32::from(self.stop_percent) / 100;
        u16::try_from(scaled).unwrap_or(u16::MAX)
    }

    /// Lowest charge current the editor accepts for this profile.
    #[must_use]
    pub fn min_charge_current(&self) -> u16 {
        self.open_current.saturating_add(THRESHOLD_GAP_MA).min(MAX_CURRENT)
    }

    /// Checks the relations the charge state machine relies on.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProfileError`] found.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.min_battery_voltage >= self.charge_voltage {
            return Err(ProfileError::VoltageWindowEmpty);
        }
        if self.charge_current < self.min_charge_current() {
            return Err(ProfileError::ChargeCurrentTooLow);
        }
        if !(1..=100).contains(&self.stop_percent) {
            return Err(ProfileError::StopPercentOutOfRange);
        }
        if self.finish_threshold() < THRESHOLD_GAP_MA {
            return Err(ProfileError::FinishThresholdTooLow);
        }
        Ok(())
    }

    /// Sets the charge current, clamped to the editor range.
    pub fn set_charge_current(&mut self, current: u16) -> u16 {
        self.charge_current = current.clamp(self.min_charge_current(), MAX_CURRENT);
        self.charge_current
    }

    /// Applies an encoder step to one decimal digit of the charge current.
    pub fn adjust_charge_current_digit(&mut self, digit: u8, delta: i8) -> u16 {
        let min = self.min_charge_current();
        self.charge_current = adjust_by_digit(self.charge_current, digit, delta, min, MAX_CURRENT);
        self.charge_current
    }
}

/// Adds `delta` units of the given decimal digit (0 = ones) to `value`, saturating at the bounds.
#[must_use]
pub fn adjust_by_digit(value: u16, digit: u8, delta: i8, min: u16, max: u16) -> u16 {
    let step: i32 = match digit {
        0 => 1,
        1 => 10,
        2 => 100,
        3 => 1_000,
        _ => 10_000,
    };
    let next = i32::from(value) + step * i32::from(delta);
    let clamped = next.clamp(i32::from(min), i32::from(max.max(min)));
    u16::try_from(clamped).unwrap_or(max)
}

fn truncated_name(name: &str) -> String<PROFILE_NAME_LEN> {
    let mut out = String::new();
    for ch in name.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

type BuiltinRow = (&'static str, (u16, u16), (u16, u16), u16, u16, u8, u8);

const BUILTIN_PROFILES: [BuiltinRow; PROFILE_SLOTS] = [
    ("Makita 18V 3pin", (21_000, 2_000), (21_500, 30), 15_000, 20_500, 10, 0x01),
    ("Makita 18V 2pin", (21_000, 2_000), (21_500, 30), 15_000, 20_500, 10, 0x00),
    ("Li-Ion 1S 4.2V 1.5A", (4_200, 1_500), (4_700, 30), 3_000, 4_100, 5, 0x00),
    ("Li-Ion 2S 8.4V 1.5A", (8_400, 1_500), (8_900, 30), 6_000, 8_200, 5, 0x00),
    ("Li-Ion 3S 12.6V 1.5A", (12_600, 1_500), (23_100, 30), 9_000, 12_300, 5, 0x00),
    ("Li-Ion 4S 16.8V 1.5A", (16_800, 1_500), (17_300, 30), 12_000, 16_400, 5, 0x00),
    ("Li-Ion 5S 21.0V 1.5A", (21_000, 1_500), (21_500, 30), 15_000, 20_500, 5, 0x00),
    ("Li 6F22 8.4V 0.3A", (8_400, 300), (8_900, 15), 6_000, 8_200, 5, 0x00),
    ("12V Pb Charge", (14_400, 3_000), (14_900, 30), 10_000, 10_000, 5, 0x00),
    ("12V Pb Repair", (19_000, 2_000), (19_500, 30), 10_000, 10_000, 5, 0x00),
];

/// Returns the factory profile for `index`; out-of-range indices yield slot 0.
#[must_use]
pub fn builtin(index: usize) -> ChargeProfile {
    let (name, charge, open, min, restart, stop, options) =
        BUILTIN_PROFILES.get(index).copied().unwrap_or(BUILTIN_PROFILES[0]);
    ChargeProfile::new(
        name,
        charge,
        open,
        min,
        restart,
        stop,
        ProfileOptions::from_bits(options),
    )
}
