//! Regulation targets and charge thresholds derived from the active profile.

use crate::measurement::ChannelCalibration;
use crate::profile::{ChargeProfile, MAX_VOLTAGE, THRESHOLD_GAP_MA};
use crate::settings::SupplySetpoint;

/// Voltage target used in CCC mode so the loop never leaves constant current (mV).
pub const CCC_TARGET_VOLTAGE: u16 = MAX_VOLTAGE;

/// Setpoints handed to the external PID loop, in raw ADC units.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RegulationTarget {
    pub voltage_raw: u16,
    pub current_raw: u16,
}

impl RegulationTarget {
    #[must_use]
    pub fn from_display(voltage: u16, current: u16, calibration: ChannelCalibration) -> Self {
        Self {
            voltage_raw: calibration.voltage.display_to_adc(voltage),
            current_raw: calibration.current.display_to_adc(current),
        }
    }

    /// Packs both targets into one word so they can be published atomically.
    #[must_use]
    pub const fn pack(self) -> u32 {
        ((self.voltage_raw as u32) << 16) | self.current_raw as u32
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn unpack(word: u32) -> Self {
        Self {
            voltage_raw: (word >> 16) as u16,
            current_raw: (word & 0xFFFF) as u16,
        }
    }
}

/// Targets applied while no battery has been confirmed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Precharge {
    pub target: RegulationTarget,
    /// Open-circuit current plus the display reading at zero raw current (mA).
    pub open_current_corrected: u16,
}

/// Targets and thresholds applied while a battery is charging.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WorkingCharge {
    pub target: RegulationTarget,
    /// Charge current percentage below which charging may complete (mA).
    pub finish_threshold: u16,
    /// Current below which the battery counts as removed (mA).
    pub no_battery_threshold: u16,
}

/// Open-circuit current corrected for the current channel's zero offset.
///
/// A positive calibration offset makes zero raw current read as a few mA.
/// Without the correction the open-circuit current could be unreachable and
/// the loop would sit in constant current forever.
#[must_use]
pub fn open_current_corrected(profile: &ChargeProfile, calibration: ChannelCalibration) -> u16 {
    profile
        .open_current
        .saturating_add(calibration.current.adc_to_display(0))
}

#[must_use]
pub fn precharge(profile: &ChargeProfile, calibration: ChannelCalibration) -> Precharge {
    let open_current_corrected = open_current_corrected(profile, calibration);
    Precharge {
        target: RegulationTarget::from_display(
            profile.open_voltage,
            open_current_corrected,
            calibration,
        ),
        open_current_corrected,
    }
}

#[must_use]
pub fn working_charge(
    profile: &ChargeProfile,
    calibration: ChannelCalibration,
    open_current_corrected: u16,
) -> WorkingCharge {
    let finish_threshold = profile.finish_threshold();
    let voltage = if profile.ccc_mode() {
        CCC_TARGET_VOLTAGE
    } else {
        profile.charge_voltage
    };

    WorkingCharge {
        target: RegulationTarget::from_display(voltage, profile.charge_current, calibration),
        finish_threshold,
        no_battery_threshold: open_current_corrected
            .min(finish_threshold.saturating_sub(THRESHOLD_GAP_MA)),
    }
}

#[must_use]
pub fn power_supply(setpoint: SupplySetpoint, calibration: ChannelCalibration) -> RegulationTarget {
    let setpoint = setpoint.clamped();
    RegulationTarget::from_display(setpoint.voltage, setpoint.current, calibration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Calibration;
    use crate::profile::{self, PROFILE_SLOTS, ProfileOptions};

    fn offset_calibration() -> ChannelCalibration {
        ChannelCalibration {
            voltage: Calibration::new(15, 24_532),
            current: Calibration::new(12, 12_580),
        }
    }

    #[test]
    fn precharge_adds_zero_current_reading() {
        let profile = profile::builtin(2);
        let cal = offset_calibration();
        let zero = cal.current.adc_to_display(0);
        assert_eq!(zero, 37);

        let precharge = precharge(&profile, cal);
        assert_eq!(precharge.open_current_corrected, 30 + zero);
        assert_eq!(
            precharge.target.voltage_raw,
            cal.voltage.display_to_adc(profile.open_voltage)
        );
        assert_eq!(
            precharge.target.current_raw,
            cal.current.display_to_adc(30 + zero)
        );
    }

    #[test]
    fn ccc_mode_raises_voltage_target() {
        let cal = ChannelCalibration::DEFAULT;
        let mut profile = profile::builtin(3);
        let normal = working_charge(&profile, cal, 30);
        assert_eq!(normal.target.voltage_raw, cal.voltage.display_to_adc(8_400));

        profile.options.insert(ProfileOptions::CCC_MODE);
        let ccc = working_charge(&profile, cal, 30);
        assert_eq!(ccc.target.voltage_raw, cal.voltage.display_to_adc(CCC_TARGET_VOLTAGE));
        assert_eq!(ccc.target.current_raw, normal.target.current_raw);
        assert_eq!(ccc.finish_threshold, 75);
    }

    #[test]
    fn thresholds_never_collide() {
        let cal = offset_calibration();
        for index in 0..PROFILE_SLOTS {
            let mut profile = profile::builtin(index);
            for stop in [1u8, 2, 5, 10, 50, 100] {
                profile.stop_percent = stop;
                for current in [profile.min_charge_current(), 300, 1_500, 6_000] {
                    profile.set_charge_current(current);
                    if profile.validate().is_err() {
                        continue;
                    }
                    let corrected = precharge(&profile, cal).open_current_corrected;
                    let charge = working_charge(&profile, cal, corrected);
                    assert!(
                        charge.no_battery_threshold + THRESHOLD_GAP_MA <= charge.finish_threshold,
                        "profile {index} stop {stop} current {current}"
                    );
                }
            }
        }
    }

    #[test]
    fn small_finish_threshold_clamps_no_battery_threshold() {
        let profile = profile::builtin(7);
        let charge = working_charge(&profile, ChannelCalibration::DEFAULT, 15);
        assert_eq!(charge.finish_threshold, 15);
        assert_eq!(charge.no_battery_threshold, 5);
    }

    #[test]
    fn supply_targets_are_clamped() {
        let cal = ChannelCalibration::DEFAULT;
        let target = power_supply(SupplySetpoint::new(30_000, 9_000), cal);
        assert_eq!(target, RegulationTarget::from_display(24_000, 6_000, cal));
    }

    #[test]
    fn targets_pack_into_one_word() {
        let target = RegulationTarget {
            voltage_raw: 3_500,
            current_raw: 480,
        };
        assert_eq!(RegulationTarget::unpack(target.pack()), target);
    }
}
