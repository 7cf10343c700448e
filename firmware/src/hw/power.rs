//! Analog front end: output voltage/current channels and the input supply.
//!
//! Raw conversions are averaged in the tick task and converted with the
//! active calibration by `charger-core`. The input supply check uses the
//! factory VREFINT constant so it does not depend on VDDA being exactly 3.3 V.

/// VDDA at which the factory VREFINT constant was taken (mV).
pub const VREFINT_CAL_MV: u32 = 3_000;
/// Input divider ratio on the supply sense pin.
pub const INPUT_DIVIDER: u32 = 11;
/// Lowest input supply the regulator runs from (mV).
pub const MIN_INPUT_MV: u32 = 12_000;

const ADC_FULL_SCALE: u32 = 4_095;

/// Converts an input sense reading into millivolts using the measured VREFINT.
///
/// Returns `None` when VREFINT reads zero (ADC not ready).
#[must_use]
pub fn input_millivolts(raw_input: u16, raw_vrefint: u16, vrefint_cal: u16) -> Option<u32> {
    if raw_vrefint == 0 {
        return None;
    }
    let vdda_mv = VREFINT_CAL_MV * u32::from(vrefint_cal) / u32::from(raw_vrefint);
    let pin_mv = u32::from(raw_input) * vdda_mv / ADC_FULL_SCALE;
    Some(pin_mv * INPUT_DIVIDER)
}

/// Classifies the input supply for the failure monitor.
#[must_use]
pub fn input_power_good(raw_input: u16, raw_vrefint: u16, vrefint_cal: u16) -> bool {
    input_millivolts(raw_input, raw_vrefint, vrefint_cal).is_some_and(|mv| mv >= MIN_INPUT_MV)
}

#[cfg(target_os = "none")]
pub use target::AnalogFrontEnd;

#[cfg(target_os = "none")]
mod target {
    use core::ptr;

    use charger_core::measurement::RawSample;
    use embassy_stm32::adc::{Adc, AdcChannel, AnyAdcChannel, SampleTime, VrefInt};
    use embassy_stm32::peripherals::ADC1;

    use super::input_power_good;

    /// Factory-programmed VREFINT calibration constant sampled at 3.0 V.
    const VREFINT_CAL_ADDR: *const u16 = 0x1FFF_75AA as *const u16;

    fn read_vrefint_calibration() -> u16 {
        // SAFETY: fixed, always-readable system memory location on STM32G0.
        unsafe { ptr::read_volatile(VREFINT_CAL_ADDR) }
    }

    /// Blocking reads of the output channels and the supply check.
    pub struct AnalogFrontEnd<'d> {
        adc: Adc<'d, ADC1>,
        voltage: AnyAdcChannel<ADC1>,
        current: AnyAdcChannel<ADC1>,
        input: AnyAdcChannel<ADC1>,
        vrefint: VrefInt,
        vrefint_cal: u16,
    }

    impl<'d> AnalogFrontEnd<'d> {
        pub fn new(
            mut adc: Adc<'d, ADC1>,
            voltage: impl AdcChannel<ADC1>,
            current: impl AdcChannel<ADC1>,
            input: impl AdcChannel<ADC1>,
        ) -> Self {
            adc.set_sample_time(SampleTime::CYCLES39_5);
            let vrefint = adc.enable_vrefint();
            Self {
                adc,
                voltage: voltage.degrade_adc(),
                current: current.degrade_adc(),
                input: input.degrade_adc(),
                vrefint,
                vrefint_cal: read_vrefint_calibration(),
            }
        }

        /// One conversion of each output channel.
        pub fn sample(&mut self) -> RawSample {
            RawSample::new(
                self.adc.blocking_read(&mut self.voltage),
                self.adc.blocking_read(&mut self.current),
            )
        }

        pub fn power_good(&mut self) -> bool {
            let vrefint = self.adc.blocking_read(&mut self.vrefint);
            let input = self.adc.blocking_read(&mut self.input);
            input_power_good(input, vrefint, self.vrefint_cal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // VREFINT reads its calibration value when VDDA is exactly 3.0 V.
    const CAL: u16 = 1_650;

    #[test]
    fn input_scales_with_vdda() {
        assert_eq!(input_millivolts(4_095, CAL, CAL), Some(33_000));
        // VDDA at 3.3 V makes VREFINT read lower for the same reference.
        assert_eq!(input_millivolts(4_095, 1_500, CAL), Some(36_300));
    }

    #[test]
    fn supply_below_minimum_is_not_good() {
        assert!(input_power_good(2_000, CAL, CAL));
        assert!(!input_power_good(1_000, CAL, CAL));
        assert!(!input_power_good(4_095, 0, CAL));
    }
}
