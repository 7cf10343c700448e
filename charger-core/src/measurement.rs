//! Calibration transforms and the trend-following smoothing filter.
//!
//! Raw values are averaged ADC readings produced by the tick context. Display
//! values are millivolts and milliamps. Regulation setpoints travel in raw
//! units, so every profile target passes through [`Calibration::display_to_adc`]
//! before it reaches the PID loop.

/// Scale factor denominator used by [`Calibration::scale_x4096`].
pub const SCALE_ONE: u32 = 4096;

/// Step (in display units) that flips the smoothing trend within a single call.
pub const SMOOTH_FLIP_DELTA: i32 = 18;
/// Band (in display units) that confirms the current trend and snaps on larger moves.
pub const SMOOTH_CONFIRM_DELTA: i32 = 5;
/// Consecutive small counter-trend samples tolerated before a forced snap.
pub const SMOOTH_DRIFT_LIMIT: i8 = 10;

/// Linear calibration for a single ADC channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Calibration {
    /// Offset in raw ADC units added before scaling.
    pub offset: i16,
    /// Multiplier expressed in 1/4096 steps.
    pub scale_x4096: u16,
}

impl Calibration {
    #[must_use]
    pub const fn new(offset: i16, scale_x4096: u16) -> Self {
        Self {
            offset,
            scale_x4096,
        }
    }

    /// Converts a raw averaged reading into display units (mV or mA), clamped at zero.
    #[must_use]
    pub fn adc_to_display(self, raw: u16) -> u16 {
        let shifted = (i32::from(raw) + i32::from(self.offset)).max(0);
        let shifted = u64::from(shifted.unsigned_abs());
        let scaled = (shifted * u64::from(self.scale_x4096) + u64::from(SCALE_ONE / 2)) >> 12;
        u16::try_from(scaled).unwrap_or(u16::MAX)
    }

    /// Converts a display value back into raw units for the regulation loop.
    ///
    /// The result is the raw reading whose [`adc_to_display`](Self::adc_to_display)
    /// lands closest to `value`. A zero scale maps everything to zero.
    #[must_use]
    pub fn display_to_adc(self, value: u16) -> u16 {
        if self.scale_x4096 == 0 {
            return 0;
        }

        let scale = u64::from(self.scale_x4096);
        let unscaled = ((u64::from(value) << 12) + scale / 2) / scale;
        let unscaled = i64::try_from(unscaled).unwrap_or(i64::MAX);
        let raw = (unscaled - i64::from(self.offset)).max(0);
        u16::try_from(raw).unwrap_or(u16::MAX)
    }
}

/// Calibration for both output channels.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChannelCalibration {
    pub voltage: Calibration,
    pub current: Calibration,
}

impl ChannelCalibration {
    /// Factory calibration used when stored settings are missing or invalid.
    pub const DEFAULT: Self = Self {
        voltage: Calibration::new(15, 24_532),
        current: Calibration::new(0, 12_580),
    };

    #[must_use]
    pub fn to_display(self, sample: RawSample) -> Measurements {
        Measurements {
            voltage: self.voltage.adc_to_display(sample.voltage),
            current: self.current.adc_to_display(sample.current),
        }
    }
}

impl Default for ChannelCalibration {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Averaged raw ADC readings for the output channels.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RawSample {
    pub voltage: u16,
    pub current: u16,
}

impl RawSample {
    #[must_use]
    pub const fn new(voltage: u16, current: u16) -> Self {
        Self { voltage, current }
    }

    /// Packs both channels into one word so they can be published atomically.
    #[must_use]
    pub const fn pack(self) -> u32 {
        ((self.voltage as u32) << 16) | self.current as u32
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn unpack(word: u32) -> Self {
        Self {
            voltage: (word >> 16) as u16,
            current: (word & 0xFFFF) as u16,
        }
    }
}

/// Calibrated output readings in millivolts and milliamps.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Measurements {
    pub voltage: u16,
    pub current: u16,
}

impl Measurements {
    #[must_use]
    pub const fn new(voltage: u16, current: u16) -> Self {
        Self { voltage, current }
    }
}

/// Hysteresis filter that follows the trend of a noisy signal.
///
/// A large step against the trend is followed immediately, small moves in the
/// trend direction are confirmed, and sustained slow drift against the trend
/// forces a snap after [`SMOOTH_DRIFT_LIMIT`] samples.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Smoother {
    trend: i8,
    stable: u16,
}

impl Smoother {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            trend: 0,
            stable: 0,
        }
    }

    /// Returns the current stabilized value.
    #[must_use]
    pub const fn value(&self) -> u16 {
        self.stable
    }

    /// Returns the signed trend counter. Positive while rising or flat.
    #[must_use]
    pub const fn trend(&self) -> i8 {
        self.trend
    }

    /// Feeds one sample and returns the stabilized value.
    pub fn smooth(&mut self, sample: u16) -> u16 {
        let delta = i32::from(sample) - i32::from(self.stable);

        if self.trend >= 0 {
            if delta <= -SMOOTH_FLIP_DELTA {
                self.flip_to(-1, sample);
            } else if delta >= -SMOOTH_CONFIRM_DELTA {
                self.trend = 1;
                if delta >= SMOOTH_CONFIRM_DELTA {
                    self.stable = sample;
                }
            } else {
                self.trend = self.trend.saturating_add(1);
                if self.trend >= SMOOTH_DRIFT_LIMIT {
                    self.flip_to(-1, sample);
                }
            }
        } else if delta >= SMOOTH_FLIP_DELTA {
            self.flip_to(1, sample);
        } else if delta <= SMOOTH_CONFIRM_DELTA {
            self.trend = -1;
            if delta <= -SMOOTH_CONFIRM_DELTA {
                self.stable = sample;
            }
        } else {
            self.trend = self.trend.saturating_sub(1);
            if self.trend <= -SMOOTH_DRIFT_LIMIT {
                self.flip_to(1, sample);
            }
        }

        self.stable
    }

    fn flip_to(&mut self, trend: i8, sample: u16) {
        self.trend = trend;
        self.stable = sample;
    }
}

/// Smoothing state for both output channels.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DisplaySmoothing {
    pub voltage: Smoother,
    pub current: Smoother,
}

impl DisplaySmoothing {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            voltage: Smoother::new(),
            current: Smoother::new(),
        }
    }

    pub fn smooth(&mut self, measured: Measurements) -> Measurements {
        Measurements {
            voltage: self.voltage.smooth(measured.voltage),
            current: self.current.smooth(measured.current),
        }
    }
}

/// Accumulates raw samples and publishes an average every `N` samples.
#[derive(Clone, Debug, Default)]
pub struct AdcAverager<const N: usize> {
    voltage_sum: u32,
    current_sum: u32,
    count: usize,
}

impl<const N: usize> AdcAverager<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            voltage_sum: 0,
            current_sum: 0,
            count: 0,
        }
    }

    /// Adds one conversion, returning the average once `N` samples were collected.
    pub fn push(&mut self, sample: RawSample) -> Option<RawSample> {
        self.voltage_sum = self.voltage_sum.saturating_add(u32::from(sample.voltage));
        self.current_sum = self.current_sum.saturating_add(u32::from(sample.current));
        self.count += 1;

        if self.count < N.max(1) {
            return None;
        }

        let divisor = u32::try_from(self.count).unwrap_or(u32::MAX);
        let average = RawSample {
            voltage: u16::try_from(self.voltage_sum / divisor).unwrap_or(u16::MAX),
            current: u16::try_from(self.current_sum / divisor).unwrap_or(u16::MAX),
        };
        *self = Self::new();
        Some(average)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_raw_reading_reflects_offset() {
        let cal = Calibration::new(15, 24_532);
        assert_eq!(cal.adc_to_display(0), 90);

        let negative = Calibration::new(-20, 24_532);
        assert_eq!(negative.adc_to_display(10), 0);
    }

    #[test]
    fn display_round_trip_stays_within_half_a_step() {
        for cal in [ChannelCalibration::DEFAULT.voltage, ChannelCalibration::DEFAULT.current] {
            let tolerance = u32::from(cal.scale_x4096) / 8192 + 1;
            let floor = cal.adc_to_display(0);
            for value in (floor..24_000).step_by(37) {
                let back = cal.adc_to_display(cal.display_to_adc(value));
                let error = u32::from(back.abs_diff(value));
                assert!(error <= tolerance, "value {value} came back as {back}");
            }
        }
    }

    #[test]
    fn display_to_adc_never_goes_negative() {
        let cal = Calibration::new(40, 4096);
        assert_eq!(cal.display_to_adc(10), 0);
        assert_eq!(Calibration::new(0, 0).display_to_adc(1000), 0);
    }

    #[test]
    fn smoother_locks_on_repeated_samples() {
        let mut smoother = Smoother::new();
        let first = smoother.smooth(4_000);
        for _ in 0..50 {
            assert_eq!(smoother.smooth(4_000), first);
        }
    }

    #[test]
    fn smoother_follows_large_opposing_step_immediately() {
        let mut smoother = Smoother::new();
        for _ in 0..200 {
            smoother.smooth(5_000);
        }
        assert_eq!(smoother.smooth(4_982), 4_982);
        assert!(smoother.trend() < 0);

        for _ in 0..200 {
            smoother.smooth(4_982);
        }
        assert_eq!(smoother.smooth(5_000), 5_000);
        assert!(smoother.trend() > 0);
    }

    #[test]
    fn smoother_ignores_single_sample_noise() {
        let mut smoother = Smoother::new();
        smoother.smooth(1_000);
        assert_eq!(smoother.smooth(997), 1_000);
        assert_eq!(smoother.smooth(1_003), 1_000);
        assert_eq!(smoother.smooth(990), 1_000);
    }

    #[test]
    fn smoother_converges_under_slow_drift() {
        let mut smoother = Smoother::new();
        smoother.smooth(1_000);
        let mut snapped = false;
        for _ in 0..SMOOTH_DRIFT_LIMIT {
            if smoother.smooth(990) == 990 {
                snapped = true;
                break;
            }
        }
        assert!(snapped);
    }

    #[test]
    fn averager_publishes_every_n_samples() {
        let mut averager = AdcAverager::<4>::new();
        assert_eq!(averager.push(RawSample::new(10, 1)), None);
        assert_eq!(averager.push(RawSample::new(20, 2)), None);
        assert_eq!(averager.push(RawSample::new(30, 3)), None);
        assert_eq!(
            averager.push(RawSample::new(40, 6)),
            Some(RawSample::new(25, 3))
        );
        assert_eq!(averager.push(RawSample::new(8, 8)), None);
    }

    #[test]
    fn raw_sample_packs_into_one_word() {
        let sample = RawSample::new(0x1234, 0xABCD);
        assert_eq!(RawSample::unpack(sample.pack()), sample);
    }
}
