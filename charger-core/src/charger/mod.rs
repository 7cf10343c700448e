//! Charge protocol state machine.
//!
//! [`Charger::poll`] is called from the main loop with the elapsed tick count
//! and the latest calibrated measurements. Every guard pairs an instantaneous
//! comparison with a dwell time counted in 10 ms ticks; a disturbance answers
//! [`Outcome::ResetTicks`] to restart the dwell without leaving the state.

pub mod makita;

use core::fmt;

use crate::failure::RegulationMode;
use crate::measurement::{ChannelCalibration, DisplaySmoothing, Measurements};
use crate::profile::{ChargeProfile, ProfileOptions};
use crate::settings::{SoundId, SoundMap};
use crate::setpoints::{self, RegulationTarget};

use makita::{BatteryMessage, BatteryPort, MakitaLink, PresenceStep, StatusStep};

/// Startup debounce in `NoBattery`.
pub const NO_BATTERY_DEBOUNCE_TICKS: u16 = 10;
/// Largest voltage move between polls still considered stable (mV).
pub const STABILITY_WINDOW_MV: u16 = 100;
/// Rise above the open-circuit voltage that signals an inserted battery (mV).
pub const DETECT_MARGIN_MV: u16 = 200;
/// Dwell before an inserted battery is classified.
pub const DETECT_TICKS: u16 = 50;
/// Below this voltage an invalid battery counts as removed or shorted (mV).
pub const INVALID_REMOVAL_FLOOR_MV: u16 = 200;
/// Drop from the detection voltage that counts as removal of an invalid battery (mV).
pub const INVALID_DROP_MV: u16 = 300;
/// Time an invalid battery must stay away before the output is switched back on.
pub const INVALID_WAIT_TICKS: u16 = 100;
/// Allowed deviation from the open-circuit voltage while recovering (mV).
pub const RECOVER_WINDOW_MV: u16 = 100;
pub const RECOVER_TICKS: u16 = 20;
/// Settling time with the output disabled before the resting voltage is read.
pub const MEASURE_SETTLE_TICKS: u16 = 10;
/// Time ignored after the output is enabled for charging.
pub const CHARGE_IGNORE_TICKS: u16 = 10;
/// Charging interval between resting-voltage measurements.
pub const REMEASURE_TICKS: u16 = 1_000;
/// Consecutive low-current polls that mean the battery was pulled.
pub const REMOVAL_POLLS: u8 = 3;
/// Dwell below the restart voltage before `ChargeComplete` acts.
pub const COMPLETE_WAIT_TICKS: u16 = 150;
/// Drop from the completion baseline that means the battery was pulled (mV).
pub const REMOVAL_DROP_MV: u16 = 100;
/// Width of the charge progress bar (px).
pub const BAR_PIXELS: u8 = 78;
/// Width of the moving highlight on the progress bar (px).
pub const CHARGE_BAR_WIDTH: u8 = 7;

/// Charger protocol states.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChargeState {
    NoBattery,
    InvalidBattery,
    InvalidBatteryRecovering,
    MeasuringVoltage,
    Charging,
    ChargeComplete,
    /// Reported by the alternate protocol; left only by acknowledgment.
    BatteryError,
}

impl ChargeState {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            ChargeState::NoBattery => 0,
            ChargeState::InvalidBattery => 1,
            ChargeState::InvalidBatteryRecovering => 2,
            ChargeState::MeasuringVoltage => 3,
            ChargeState::Charging => 4,
            ChargeState::ChargeComplete => 5,
            ChargeState::BatteryError => 6,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ChargeState::NoBattery),
            1 => Some(ChargeState::InvalidBattery),
            2 => Some(ChargeState::InvalidBatteryRecovering),
            3 => Some(ChargeState::MeasuringVoltage),
            4 => Some(ChargeState::Charging),
            5 => Some(ChargeState::ChargeComplete),
            6 => Some(ChargeState::BatteryError),
            _ => None,
        }
    }

    /// States in which charge targets are active and live edits recompute them.
    #[must_use]
    pub const fn is_charge_phase(self) -> bool {
        matches!(self, ChargeState::MeasuringVoltage | ChargeState::Charging)
    }
}

impl fmt::Display for ChargeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChargeState::NoBattery => "no-battery",
            ChargeState::InvalidBattery => "invalid-battery",
            ChargeState::InvalidBatteryRecovering => "invalid-battery-recovering",
            ChargeState::MeasuringVoltage => "measuring-voltage",
            ChargeState::Charging => "charging",
            ChargeState::ChargeComplete => "charge-complete",
            ChargeState::BatteryError => "battery-error",
        })
    }
}

/// What a poll decided.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    NoChange,
    /// Stay, but restart the dwell counter.
    ResetTicks,
    Transition(ChargeState),
}

/// Poll result plus a rendering hint for the display collaborator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Evaluation {
    pub outcome: Outcome,
    /// The new screen shares its background with the old one.
    pub suppress_background_erase: bool,
}

impl Evaluation {
    pub const NO_CHANGE: Self = Self {
        outcome: Outcome::NoChange,
        suppress_background_erase: false,
    };

    pub const RESET_TICKS: Self = Self {
        outcome: Outcome::ResetTicks,
        suppress_background_erase: false,
    };

    #[must_use]
    pub const fn to(state: ChargeState) -> Self {
        Self {
            outcome: Outcome::Transition(state),
            suppress_background_erase: false,
        }
    }

    #[must_use]
    pub const fn to_quietly(state: ChargeState) -> Self {
        Self {
            outcome: Outcome::Transition(state),
            suppress_background_erase: true,
        }
    }

    #[must_use]
    pub const fn transition(self) -> Option<ChargeState> {
        match self.outcome {
            Outcome::Transition(state) => Some(state),
            _ => None,
        }
    }
}

/// Side effects the state machine asks of the instrument.
pub trait ChargerIo {
    fn set_output_enabled(&mut self, enabled: bool);

    fn play_sound(&mut self, sound: SoundId);

    fn stop_sound(&mut self);

    /// Asks the tick context to zero the elapsed time and capacity counters.
    fn reset_time_and_capacity(&mut self);
}

/// Latest readings handed to [`Charger::poll`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PollInput {
    /// Calibrated, unsmoothed readings.
    pub measured: Measurements,
    /// Mode the regulation loop currently runs in.
    pub regulation: RegulationMode,
}

/// Position of the moving highlight on the progress bar, in 1/256 px.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ChargeBar {
    position: i32,
}

impl ChargeBar {
    #[allow(clippy::cast_lossless)]
    const START: i32 = -((CHARGE_BAR_WIDTH as i32) << 8);

    #[must_use]
    pub const fn new() -> Self {
        Self {
            position: Self::START,
        }
    }

    /// Moves the highlight by `ticks`, wrapping once it passes the filled width.
    pub fn advance(&mut self, ticks: u16, filled_px: u8) {
        self.position += i32::from(ticks) << 5;
        let span = (i32::from(filled_px) + i32::from(CHARGE_BAR_WIDTH)) << 8;
        while self.position >= i32::from(filled_px) << 8 {
            self.position -= span;
        }
    }

    /// Left edge of the highlight in whole pixels; negative while entering.
    #[must_use]
    pub fn offset_px(&self) -> i16 {
        i16::try_from(self.position >> 8).unwrap_or(i16::MIN)
    }
}

/// Working state of the active charge session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChargeSession {
    state: ChargeState,
    ticks: u16,
    target: RegulationTarget,
    open_current_corrected: u16,
    finish_threshold: u16,
    no_battery_threshold: u16,
    no_battery_count: u8,
    can_finish: bool,
    previous_voltage: u16,
    smoothing: DisplaySmoothing,
    smoothed: Measurements,
    makita: MakitaLink,
    percent: u8,
    pixels: u8,
    bar: ChargeBar,
}

impl Default for ChargeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChargeSession {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ChargeState::NoBattery,
            ticks: 0,
            target: RegulationTarget {
                voltage_raw: 0,
                current_raw: 0,
            },
            open_current_corrected: 0,
            finish_threshold: 0,
            no_battery_threshold: 0,
            no_battery_count: 0,
            can_finish: false,
            previous_voltage: 0,
            smoothing: DisplaySmoothing::new(),
            smoothed: Measurements::new(0, 0),
            makita: MakitaLink::new(),
            percent: 0,
            pixels: 0,
            bar: ChargeBar::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> ChargeState {
        self.state
    }

    #[must_use]
    pub const fn ticks_in_state(&self) -> u16 {
        self.ticks
    }

    #[must_use]
    pub const fn no_battery_count(&self) -> u8 {
        self.no_battery_count
    }

    #[must_use]
    pub const fn previous_voltage(&self) -> u16 {
        self.previous_voltage
    }

    #[must_use]
    pub const fn can_finish(&self) -> bool {
        self.can_finish
    }

    fn enter(&mut self, state: ChargeState) {
        self.state = state;
        self.ticks = 0;
        self.no_battery_count = 0;
        self.makita.reset_counters();
    }
}

/// Snapshot of the charger for display and diagnostics.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChargerStatus {
    pub state: ChargeState,
    pub ticks_in_state: u16,
    pub target: RegulationTarget,
    pub smoothed: Measurements,
    pub percent: u8,
    pub pixels: u8,
    pub bar_offset_px: i16,
    pub open_current_corrected: u16,
    pub finish_threshold: u16,
    pub no_battery_threshold: u16,
}

/// Charger controller: profile, calibration and the active session.
#[derive(Clone, Debug)]
pub struct Charger {
    profile: ChargeProfile,
    calibration: ChannelCalibration,
    sounds: SoundMap,
    session: ChargeSession,
}

impl Charger {
    /// Creates a charger with precharge targets computed but the output untouched.
    #[must_use]
    pub fn new(profile: ChargeProfile, calibration: ChannelCalibration, sounds: SoundMap) -> Self {
        let mut charger = Self {
            profile,
            calibration,
            sounds,
            session: ChargeSession::new(),
        };
        charger.apply_precharge();
        charger
    }

    #[must_use]
    pub const fn profile(&self) -> &ChargeProfile {
        &self.profile
    }

    #[must_use]
    pub const fn session(&self) -> &ChargeSession {
        &self.session
    }

    #[must_use]
    pub const fn state(&self) -> ChargeState {
        self.session.state
    }

    #[must_use]
    pub const fn target(&self) -> RegulationTarget {
        self.session.target
    }

    #[must_use]
    pub const fn battery_message(&self) -> Option<&BatteryMessage> {
        self.session.makita.message()
    }

    #[must_use]
    pub fn status(&self) -> ChargerStatus {
        let session = &self.session;
        ChargerStatus {
            state: session.state,
            ticks_in_state: session.ticks,
            target: session.target,
            smoothed: session.smoothed,
            percent: session.percent,
            pixels: session.pixels,
            bar_offset_px: session.bar.offset_px(),
            open_current_corrected: session.open_current_corrected,
            finish_threshold: session.finish_threshold,
            no_battery_threshold: session.no_battery_threshold,
        }
    }

    /// Starts a fresh session in `NoBattery` with the output probing at open-circuit levels.
    pub fn start<IO: ChargerIo + ?Sized>(&mut self, io: &mut IO) {
        self.session = ChargeSession::new();
        self.apply_precharge();
        io.set_output_enabled(true);
    }

    /// Restores a persisted state code; unknown codes reinitialize the session.
    pub fn restore_state<IO: ChargerIo + ?Sized>(&mut self, raw: u8, io: &mut IO) -> ChargeState {
        match ChargeState::from_raw(raw) {
            Some(state) => self.session.enter(state),
            None => self.start(io),
        }
        self.session.state
    }

    /// Replaces the profile and restarts the session.
    pub fn select_profile<IO: ChargerIo + ?Sized>(&mut self, profile: ChargeProfile, io: &mut IO) {
        self.profile = profile;
        self.start(io);
    }

    /// Leaves `BatteryError` after the user acknowledged it.
    pub fn acknowledge(&mut self) -> Option<Evaluation> {
        if self.session.state != ChargeState::BatteryError {
            return None;
        }
        self.session.enter(ChargeState::MeasuringVoltage);
        Some(Evaluation::to(ChargeState::MeasuringVoltage))
    }

    /// Live charge current edit, clamped to the profile's editor range.
    pub fn set_charge_current(&mut self, current: u16) -> u16 {
        let applied = self.profile.set_charge_current(current);
        self.refresh_charge_targets();
        applied
    }

    /// Live digit-wise charge current edit.
    pub fn adjust_charge_current_digit(&mut self, digit: u8, delta: i8) -> u16 {
        let applied = self.profile.adjust_charge_current_digit(digit, delta);
        self.refresh_charge_targets();
        applied
    }

    /// Switches between CCC and CC/CV charging; returns `true` when CCC is now active.
    pub fn set_ccc_mode(&mut self, enabled: bool) -> bool {
        if enabled {
            self.profile.options.insert(ProfileOptions::CCC_MODE);
        } else {
            self.profile.options.remove(ProfileOptions::CCC_MODE);
        }
        self.refresh_charge_targets();
        self.profile.ccc_mode()
    }

    pub fn toggle_ccc_mode(&mut self) -> bool {
        let enabled = !self.profile.ccc_mode();
        self.set_ccc_mode(enabled)
    }

    /// Runs one evaluation and applies its outcome to the session.
    pub fn poll<IO, P>(
        &mut self,
        elapsed_ticks: u16,
        input: PollInput,
        io: &mut IO,
        port: &mut P,
    ) -> Evaluation
    where
        IO: ChargerIo + ?Sized,
        P: BatteryPort + ?Sized,
    {
        self.session.ticks = self.session.ticks.saturating_add(elapsed_ticks);
        self.session.smoothed = self.session.smoothing.smooth(input.measured);

        let evaluation = self.evaluate(input, io, port);
        match evaluation.outcome {
            Outcome::NoChange => {}
            Outcome::ResetTicks => self.session.ticks = 0,
            Outcome::Transition(state) => self.session.enter(state),
        }

        if self.session.state.is_charge_phase() {
            self.session.bar.advance(elapsed_ticks, self.session.pixels);
        }

        evaluation
    }

    fn evaluate<IO, P>(&mut self, input: PollInput, io: &mut IO, port: &mut P) -> Evaluation
    where
        IO: ChargerIo + ?Sized,
        P: BatteryPort + ?Sized,
    {
        match self.session.state {
            ChargeState::NoBattery => self.no_battery(input, io, port),
            ChargeState::InvalidBattery => self.invalid_battery(input.measured.voltage, io),
            ChargeState::InvalidBatteryRecovering => self.recovering(input.measured.voltage),
            ChargeState::MeasuringVoltage => self.measuring(input.measured.voltage, io),
            ChargeState::Charging => self.charging(input.measured, io, port),
            ChargeState::ChargeComplete => self.complete(input.measured.voltage, io),
            ChargeState::BatteryError => Evaluation::NO_CHANGE,
        }
    }

    fn no_battery<IO, P>(&mut self, input: PollInput, io: &mut IO, port: &mut P) -> Evaluation
    where
        IO: ChargerIo + ?Sized,
        P: BatteryPort + ?Sized,
    {
        if self.session.ticks < NO_BATTERY_DEBOUNCE_TICKS {
            return Evaluation::NO_CHANGE;
        }

        if self.profile.uses_alternate_protocol() {
            return match self.session.makita.check_presence(port) {
                PresenceStep::Absent => Evaluation::RESET_TICKS,
                PresenceStep::Pending(_) => Evaluation::NO_CHANGE,
                PresenceStep::Confirmed => {
                    io.set_output_enabled(false);
                    self.session.makita.read_battery_message(port);
                    self.start_charge(io);
                    Evaluation::to(ChargeState::MeasuringVoltage)
                }
            };
        }

        let voltage = input.measured.voltage;
        let previous = self.session.previous_voltage;
        self.session.previous_voltage = voltage;
        if voltage.abs_diff(previous) > STABILITY_WINDOW_MV {
            return Evaluation::RESET_TICKS;
        }

        if input.regulation != RegulationMode::ConstantCurrent
            && voltage.saturating_sub(self.profile.open_voltage) < DETECT_MARGIN_MV
        {
            return Evaluation::RESET_TICKS;
        }

        if self.session.ticks < DETECT_TICKS {
            return Evaluation::NO_CHANGE;
        }

        io.set_output_enabled(false);
        if voltage > self.profile.charge_voltage || voltage < self.profile.min_battery_voltage {
            io.play_sound(self.sounds.bad_battery);
            return Evaluation::to(ChargeState::InvalidBattery);
        }

        self.start_charge(io);
        Evaluation::to(ChargeState::MeasuringVoltage)
    }

    fn invalid_battery<IO: ChargerIo + ?Sized>(&mut self, voltage: u16, io: &mut IO) -> Evaluation {
        let still_present = voltage >= INVALID_REMOVAL_FLOOR_MV
            && self.session.previous_voltage.saturating_sub(voltage) < INVALID_DROP_MV;
        if still_present {
            return Evaluation::RESET_TICKS;
        }

        if self.session.ticks < INVALID_WAIT_TICKS {
            return Evaluation::NO_CHANGE;
        }

        io.set_output_enabled(true);
        Evaluation::to_quietly(ChargeState::InvalidBatteryRecovering)
    }

    fn recovering(&mut self, voltage: u16) -> Evaluation {
        if voltage.abs_diff(self.profile.open_voltage) > RECOVER_WINDOW_MV {
            return Evaluation::RESET_TICKS;
        }

        if self.session.ticks < RECOVER_TICKS {
            return Evaluation::NO_CHANGE;
        }

        self.session.previous_voltage = voltage;
        Evaluation::to(ChargeState::NoBattery)
    }

    fn measuring<IO: ChargerIo + ?Sized>(&mut self, voltage: u16, io: &mut IO) -> Evaluation {
        if self.session.ticks < MEASURE_SETTLE_TICKS {
            return Evaluation::NO_CHANGE;
        }

        self.session.percent = charge_percent(&self.profile, voltage);
        self.session.pixels = percent_to_pixels(self.session.percent);

        if self.profile.ccc_mode() && voltage >= self.profile.charge_voltage {
            io.play_sound(self.sounds.charge_end);
            self.session.previous_voltage = voltage;
            return Evaluation::to(ChargeState::ChargeComplete);
        }

        io.set_output_enabled(true);
        self.session.can_finish = true;
        Evaluation::to_quietly(ChargeState::Charging)
    }

    fn charging<IO, P>(&mut self, measured: Measurements, io: &mut IO, port: &mut P) -> Evaluation
    where
        IO: ChargerIo + ?Sized,
        P: BatteryPort + ?Sized,
    {
        if self.session.ticks < CHARGE_IGNORE_TICKS {
            return Evaluation::NO_CHANGE;
        }

        if self.session.ticks >= REMEASURE_TICKS {
            io.set_output_enabled(false);
            if self.profile.ccc_mode() || !self.session.can_finish {
                return Evaluation::to_quietly(ChargeState::MeasuringVoltage);
            }
            io.play_sound(self.sounds.charge_end);
            self.session.previous_voltage = measured.voltage;
            return Evaluation::to(ChargeState::ChargeComplete);
        }

        if measured.current >= self.session.finish_threshold {
            self.session.can_finish = false;
        }

        if self.profile.uses_alternate_protocol() {
            return match self.session.makita.watch_status(port) {
                StatusStep::Normal | StatusStep::Debouncing(_) => Evaluation::NO_CHANGE,
                StatusStep::Fault => {
                    io.set_output_enabled(false);
                    io.play_sound(self.sounds.battery_error);
                    Evaluation::to(ChargeState::BatteryError)
                }
                StatusStep::Removed => self.battery_removed(io, self.sounds.charge_interrupted),
            };
        }

        if self.session.smoothed.current < self.session.no_battery_threshold {
            self.session.no_battery_count = self.session.no_battery_count.saturating_add(1);
            if self.session.no_battery_count >= REMOVAL_POLLS {
                return self.battery_removed(io, self.sounds.charge_interrupted);
            }
        } else {
            self.session.no_battery_count = 0;
        }

        Evaluation::NO_CHANGE
    }

    fn complete<IO: ChargerIo + ?Sized>(&mut self, voltage: u16, io: &mut IO) -> Evaluation {
        if voltage >= self.profile.restart_voltage {
            self.session.previous_voltage = voltage;
            return Evaluation::RESET_TICKS;
        }

        if self.session.ticks < COMPLETE_WAIT_TICKS {
            return Evaluation::NO_CHANGE;
        }

        if self.session.previous_voltage.saturating_sub(voltage) > REMOVAL_DROP_MV {
            self.apply_precharge();
            io.set_output_enabled(true);
            io.stop_sound();
            self.session.previous_voltage = voltage;
            return Evaluation::to(ChargeState::NoBattery);
        }

        if self.profile.auto_restart() {
            self.start_charge(io);
            return Evaluation::to(ChargeState::MeasuringVoltage);
        }

        Evaluation::RESET_TICKS
    }

    fn battery_removed<IO: ChargerIo + ?Sized>(&mut self, io: &mut IO, sound: SoundId) -> Evaluation {
        self.apply_precharge();
        io.set_output_enabled(true);
        io.play_sound(sound);
        Evaluation::to(ChargeState::NoBattery)
    }

    fn start_charge<IO: ChargerIo + ?Sized>(&mut self, io: &mut IO) {
        io.reset_time_and_capacity();
        self.apply_working_charge();
        self.session.bar = ChargeBar::new();
        io.play_sound(self.sounds.charge_start);
    }

    fn apply_precharge(&mut self) {
        let precharge = setpoints::precharge(&self.profile, self.calibration);
        self.session.target = precharge.target;
        self.session.open_current_corrected = precharge.open_current_corrected;
    }

    fn apply_working_charge(&mut self) {
        let charge = setpoints::working_charge(
            &self.profile,
            self.calibration,
            self.session.open_current_corrected,
        );
        self.session.target = charge.target;
        self.session.finish_threshold = charge.finish_threshold;
        self.session.no_battery_threshold = charge.no_battery_threshold;
    }

    fn refresh_charge_targets(&mut self) {
        if self.session.state.is_charge_phase() {
            self.apply_working_charge();
        }
    }
}

/// Linear state-of-charge estimate between the min valid and the charge voltage.
#[must_use]
pub fn charge_percent(profile: &ChargeProfile, voltage: u16) -> u8 {
    let span = profile.charge_voltage.saturating_sub(profile.min_battery_voltage);
    if span == 0 {
        return 100;
    }
    let above = voltage
        .saturating_sub(profile.min_battery_voltage)
        .min(span);
    let percent = u32::from(above) * 100 / u32::from(span);
    u8::try_from(percent).unwrap_or(100)
}

#[must_use]
pub fn percent_to_pixels(percent: u8) -> u8 {
    let pixels = u16::from(percent.min(100)) * u16::from(BAR_PIXELS) / 100;
    u8::try_from(pixels).unwrap_or(BAR_PIXELS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile;
    use makita::DisconnectedPort;

    #[derive(Default)]
    struct NullIo {
        output: bool,
        resets: u8,
    }

    impl ChargerIo for NullIo {
        fn set_output_enabled(&mut self, enabled: bool) {
            self.output = enabled;
        }

        fn play_sound(&mut self, _sound: SoundId) {}

        fn stop_sound(&mut self) {}

        fn reset_time_and_capacity(&mut self) {
            self.resets += 1;
        }
    }

    fn charger(index: usize) -> Charger {
        Charger::new(
            profile::builtin(index),
            ChannelCalibration::DEFAULT,
            SoundMap::DEFAULT,
        )
    }

    #[test]
    fn state_codes_round_trip() {
        for raw in 0..7 {
            let state = ChargeState::from_raw(raw).expect("known code");
            assert_eq!(state.to_raw(), raw);
        }
        assert_eq!(ChargeState::from_raw(7), None);
    }

    #[test]
    fn unknown_state_code_reinitializes() {
        let mut charger = charger(2);
        let mut io = NullIo::default();
        charger.restore_state(ChargeState::Charging.to_raw(), &mut io);
        assert_eq!(charger.state(), ChargeState::Charging);

        assert_eq!(charger.restore_state(0xEE, &mut io), ChargeState::NoBattery);
        assert!(io.output);
        assert_eq!(charger.session().ticks_in_state(), 0);
    }

    #[test]
    fn startup_debounce_ignores_everything() {
        let mut charger = charger(2);
        let mut io = NullIo::default();
        charger.start(&mut io);
        let input = PollInput {
            measured: Measurements::new(3_800, 0),
            regulation: RegulationMode::ConstantCurrent,
        };
        let evaluation = charger.poll(9, input, &mut io, &mut DisconnectedPort);
        assert_eq!(evaluation, Evaluation::NO_CHANGE);
        assert_eq!(charger.session().ticks_in_state(), 9);
    }

    #[test]
    fn percent_is_linear_and_clamped() {
        let profile = profile::builtin(2);
        assert_eq!(charge_percent(&profile, 2_000), 0);
        assert_eq!(charge_percent(&profile, 3_600), 50);
        assert_eq!(charge_percent(&profile, 5_000), 100);
        assert_eq!(percent_to_pixels(50), 39);
        assert_eq!(percent_to_pixels(100), BAR_PIXELS);
    }

    #[test]
    fn charge_bar_wraps_over_filled_width() {
        let mut bar = ChargeBar::new();
        assert_eq!(bar.offset_px(), -7);
        bar.advance(8, 10);
        assert_eq!(bar.offset_px(), -6);
        for _ in 0..100 {
            bar.advance(5, 10);
            assert!(bar.offset_px() < 10);
            assert!(bar.offset_px() >= -7);
        }
        let mut empty = ChargeBar::new();
        empty.advance(1_000, 0);
        assert!(empty.offset_px() < 0);
    }

    #[test]
    fn live_edits_only_touch_targets_while_charging() {
        let mut charger = charger(2);
        let precharge_target = charger.target();
        charger.set_charge_current(1_000);
        assert_eq!(charger.target(), precharge_target);

        let mut io = NullIo::default();
        charger.restore_state(ChargeState::Charging.to_raw(), &mut io);
        charger.set_charge_current(1_000);
        let cc_cv = charger.target();
        assert_eq!(
            cc_cv.current_raw,
            ChannelCalibration::DEFAULT.current.display_to_adc(1_000)
        );
        assert!(charger.toggle_ccc_mode());
        assert_ne!(charger.target().voltage_raw, cc_cv.voltage_raw);
    }

    #[test]
    fn acknowledge_only_leaves_battery_error() {
        let mut charger = charger(0);
        assert_eq!(charger.acknowledge(), None);
        let mut io = NullIo::default();
        charger.restore_state(ChargeState::BatteryError.to_raw(), &mut io);
        assert_eq!(
            charger.acknowledge(),
            Some(Evaluation::to(ChargeState::MeasuringVoltage))
        );
        assert_eq!(charger.state(), ChargeState::MeasuringVoltage);
    }
}
