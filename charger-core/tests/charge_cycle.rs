use charger_core::charger::makita::DisconnectedPort;
use charger_core::charger::{ChargeState, Charger, ChargerIo, Evaluation, Outcome, PollInput};
use charger_core::failure::RegulationMode;
use charger_core::measurement::{ChannelCalibration, Measurements};
use charger_core::profile::{self, ChargeProfile, ProfileOptions};
use charger_core::settings::{SoundId, SoundMap};
use charger_core::setpoints;
use heapless::Vec as HeaplessVec;

/// Ticks between charger polls, matching the 50 ms main-loop cadence.
const POLL_TICKS: u16 = 5;
/// "Li-Ion 1S": open 4.70 V, charge 4.20 V, min 3.00 V, restart 4.10 V.
const ONE_CELL: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoEvent {
    Output(bool),
    Sound(SoundId),
    StopSound,
    ResetCounters,
}

#[derive(Default)]
struct RecordingIo {
    events: HeaplessVec<IoEvent, 32>,
    output: bool,
}

impl RecordingIo {
    fn push(&mut self, event: IoEvent) {
        self.events.push(event).expect("io log full");
    }

    fn played(&self, sound: SoundId) -> bool {
        self.events.contains(&IoEvent::Sound(sound))
    }
}

impl ChargerIo for RecordingIo {
    fn set_output_enabled(&mut self, enabled: bool) {
        self.output = enabled;
        self.push(IoEvent::Output(enabled));
    }

    fn play_sound(&mut self, sound: SoundId) {
        self.push(IoEvent::Sound(sound));
    }

    fn stop_sound(&mut self) {
        self.push(IoEvent::StopSound);
    }

    fn reset_time_and_capacity(&mut self) {
        self.push(IoEvent::ResetCounters);
    }
}

struct Bench {
    charger: Charger,
    io: RecordingIo,
}

impl Bench {
    fn new(index: usize) -> Self {
        Self::with_profile(profile::builtin(index))
    }

    fn with_profile(profile: ChargeProfile) -> Self {
        let mut bench = Self {
            charger: Charger::new(profile, ChannelCalibration::DEFAULT, SoundMap::DEFAULT),
            io: RecordingIo::default(),
        };
        bench.charger.start(&mut bench.io);
        bench
    }

    fn poll(&mut self, voltage: u16, current: u16, regulation: RegulationMode) -> Evaluation {
        self.poll_for(POLL_TICKS, voltage, current, regulation)
    }

    fn poll_for(
        &mut self,
        elapsed: u16,
        voltage: u16,
        current: u16,
        regulation: RegulationMode,
    ) -> Evaluation {
        let input = PollInput {
            measured: Measurements::new(voltage, current),
            regulation,
        };
        self.charger
            .poll(elapsed, input, &mut self.io, &mut DisconnectedPort)
    }

    /// Polls with a steady input until the state changes or `max_polls` runs out.
    fn poll_until_transition(
        &mut self,
        voltage: u16,
        current: u16,
        regulation: RegulationMode,
        max_polls: usize,
    ) -> Option<ChargeState> {
        (0..max_polls).find_map(|_| self.poll(voltage, current, regulation).transition())
    }

    fn state(&self) -> ChargeState {
        self.charger.state()
    }

    /// Drives a fresh session into `Charging` with a 3.8 V battery.
    fn charging(index: usize) -> Self {
        let mut bench = Self::new(index);
        assert_eq!(
            bench.poll_until_transition(3_800, 1_500, RegulationMode::ConstantCurrent, 20),
            Some(ChargeState::MeasuringVoltage)
        );
        assert_eq!(
            bench.poll_until_transition(3_800, 0, RegulationMode::Off, 5),
            Some(ChargeState::Charging)
        );
        for _ in 0..2 {
            bench.poll(3_900, 1_500, RegulationMode::ConstantCurrent);
        }
        assert_eq!(bench.state(), ChargeState::Charging);
        bench
    }
}

/// Ramps 0 V to 4.9 V over 600 ms, then holds it.
fn overvoltage_ramp(bench: &mut Bench) {
    for step in 0..=12u32 {
        let voltage = u16::try_from(4_900 * step / 12).expect("fits");
        bench.poll(voltage, 0, RegulationMode::ConstantVoltage);
    }
    for _ in 0..20 {
        bench.poll(4_900, 0, RegulationMode::ConstantVoltage);
    }
}

/// A 4.9 V pack held in `InvalidBattery`, detected at 4.9 V.
fn invalid_bench() -> Bench {
    let mut bench = Bench::new(ONE_CELL);
    overvoltage_ramp(&mut bench);
    assert_eq!(bench.state(), ChargeState::InvalidBattery);
    assert_eq!(bench.charger.session().previous_voltage(), 4_900);
    bench
}

/// The invalid pack was pulled; the output is back on at open-circuit levels.
fn recovering_bench() -> Bench {
    let mut bench = invalid_bench();
    assert_eq!(
        bench.poll_until_transition(4_500, 0, RegulationMode::Off, 25),
        Some(ChargeState::InvalidBatteryRecovering)
    );
    bench
}

#[test]
fn overvoltage_ramp_is_classified_invalid() {
    let mut bench = Bench::new(ONE_CELL);
    overvoltage_ramp(&mut bench);

    assert_eq!(bench.state(), ChargeState::InvalidBattery);
    assert!(!bench.io.output, "output must be off for an invalid battery");
    assert!(bench.io.played(SoundMap::DEFAULT.bad_battery));
    assert!(!bench.io.events.contains(&IoEvent::ResetCounters));
}

#[test]
fn ramp_alone_does_not_classify() {
    let mut bench = Bench::new(ONE_CELL);
    for step in 0..=12u32 {
        let voltage = u16::try_from(4_900 * step / 12).expect("fits");
        let evaluation = bench.poll(voltage, 0, RegulationMode::ConstantVoltage);
        assert_eq!(evaluation.transition(), None);
    }
    assert_eq!(bench.state(), ChargeState::NoBattery);
}

#[test]
fn invalid_battery_holds_while_the_pack_stays() {
    let mut bench = invalid_bench();

    // Up to 299 mV under the detection voltage, or above it, is the same pack.
    for voltage in [4_900, 4_650, 4_601, 5_000].into_iter().cycle().take(40) {
        assert_eq!(
            bench.poll(voltage, 0, RegulationMode::Off),
            Evaluation::RESET_TICKS
        );
        assert_eq!(bench.charger.session().ticks_in_state(), 0);
    }
    assert_eq!(bench.state(), ChargeState::InvalidBattery);
    assert!(!bench.io.output);
}

#[test]
fn invalid_battery_reenergizes_a_second_after_removal() {
    let mut bench = invalid_bench();

    // A 300 mV drop starts the wait; the pack reappearing restarts it.
    for _ in 0..10 {
        assert_eq!(bench.poll(4_600, 0, RegulationMode::Off), Evaluation::NO_CHANGE);
    }
    assert_eq!(bench.poll(4_800, 0, RegulationMode::Off), Evaluation::RESET_TICKS);

    for _ in 0..19 {
        assert_eq!(bench.poll(4_600, 0, RegulationMode::Off), Evaluation::NO_CHANGE);
    }
    assert_eq!(bench.charger.session().ticks_in_state(), 95);
    assert!(!bench.io.output);

    let evaluation = bench.poll(4_600, 0, RegulationMode::Off);
    assert_eq!(
        evaluation,
        Evaluation::to_quietly(ChargeState::InvalidBatteryRecovering)
    );
    assert!(bench.io.output, "output is re-enabled to check the connector");
}

#[test]
fn collapse_under_the_floor_counts_as_removal() {
    let mut bench = Bench::new(ONE_CELL);

    // A deeply discharged pack under CC regulation is detected below the minimum.
    assert_eq!(
        bench.poll_until_transition(250, 1_500, RegulationMode::ConstantCurrent, 14),
        Some(ChargeState::InvalidBattery)
    );
    assert!(bench.io.played(SoundMap::DEFAULT.bad_battery));

    assert_eq!(bench.poll(240, 0, RegulationMode::Off), Evaluation::RESET_TICKS);
    assert_eq!(bench.poll(190, 0, RegulationMode::Off), Evaluation::NO_CHANGE);
}

#[test]
fn recovering_needs_a_stable_open_voltage() {
    let mut bench = recovering_bench();

    // Open-circuit target is 4.70 V.
    for _ in 0..3 {
        assert_eq!(bench.poll(4_700, 0, RegulationMode::ConstantVoltage), Evaluation::NO_CHANGE);
    }
    assert_eq!(
        bench.poll(4_599, 0, RegulationMode::ConstantVoltage),
        Evaluation::RESET_TICKS
    );
    assert_eq!(bench.charger.session().ticks_in_state(), 0);

    for _ in 0..3 {
        assert_eq!(bench.poll(4_620, 0, RegulationMode::ConstantVoltage), Evaluation::NO_CHANGE);
    }
    assert_eq!(
        bench.poll(4_800, 0, RegulationMode::ConstantVoltage),
        Evaluation::to(ChargeState::NoBattery)
    );
    assert_eq!(bench.charger.session().previous_voltage(), 4_800);
    assert!(bench.io.output);
}

#[test]
fn valid_battery_starts_measuring_with_charge_targets() {
    let mut bench = Bench::new(ONE_CELL);

    let transition =
        bench.poll_until_transition(3_800, 1_500, RegulationMode::ConstantCurrent, 14);
    assert_eq!(transition, Some(ChargeState::MeasuringVoltage));

    let profile = profile::builtin(ONE_CELL);
    let calibration = ChannelCalibration::DEFAULT;
    let occ = setpoints::open_current_corrected(&profile, calibration);
    let expected = setpoints::working_charge(&profile, calibration, occ);

    let status = bench.charger.status();
    assert_eq!(status.target, expected.target);
    assert_eq!(status.finish_threshold, 75);
    assert_eq!(status.no_battery_threshold, 30);
    assert!(!bench.io.output, "resting voltage is measured with the output off");
    assert!(bench.io.events.contains(&IoEvent::ResetCounters));
    assert!(bench.io.played(SoundMap::DEFAULT.charge_start));
}

#[test]
fn three_low_current_polls_mean_removal() {
    let mut bench = Bench::charging(ONE_CELL);

    assert_eq!(bench.poll(4_700, 0, RegulationMode::ConstantVoltage).transition(), None);
    assert_eq!(bench.poll(4_700, 0, RegulationMode::ConstantVoltage).transition(), None);
    assert_eq!(
        bench.poll(4_700, 0, RegulationMode::ConstantVoltage).transition(),
        Some(ChargeState::NoBattery)
    );

    assert!(bench.io.output, "precharge probing resumes after removal");
    assert!(bench.io.played(SoundMap::DEFAULT.charge_interrupted));
    let profile = profile::builtin(ONE_CELL);
    let precharge = setpoints::precharge(&profile, ChannelCalibration::DEFAULT);
    assert_eq!(bench.charger.target(), precharge.target);
}

#[test]
fn two_low_polls_then_normal_keeps_charging() {
    let mut bench = Bench::charging(ONE_CELL);

    bench.poll(4_700, 0, RegulationMode::ConstantVoltage);
    bench.poll(4_700, 0, RegulationMode::ConstantVoltage);
    assert_eq!(bench.charger.session().no_battery_count(), 2);

    let evaluation = bench.poll(3_950, 1_500, RegulationMode::ConstantCurrent);
    assert_eq!(evaluation, Evaluation::NO_CHANGE);
    assert_eq!(bench.state(), ChargeState::Charging);
    assert_eq!(bench.charger.session().no_battery_count(), 0);
}

#[test]
fn quiet_polls_only_advance_ticks() {
    let mut bench = Bench::charging(ONE_CELL);

    let mut previous = bench.charger.session().ticks_in_state();
    for _ in 0..50 {
        let evaluation = bench.poll(3_950, 1_500, RegulationMode::ConstantCurrent);
        assert_eq!(evaluation.outcome, Outcome::NoChange);
        let ticks = bench.charger.session().ticks_in_state();
        assert!(ticks > previous);
        previous = ticks;
    }
}

#[test]
fn waiting_states_report_no_change() {
    let measuring = {
        let mut bench = Bench::new(ONE_CELL);
        assert_eq!(
            bench.poll_until_transition(3_800, 1_500, RegulationMode::ConstantCurrent, 20),
            Some(ChargeState::MeasuringVoltage)
        );
        bench
    };
    let cases = [
        (Bench::new(ONE_CELL), 0, 0, RegulationMode::Off),
        (invalid_bench(), 4_500, 0, RegulationMode::Off),
        (recovering_bench(), 4_700, 0, RegulationMode::ConstantVoltage),
        (measuring, 3_800, 0, RegulationMode::Off),
        (Bench::charging(ONE_CELL), 3_950, 1_500, RegulationMode::ConstantCurrent),
        (completed_ccc_bench(), 4_050, 0, RegulationMode::Off),
    ];

    for (mut bench, voltage, current, regulation) in cases {
        let state = bench.state();
        let mut previous = bench.charger.session().ticks_in_state();
        for _ in 0..5 {
            let evaluation = bench.poll_for(1, voltage, current, regulation);
            assert_eq!(evaluation.outcome, Outcome::NoChange, "{state:?}");
            let ticks = bench.charger.session().ticks_in_state();
            assert!(ticks > previous, "{state:?}");
            previous = ticks;
        }
        assert_eq!(bench.state(), state);
    }
}

#[test]
fn periodic_remeasure_returns_to_measuring() {
    let mut bench = Bench::charging(ONE_CELL);

    let transition =
        bench.poll_until_transition(4_100, 1_500, RegulationMode::ConstantCurrent, 250);
    // The current stayed above the finish threshold, so charging continues.
    assert_eq!(transition, Some(ChargeState::MeasuringVoltage));
    assert!(!bench.io.output);
}

#[test]
fn finish_after_current_falls_off() {
    let mut bench = Bench::charging(ONE_CELL);

    // CV tail: current under the 75 mA finish threshold, above the 30 mA removal threshold.
    // The first interval still saw full current, so one remeasure happens before finishing.
    let transition = bench.poll_until_transition(4_200, 50, RegulationMode::ConstantVoltage, 250);
    assert_eq!(transition, Some(ChargeState::MeasuringVoltage));
    assert_eq!(
        bench.poll_until_transition(4_200, 0, RegulationMode::Off, 5),
        Some(ChargeState::Charging)
    );

    let transition = bench.poll_until_transition(4_200, 50, RegulationMode::ConstantVoltage, 250);
    assert_eq!(transition, Some(ChargeState::ChargeComplete));
    assert!(bench.io.played(SoundMap::DEFAULT.charge_end));
    assert_eq!(bench.charger.session().previous_voltage(), 4_200);
}

fn completed_ccc_bench() -> Bench {
    let mut bench = Bench::new(ONE_CELL);
    bench.charger.set_ccc_mode(true);
    complete_at_4v2(&mut bench);
    bench
}

fn complete_at_4v2(bench: &mut Bench) {

    assert_eq!(
        bench.poll_until_transition(4_200, 1_500, RegulationMode::ConstantCurrent, 14),
        Some(ChargeState::MeasuringVoltage)
    );
    assert_eq!(
        bench.poll_until_transition(4_200, 0, RegulationMode::Off, 5),
        Some(ChargeState::ChargeComplete)
    );
    assert_eq!(bench.charger.session().previous_voltage(), 4_200);
}

#[test]
fn ccc_mode_completes_from_the_resting_voltage() {
    let bench = completed_ccc_bench();
    assert!(bench.io.played(SoundMap::DEFAULT.charge_end));
    assert!(!bench.io.output);
}

#[test]
fn rise_above_restart_resets_the_completion_wait() {
    let mut bench = completed_ccc_bench();

    for _ in 0..20 {
        assert_eq!(
            bench.poll(4_000, 0, RegulationMode::Off),
            Evaluation::NO_CHANGE
        );
    }
    assert_eq!(bench.charger.session().ticks_in_state(), 100);

    let evaluation = bench.poll(4_150, 0, RegulationMode::Off);
    assert_eq!(evaluation, Evaluation::RESET_TICKS);
    assert_eq!(bench.charger.session().ticks_in_state(), 0);
    assert_eq!(bench.charger.session().previous_voltage(), 4_150);

    // A resting voltage 70 mV under the new baseline is not a removal.
    for _ in 0..60 {
        bench.poll(4_080, 0, RegulationMode::Off);
        assert_eq!(bench.state(), ChargeState::ChargeComplete);
    }
}

#[test]
fn voltage_collapse_after_completion_means_removal() {
    let mut bench = completed_ccc_bench();

    let transition = bench.poll_until_transition(0, 0, RegulationMode::Off, 40);
    assert_eq!(transition, Some(ChargeState::NoBattery));
    assert!(bench.io.output);
    assert!(bench.io.events.contains(&IoEvent::StopSound));
}

#[test]
fn auto_restart_recharges_a_resting_pack() {
    let mut profile = profile::builtin(ONE_CELL);
    profile
        .options
        .insert(ProfileOptions::CCC_MODE | ProfileOptions::AUTO_RESTART);
    let mut bench = Bench::with_profile(profile.clone());
    complete_at_4v2(&mut bench);

    // New baseline above the 4.10 V restart level, then a 70 mV sag below it.
    assert_eq!(bench.poll(4_150, 0, RegulationMode::Off), Evaluation::RESET_TICKS);
    bench.io.events.clear();
    for _ in 0..29 {
        assert_eq!(bench.poll(4_080, 0, RegulationMode::Off), Evaluation::NO_CHANGE);
    }
    assert!(bench.io.events.is_empty());

    assert_eq!(
        bench.poll(4_080, 0, RegulationMode::Off),
        Evaluation::to(ChargeState::MeasuringVoltage)
    );
    assert!(bench.io.events.contains(&IoEvent::ResetCounters));
    assert!(bench.io.played(SoundMap::DEFAULT.charge_start));
    assert_eq!(bench.charger.session().ticks_in_state(), 0);

    let calibration = ChannelCalibration::DEFAULT;
    let occ = setpoints::open_current_corrected(&profile, calibration);
    let expected = setpoints::working_charge(&profile, calibration, occ);
    assert_eq!(bench.charger.target(), expected.target);
}

#[test]
fn resting_pack_without_auto_restart_keeps_waiting() {
    let mut bench = completed_ccc_bench();

    assert_eq!(bench.poll(4_150, 0, RegulationMode::Off), Evaluation::RESET_TICKS);
    for _ in 0..29 {
        assert_eq!(bench.poll(4_080, 0, RegulationMode::Off), Evaluation::NO_CHANGE);
    }
    assert_eq!(bench.poll(4_080, 0, RegulationMode::Off), Evaluation::RESET_TICKS);
    assert_eq!(bench.state(), ChargeState::ChargeComplete);
}
