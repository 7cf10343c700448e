#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! The tick interrupt, the charger task and the REPL run at different rates.
//! Packed atomic words carry readings, targets and counters between them so
//! `status` can build a [`StatusSnapshot`] without locking the instrument.

use charger_core::charger::ChargeState;
use charger_core::counters::{ElapsedTime, SessionCounters};
use charger_core::failure::{FailureFlags, OutputDirective, RegulationMode};
use charger_core::instrument::{ChargeMode, InstrumentMode};
use charger_core::measurement::{ChannelCalibration, RawSample};
use charger_core::repl::status::StatusSnapshot;
use charger_core::setpoints::RegulationTarget;
use portable_atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

const NO_STATE: u8 = u8::MAX;

/// Latest averaged ADC sample (voltage << 16 | current).
static RAW_SAMPLE: AtomicU32 = AtomicU32::new(0);
/// Regulation target handed to the PID loop, same packing as [`RAW_SAMPLE`].
static TARGET: AtomicU32 = AtomicU32::new(0);
/// Mode the regulator reports (CC flag while enabled).
static REGULATION: AtomicU8 = AtomicU8::new(0);
/// Last monitor directive: bit 7 relay closed, low bits the regulation mode.
static DIRECTIVE: AtomicU8 = AtomicU8::new(0);
static OUTPUT_REQUESTED: AtomicBool = AtomicBool::new(false);
static POWER_GOOD: AtomicBool = AtomicBool::new(false);
static FAILURES: AtomicU8 = AtomicU8::new(0);
/// Set by the charger task, consumed by the next tick.
static COUNTER_RESET: AtomicBool = AtomicBool::new(false);
/// Set after an operator acknowledgment, consumed by the next tick.
static CLEAR_LATCHED: AtomicBool = AtomicBool::new(false);
static ELAPSED_SECONDS: AtomicU32 = AtomicU32::new(0);
static CAPACITY_MAH: AtomicU32 = AtomicU32::new(0);
/// Charger state as [`ChargeState::to_raw`], or `NO_STATE` in supply mode.
static CHARGE_STATE: AtomicU8 = AtomicU8::new(NO_STATE);
static PROFILE_INDEX: AtomicU8 = AtomicU8::new(0);
static CCC_MODE: AtomicBool = AtomicBool::new(false);
static PERCENT: AtomicU8 = AtomicU8::new(0);
/// Calibration in effect, packed as offset << 16 | scale for each channel.
static VOLTAGE_CAL: AtomicU32 = AtomicU32::new(pack_calibration(ChannelCalibration::DEFAULT.voltage));
static CURRENT_CAL: AtomicU32 = AtomicU32::new(pack_calibration(ChannelCalibration::DEFAULT.current));

#[allow(clippy::cast_sign_loss)]
const fn pack_calibration(calibration: charger_core::measurement::Calibration) -> u32 {
    ((calibration.offset as u16 as u32) << 16) | calibration.scale_x4096 as u32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
const fn unpack_calibration(word: u32) -> charger_core::measurement::Calibration {
    charger_core::measurement::Calibration::new((word >> 16) as u16 as i16, (word & 0xFFFF) as u16)
}

/// Publishes a fresh averaged sample.
pub fn record_sample(sample: RawSample) {
    RAW_SAMPLE.store(sample.pack(), Ordering::Relaxed);
}

pub fn raw_sample() -> RawSample {
    RawSample::unpack(RAW_SAMPLE.load(Ordering::Relaxed))
}

pub fn record_target(target: RegulationTarget) {
    TARGET.store(target.pack(), Ordering::Relaxed);
}

pub fn target() -> RegulationTarget {
    RegulationTarget::unpack(TARGET.load(Ordering::Relaxed))
}

pub fn record_regulation(mode: RegulationMode) {
    REGULATION.store(mode.to_raw(), Ordering::Relaxed);
}

pub fn regulation() -> RegulationMode {
    RegulationMode::from_raw(REGULATION.load(Ordering::Relaxed))
}

const RELAY_BIT: u8 = 0x80;

pub fn record_directive(directive: OutputDirective) {
    let relay = if directive.relay_closed { RELAY_BIT } else { 0 };
    DIRECTIVE.store(relay | directive.mode.to_raw(), Ordering::Relaxed);
}

pub fn directive() -> OutputDirective {
    let word = DIRECTIVE.load(Ordering::Relaxed);
    OutputDirective {
        relay_closed: word & RELAY_BIT != 0,
        mode: RegulationMode::from_raw(word & !RELAY_BIT),
    }
}

pub fn set_output_requested(requested: bool) {
    OUTPUT_REQUESTED.store(requested, Ordering::Relaxed);
}

pub fn output_requested() -> bool {
    OUTPUT_REQUESTED.load(Ordering::Relaxed)
}

pub fn record_power_good(good: bool) {
    POWER_GOOD.store(good, Ordering::Relaxed);
}

pub fn record_failures(flags: FailureFlags) {
    FAILURES.store(flags.bits(), Ordering::Relaxed);
}

pub fn request_counter_reset() {
    COUNTER_RESET.store(true, Ordering::Relaxed);
}

/// Returns and clears a pending counter reset.
pub fn take_counter_reset() -> bool {
    COUNTER_RESET.swap(false, Ordering::Relaxed)
}

pub fn request_clear_latched() {
    CLEAR_LATCHED.store(true, Ordering::Relaxed);
}

/// Returns and clears a pending release of latched failures.
pub fn take_clear_latched() -> bool {
    CLEAR_LATCHED.swap(false, Ordering::Relaxed)
}

pub fn record_counters(counters: SessionCounters) {
    ELAPSED_SECONDS.store(counters.elapsed.total_seconds(), Ordering::Relaxed);
    CAPACITY_MAH.store(counters.capacity.milliamp_hours(), Ordering::Relaxed);
}

pub fn record_charge_state(state: Option<ChargeState>) {
    let raw = state.map_or(NO_STATE, ChargeState::to_raw);
    CHARGE_STATE.store(raw, Ordering::Relaxed);
}

pub fn record_profile(index: u8, mode: ChargeMode) {
    PROFILE_INDEX.store(index, Ordering::Relaxed);
    CCC_MODE.store(mode == ChargeMode::Ccc, Ordering::Relaxed);
}

pub fn record_percent(percent: u8) {
    PERCENT.store(percent, Ordering::Relaxed);
}

pub fn record_calibration(calibration: ChannelCalibration) {
    VOLTAGE_CAL.store(pack_calibration(calibration.voltage), Ordering::Relaxed);
    CURRENT_CAL.store(pack_calibration(calibration.current), Ordering::Relaxed);
}

pub fn calibration() -> ChannelCalibration {
    ChannelCalibration {
        voltage: unpack_calibration(VOLTAGE_CAL.load(Ordering::Relaxed)),
        current: unpack_calibration(CURRENT_CAL.load(Ordering::Relaxed)),
    }
}

fn elapsed() -> ElapsedTime {
    let total = ELAPSED_SECONDS.load(Ordering::Relaxed);
    ElapsedTime {
        ticks: 0,
        seconds: u8::try_from(total % 60).unwrap_or(0),
        minutes: u8::try_from(total / 60 % 60).unwrap_or(0),
        hours: u16::try_from(total / 3_600).unwrap_or(u16::MAX),
    }
}

/// Builds a [`StatusSnapshot`] from the stored words.
pub fn snapshot() -> StatusSnapshot {
    let calibration = calibration();
    let target = target();
    let charge_state = ChargeState::from_raw(CHARGE_STATE.load(Ordering::Relaxed));
    StatusSnapshot {
        mode: if charge_state.is_some() {
            InstrumentMode::Charger
        } else {
            InstrumentMode::PowerSupply
        },
        charge_state,
        profile_index: PROFILE_INDEX.load(Ordering::Relaxed),
        charge_mode: if CCC_MODE.load(Ordering::Relaxed) {
            ChargeMode::Ccc
        } else {
            ChargeMode::CcCv
        },
        measured: calibration.to_display(raw_sample()),
        target: calibration.to_display(RawSample::new(target.voltage_raw, target.current_raw)),
        relay_closed: directive().relay_closed,
        output_requested: output_requested(),
        regulation: regulation(),
        percent: PERCENT.load(Ordering::Relaxed),
        elapsed: elapsed(),
        capacity_mah: CAPACITY_MAH.load(Ordering::Relaxed),
        power_good: POWER_GOOD.load(Ordering::Relaxed),
        failures: FailureFlags::from_bits(FAILURES.load(Ordering::Relaxed)),
    }
}
