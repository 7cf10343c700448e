//! Telemetry ring plus defmt/console mirroring.
//!
//! Records live in the shared `charger-core` recorder. Every record is also
//! emitted as a log line so bring-up does not depend on the `events` command.

use core::cell::RefCell;

use charger_core::charger::ChargeState;
use charger_core::failure::FailureReport;
use charger_core::measurement::Measurements;
use charger_core::settings::LoadOutcome;
use charger_core::telemetry::{
    EventId, TelemetryEventKind, TelemetryPayload, TelemetryRecord,
    TelemetryRecorder as CoreRecorder,
};
use embassy_sync::blocking_mutex::Mutex;

use crate::control::{ControlMutex, FirmwareInstant};

/// Recorder type used by the charger task.
pub type Recorder = CoreRecorder<FirmwareInstant>;

/// Log shared by the tick, charger and console tasks.
pub type SharedTelemetry = Mutex<ControlMutex, RefCell<TelemetryLog>>;

/// Wraps the core recorder and logs what it stores.
pub struct TelemetryLog {
    recorder: Recorder,
}

impl TelemetryLog {
    pub const fn new() -> Self {
        Self {
            recorder: Recorder::new(),
        }
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn transition(&mut self, from: ChargeState, to: ChargeState, at: FirmwareInstant) {
        self.recorder.record_transition(from, to, at);
        self.emit_latest();
    }

    pub fn failures(&mut self, report: &FailureReport, measured: Measurements, at: FirmwareInstant) {
        let written = usize::from(self.recorder.record_failures(report, measured, at));
        if written == 0 {
            return;
        }
        let skip = self.recorder.len().saturating_sub(written);
        for record in self.recorder.oldest_first().skip(skip) {
            emit(record);
        }
    }

    pub fn profile_selected(&mut self, index: u8, outcome: LoadOutcome, at: FirmwareInstant) {
        self.recorder.record_profile_selected(index, outcome, at);
        self.emit_latest();
    }

    pub fn event(&mut self, event: TelemetryEventKind, at: FirmwareInstant) -> EventId {
        self.record(event, TelemetryPayload::none(), at)
    }

    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        at: FirmwareInstant,
    ) -> EventId {
        let id = self.recorder.record(event, payload, at);
        self.emit_latest();
        id
    }

    fn emit_latest(&self) {
        if let Some(record) = self.recorder.latest() {
            emit(record);
        }
    }
}

impl Default for TelemetryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "none")]
fn emit(record: &TelemetryRecord<FirmwareInstant>) {
    defmt::info!(
        "telemetry #{} t={}us {} {}",
        record.id,
        record.timestamp.into_embassy().as_micros(),
        defmt::Display2Format(&record.event),
        defmt::Display2Format(&record.details)
    );
}

#[cfg(not(target_os = "none"))]
fn emit(record: &TelemetryRecord<FirmwareInstant>) {
    println!(
        "telemetry #{} t={}us {} {}",
        record.id,
        record.timestamp.into_embassy().as_micros(),
        record.event,
        record.details
    );
}
