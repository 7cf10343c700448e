//! Owns the [`Instrument`]: polls the charge state machine and serves operator requests.

use charger_core::charger::{ChargeState, PollInput};
use charger_core::instrument::{ControlAck, ControlRequest, Instrument, InstrumentMode};
use charger_core::settings::LoadOutcome;
use charger_core::telemetry::TelemetryEventKind;
use embassy_time::{Duration, Ticker};

use super::{CONTROL_QUEUE, REPLY_QUEUE};
use crate::control::{ControlReply, FirmwareInstant};
use crate::hw::one_wire::{ConnectorPins, OneWireMaster};
use crate::hw::{BoardIo, LoggedSounds};
use crate::status;
use crate::store::{SharedStore, StoreCell};
use crate::telemetry::SharedTelemetry;

const POLL: Duration = Duration::from_millis(50);
/// 10 ms ticks covered by one poll.
const POLL_TICKS: u16 = 5;

#[embassy_executor::task]
pub async fn run(
    connector: ConnectorPins<'static>,
    store: &'static StoreCell,
    telemetry: &'static SharedTelemetry,
) -> ! {
    let mut store = SharedStore::new(store);
    let mut io = BoardIo::new(LoggedSounds);
    let mut port = OneWireMaster::new(connector);
    let requests = CONTROL_QUEUE.receiver();
    let replies = REPLY_QUEUE.sender();

    let (mut instrument, report) = Instrument::load(&mut store);
    let now = FirmwareInstant::now();
    telemetry.lock(|log| {
        let mut log = log.borrow_mut();
        if report.settings == LoadOutcome::Defaulted {
            log.event(TelemetryEventKind::SettingsDefaulted, now);
        }
        log.profile_selected(instrument.settings().profile_index, report.profile, now);
    });
    instrument.start(&mut io);
    publish(&instrument);

    let mut ticker = Ticker::every(POLL);
    loop {
        ticker.next().await;

        while let Ok(request) = requests.try_receive() {
            let reply = instrument.apply(request, &mut io, &mut store);
            note_reply(request, &reply, telemetry);
            replies.send(reply).await;
        }

        let from = instrument.charger().state();
        let input = PollInput {
            measured: status::calibration().to_display(status::raw_sample()),
            regulation: status::regulation(),
        };
        if let Some(to) = instrument
            .poll(POLL_TICKS, input, &mut io, &mut port)
            .and_then(|evaluation| evaluation.transition())
        {
            note_transition(&instrument, from, to, telemetry);
        }

        publish(&instrument);
    }
}

fn note_reply(request: ControlRequest, reply: &ControlReply, telemetry: &SharedTelemetry) {
    let Ok(ack) = reply else {
        return;
    };
    let now = FirmwareInstant::now();
    telemetry.lock(|log| {
        let mut log = log.borrow_mut();
        match *ack {
            ControlAck::ProfileSelected { index, outcome } => {
                log.profile_selected(index, outcome, now);
            }
            ControlAck::PowerSupplyEntered(_) => {
                log.event(TelemetryEventKind::PowerSupplyEntered, now);
            }
            ControlAck::ChargerEntered => {
                log.event(TelemetryEventKind::ChargerEntered, now);
            }
            ControlAck::ChargeModeSet(_)
            | ControlAck::ChargeCurrentSet(_)
            | ControlAck::Acknowledged { .. }
            | ControlAck::SupplyOutput(_) => {}
        }
    });
    if request == ControlRequest::Acknowledge {
        status::request_clear_latched();
    }
}

fn note_transition(
    instrument: &Instrument,
    from: ChargeState,
    to: ChargeState,
    telemetry: &SharedTelemetry,
) {
    let now = FirmwareInstant::now();
    let charger = instrument.charger();
    let message_read = from == ChargeState::NoBattery
        && charger.profile().uses_alternate_protocol()
        && charger.battery_message().is_some();
    telemetry.lock(|log| {
        let mut log = log.borrow_mut();
        log.transition(from, to, now);
        if message_read {
            log.event(TelemetryEventKind::BatteryMessageRead, now);
        }
    });
}

/// Copies what the tick task and the console read into the status words.
fn publish(instrument: &Instrument) {
    let settings = instrument.settings();
    status::record_target(instrument.target());
    status::record_calibration(settings.calibration);
    status::record_profile(settings.profile_index, instrument.charge_mode());
    match instrument.mode() {
        InstrumentMode::Charger => {
            let charger = instrument.charger();
            status::record_charge_state(Some(charger.state()));
            status::record_percent(charger.status().percent);
        }
        InstrumentMode::PowerSupply => {
            status::record_charge_state(None);
            status::record_percent(0);
        }
    }
}
