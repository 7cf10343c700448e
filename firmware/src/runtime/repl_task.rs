use charger_core::instrument::ControlRequest;
use charger_core::profile::ChargeProfile;
use charger_core::repl::status::StatusSnapshot;
use charger_core::settings::{self, Loaded};

use super::{CONTROL_QUEUE, REPL_RX_QUEUE, REPL_TX_QUEUE, REPLY_QUEUE};
use crate::control::{ControlClient, ControlReply, SubmitError};
use crate::repl::{
    self, EventWindow, FRAME_CAPACITY, LineAssembler, MAX_EVENT_LINES, ReplBackend, ReplError,
    ReplFrame,
};
use crate::status;
use crate::store::{SharedStore, StoreCell};
use crate::telemetry::SharedTelemetry;

const PROMPT: &[u8] = b"> ";

/// Console backend wired to the firmware's shared state.
struct FirmwareBackend {
    client: ControlClient<'static>,
    store: SharedStore<'static>,
    telemetry: &'static SharedTelemetry,
}

impl ReplBackend for FirmwareBackend {
    fn snapshot(&mut self) -> StatusSnapshot {
        status::snapshot()
    }

    fn profile(&mut self, slot: usize) -> Loaded<ChargeProfile> {
        settings::load_profile(&mut self.store, slot)
    }

    fn recent_events(&mut self, window: &mut EventWindow) {
        self.telemetry.lock(|log| {
            let log = log.borrow();
            let recorder = log.recorder();
            let skip = recorder.len().saturating_sub(MAX_EVENT_LINES);
            for record in recorder.oldest_first().skip(skip) {
                if window.push(*record).is_err() {
                    break;
                }
            }
        });
    }

    async fn submit(&mut self, request: ControlRequest) -> Result<ControlReply, SubmitError> {
        self.client.submit(request).await
    }
}

#[embassy_executor::task]
pub async fn run(store: &'static StoreCell, telemetry: &'static SharedTelemetry) -> ! {
    let mut backend = FirmwareBackend {
        client: ControlClient::new(CONTROL_QUEUE.sender(), REPLY_QUEUE.receiver()),
        store: SharedStore::new(store),
        telemetry,
    };
    let incoming = REPL_RX_QUEUE.receiver();
    let mut assembler = LineAssembler::new();

    defmt::info!("repl: ready");

    loop {
        let frame = incoming.receive().await;
        for &byte in &frame {
            match assembler.push(byte) {
                Ok(None) => {}
                Ok(Some(line)) => {
                    defmt::debug!("repl: {}", line.as_str());
                    for text in repl::execute(&line, &mut backend).await {
                        send(text.as_bytes()).await;
                        send(b"\r\n").await;
                    }
                    send(PROMPT).await;
                }
                Err(err) => {
                    let message: &[u8] = match err {
                        ReplError::LineOverflow => b"ERR line too long\r\n",
                        ReplError::InvalidUtf8 => b"ERR invalid utf-8\r\n",
                    };
                    send(message).await;
                    send(PROMPT).await;
                }
            }
        }
    }
}

/// Splits `bytes` into USB-sized frames for the USB task.
async fn send(bytes: &[u8]) {
    let outgoing = REPL_TX_QUEUE.sender();
    for chunk in bytes.chunks(FRAME_CAPACITY) {
        let mut frame = ReplFrame::new();
        // Chunks never exceed the frame capacity.
        let _ = frame.extend_from_slice(chunk);
        outgoing.send(frame).await;
    }
}
