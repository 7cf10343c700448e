//! Operator request plumbing between the REPL and the charger task.
//!
//! The charger task owns the [`Instrument`](charger_core::instrument::Instrument);
//! everything else talks to it through the request channel and waits for the
//! matching reply.

use charger_core::instrument::{ControlAck, ControlError, ControlRequest};
use charger_core::telemetry::TelemetryInstant;
#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};
use embassy_time::Instant;

/// Depth of the request queue feeding the charger task.
pub const CONTROL_QUEUE_DEPTH: usize = 4;

#[cfg(target_os = "none")]
pub type ControlMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
pub type ControlMutex = NoopRawMutex;

/// Result handed back for each request.
pub type ControlReply = Result<ControlAck, ControlError>;

pub type ControlQueue = Channel<ControlMutex, ControlRequest, CONTROL_QUEUE_DEPTH>;
pub type ControlSender<'a> = Sender<'a, ControlMutex, ControlRequest, CONTROL_QUEUE_DEPTH>;
pub type ControlReceiver<'a> = Receiver<'a, ControlMutex, ControlRequest, CONTROL_QUEUE_DEPTH>;

pub type ReplyQueue = Channel<ControlMutex, ControlReply, 1>;
pub type ReplySender<'a> = Sender<'a, ControlMutex, ControlReply, 1>;
pub type ReplyReceiver<'a> = Receiver<'a, ControlMutex, ControlReply, 1>;

/// Embassy instant usable as a telemetry timestamp.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    /// Reads the time driver, which only exists on the target.
    #[cfg(target_os = "none")]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub const fn into_embassy(self) -> Instant {
        self.0
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> core::time::Duration {
        let delta = self.0.saturating_duration_since(earlier.0);
        core::time::Duration::from_micros(delta.as_micros())
    }
}

/// Why a request never reached the charger task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SubmitError {
    /// The queue is full; the charger task is behind.
    Busy,
}

/// REPL-side handle: one request in flight at a time.
pub struct ControlClient<'a> {
    requests: ControlSender<'a>,
    replies: ReplyReceiver<'a>,
}

impl<'a> ControlClient<'a> {
    pub const fn new(requests: ControlSender<'a>, replies: ReplyReceiver<'a>) -> Self {
        Self { requests, replies }
    }

    /// Queues `request` and waits for the charger task to answer it.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Busy`] when the queue is full.
    pub async fn submit(&mut self, request: ControlRequest) -> Result<ControlReply, SubmitError> {
        match self.requests.try_send(request) {
            Ok(()) => Ok(self.replies.receive().await),
            Err(TrySendError::Full(_)) => Err(SubmitError::Busy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charger_core::instrument::ChargeMode;
    use embassy_futures::block_on;
    use embassy_futures::join::join;

    #[test]
    fn request_round_trips_through_the_queues() {
        let requests = ControlQueue::new();
        let replies = ReplyQueue::new();
        let mut client = ControlClient::new(requests.sender(), replies.receiver());

        let charger = async {
            let request = requests.receive().await;
            assert_eq!(request, ControlRequest::SetChargeMode(ChargeMode::Ccc));
            replies.send(Ok(ControlAck::ChargeModeSet(ChargeMode::Ccc))).await;
        };
        let operator = client.submit(ControlRequest::SetChargeMode(ChargeMode::Ccc));

        let ((), reply) = block_on(join(charger, operator));
        assert_eq!(
            reply,
            Ok(Ok(ControlAck::ChargeModeSet(ChargeMode::Ccc)))
        );
    }

    #[test]
    fn full_queue_reports_busy() {
        let requests = ControlQueue::new();
        let replies = ReplyQueue::new();
        let sender = requests.sender();
        for _ in 0..CONTROL_QUEUE_DEPTH {
            sender
                .try_send(ControlRequest::Acknowledge)
                .expect("prefill should succeed");
        }

        let mut client = ControlClient::new(requests.sender(), replies.receiver());
        let result = block_on(client.submit(ControlRequest::Acknowledge));
        assert_eq!(result, Err(SubmitError::Busy));
        assert!(requests.try_receive().is_ok());
    }

    #[test]
    fn instants_measure_elapsed_time() {
        let earlier = FirmwareInstant::from(Instant::from_micros(1_000));
        let later = FirmwareInstant::from(Instant::from_micros(4_500));
        assert_eq!(
            later.saturating_duration_since(earlier),
            core::time::Duration::from_micros(3_500)
        );
        assert_eq!(
            earlier.saturating_duration_since(later),
            core::time::Duration::ZERO
        );
    }
}
