//! Operator console on USB CDC.
//!
//! Bytes from the host are assembled into lines, parsed with the shared
//! `charger-core` grammar and answered with a short list of text lines.
//! Requests that change the instrument go to the charger task; everything
//! read-only is served from the shared status words, store and telemetry.

use core::fmt::Write as _;
use core::future::Future;
use core::str;

use charger_core::instrument::ControlRequest;
use charger_core::profile::{ChargeProfile, PROFILE_SLOTS};
use charger_core::repl::catalog;
use charger_core::repl::commands::{control_request, write_ack};
use charger_core::repl::grammar::{self, Command, HelpCommand, ProfileCommand};
use charger_core::repl::status::{StatusFormatter, StatusSnapshot, write_profile_line};
use charger_core::settings::Loaded;
use charger_core::telemetry::TelemetryRecord;
use embassy_sync::channel::Channel;
use heapless::{String, Vec};

use crate::control::{ControlMutex, ControlReply, FirmwareInstant, SubmitError};

/// Maximum number of bytes accepted on a single line (excluding terminator).
pub const MAX_LINE_LEN: usize = 96;
pub const RESPONSE_LINE_LEN: usize = 112;
pub const MAX_RESPONSE_LINES: usize = 16;
/// Telemetry records shown by `events`, newest last.
pub const MAX_EVENT_LINES: usize = MAX_RESPONSE_LINES - 1;

pub type ResponseLine = String<RESPONSE_LINE_LEN>;
pub type Response = Vec<ResponseLine, MAX_RESPONSE_LINES>;
pub type EventWindow = Vec<TelemetryRecord<FirmwareInstant>, MAX_EVENT_LINES>;

/// One USB packet worth of console bytes.
pub const FRAME_CAPACITY: usize = 64;
pub const FRAME_QUEUE_DEPTH: usize = 8;

pub type ReplFrame = Vec<u8, FRAME_CAPACITY>;
pub type ReplFrameQueue = Channel<ControlMutex, ReplFrame, FRAME_QUEUE_DEPTH>;

/// Errors surfaced while assembling a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplError {
    InvalidUtf8,
    LineOverflow,
}

/// Collects bytes until a line terminator arrives.
#[derive(Default)]
pub struct LineAssembler {
    buffer: Vec<u8, MAX_LINE_LEN>,
    overflowed: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            overflowed: false,
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }

    /// Feeds one byte; returns a completed, non-empty line.
    ///
    /// # Errors
    ///
    /// An overlong or non-UTF-8 line is reported once, at its terminator.
    pub fn push(&mut self, byte: u8) -> Result<Option<String<MAX_LINE_LEN>>, ReplError> {
        match byte {
            b'\r' | b'\n' => {
                let overflowed = self.overflowed;
                let line = str::from_utf8(&self.buffer)
                    .map_err(|_| ReplError::InvalidUtf8)
                    .map(|text| {
                        let mut line = String::new();
                        // Capacity matches the buffer.
                        let _ = line.push_str(text.trim());
                        line
                    });
                self.clear();
                if overflowed {
                    return Err(ReplError::LineOverflow);
                }
                line.map(|line| (!line.is_empty()).then_some(line))
            }
            0x08 | 0x7f => {
                self.buffer.pop();
                Ok(None)
            }
            value => {
                if self.buffer.push(value).is_err() {
                    self.overflowed = true;
                }
                Ok(None)
            }
        }
    }
}

/// What the console needs from the rest of the firmware.
pub trait ReplBackend {
    fn snapshot(&mut self) -> StatusSnapshot;

    fn profile(&mut self, slot: usize) -> Loaded<ChargeProfile>;

    /// Fills `window` with the most recent telemetry, oldest first.
    fn recent_events(&mut self, window: &mut EventWindow);

    fn submit(
        &mut self,
        request: ControlRequest,
    ) -> impl Future<Output = Result<ControlReply, SubmitError>>;
}

/// Runs one console line and returns the text to send back.
pub async fn execute<B: ReplBackend>(line: &str, backend: &mut B) -> Response {
    let mut response = Response::new();
    let command = match grammar::parse(line) {
        Ok(command) => command,
        Err(err) => {
            push_fmt(&mut response, format_args!("ERR syntax {err}"));
            return response;
        }
    };

    if let Some(request) = control_request(&command) {
        match backend.submit(request).await {
            Ok(Ok(ack)) => {
                let mut text = ResponseLine::new();
                if write_ack(&mut text, &ack).is_err() {
                    text.clear();
                    let _ = text.push_str("OK");
                }
                push_line(&mut response, text);
            }
            Ok(Err(err)) => push_fmt(&mut response, format_args!("ERR {err}")),
            Err(SubmitError::Busy) => push_fmt(&mut response, format_args!("ERR busy")),
        }
        return response;
    }

    match command {
        Command::Status => write_status(&backend.snapshot(), &mut response),
        Command::Help(HelpCommand { topic }) => write_help(topic, &mut response),
        Command::Profile(ProfileCommand::Show) => {
            let index = backend.snapshot().profile_index;
            let loaded = backend.profile(usize::from(index));
            write_profile(&mut response, ' ', index, &loaded.value);
        }
        Command::Profile(ProfileCommand::List) => {
            let active = backend.snapshot().profile_index;
            for slot in 0..PROFILE_SLOTS {
                let Ok(index) = u8::try_from(slot) else {
                    break;
                };
                let loaded = backend.profile(slot);
                let marker = if index == active { '*' } else { ' ' };
                write_profile(&mut response, marker, index, &loaded.value);
            }
        }
        Command::Events => {
            let mut window = EventWindow::new();
            backend.recent_events(&mut window);
            if window.is_empty() {
                push_fmt(&mut response, format_args!("no events recorded"));
            }
            for record in &window {
                push_fmt(
                    &mut response,
                    format_args!(
                        "#{} +{}ms {} {}",
                        record.id,
                        record.timestamp.into_embassy().as_millis(),
                        record.event,
                        record.details
                    ),
                );
            }
        }
        Command::Battery(_) | Command::Wait(_) => {
            let name = line.split_whitespace().next().unwrap_or(line);
            push_fmt(
                &mut response,
                format_args!("ERR `{name}` only runs in the emulator"),
            );
        }
        Command::Profile(ProfileCommand::Select(_))
        | Command::Mode(_)
        | Command::Current(_)
        | Command::Ack
        | Command::Supply(_) => {}
    }
    response
}

fn write_status(snapshot: &StatusSnapshot, response: &mut Response) {
    let formatter = StatusFormatter::new(snapshot);
    render(response, |line| formatter.write_mode_line(line));
    render(response, |line| formatter.write_output_line(line));
    render(response, |line| formatter.write_session_line(line));
    render(response, |line| formatter.write_failures_line(line));
}

fn render(
    response: &mut Response,
    write: impl FnOnce(&mut ResponseLine) -> core::fmt::Result,
) {
    let mut line = ResponseLine::new();
    if write(&mut line).is_ok() {
        push_line(response, line);
    }
}

fn write_help(topic: Option<&str>, response: &mut Response) {
    match topic {
        Some(name) => match catalog::find(name) {
            Some(spec) => push_fmt(response, format_args!("{} - {}", spec.usage, spec.summary)),
            None => push_fmt(response, format_args!("No help available for `{name}`.")),
        },
        None => {
            for spec in catalog::commands().iter().filter(|spec| !spec.host_only) {
                push_fmt(response, format_args!("{} - {}", spec.usage, spec.summary));
            }
        }
    }
}

fn write_profile(response: &mut Response, marker: char, index: u8, profile: &ChargeProfile) {
    render(response, |line| {
        line.write_char(marker)?;
        write_profile_line(line, index, profile)
    });
}

fn push_fmt(response: &mut Response, args: core::fmt::Arguments<'_>) {
    let mut line = ResponseLine::new();
    // Overlong lines are cut at capacity.
    let _ = line.write_fmt(args);
    push_line(response, line);
}

fn push_line(response: &mut Response, line: ResponseLine) {
    // Extra lines beyond the response window are dropped.
    let _ = response.push(line);
}
