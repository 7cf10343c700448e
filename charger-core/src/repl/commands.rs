//! High-level REPL command dispatcher.
//!
//! Parsed commands that change the instrument become [`ControlRequest`]s and
//! go through an [`InstrumentControl`] sink. Read-only commands (`status`,
//! `help`, `profile show`) and the simulation commands are rendered by the
//! front end, so the dispatcher reports them as unsupported.

use core::fmt;

use crate::charger::ChargerIo;
use crate::instrument::{ControlAck, ControlError, ControlRequest, Instrument};
use crate::settings::SettingsStore;

use super::grammar::{self, Command, ProfileCommand, SupplyCommand};

/// Sink for operator requests.
pub trait InstrumentControl {
    type Error;

    /// Applies one request and reports the result.
    ///
    /// # Errors
    ///
    /// Propagates whatever the sink refuses.
    fn submit(&mut self, request: ControlRequest) -> Result<ControlAck, Self::Error>;
}

/// Applies requests straight to an [`Instrument`] owned by the caller.
pub struct DirectControl<'a, IO: ?Sized, S> {
    pub instrument: &'a mut Instrument,
    pub io: &'a mut IO,
    pub store: &'a mut S,
}

impl<IO, S> InstrumentControl for DirectControl<'_, IO, S>
where
    IO: ChargerIo + ?Sized,
    S: SettingsStore,
{
    type Error = ControlError;

    fn submit(&mut self, request: ControlRequest) -> Result<ControlAck, ControlError> {
        self.instrument.apply(request, self.io, self.store)
    }
}

/// Errors surfaced while executing a command.
#[derive(Debug, PartialEq)]
pub enum CommandError<'a, E> {
    Parse(grammar::ParseError<'a>),
    Unsupported(&'static str),
    Control(E),
}

impl<E: fmt::Display> fmt::Display for CommandError<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(err) => write!(f, "parse error: {err}"),
            CommandError::Unsupported(name) => write!(f, "`{name}` is not available here"),
            CommandError::Control(err) => err.fmt(f),
        }
    }
}

impl<'a, E> From<grammar::ParseError<'a>> for CommandError<'a, E> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

/// Maps a command onto the instrument request it stands for, if any.
#[must_use]
pub fn control_request(command: &Command<'_>) -> Option<ControlRequest> {
    match command {
        Command::Profile(ProfileCommand::Select(index)) => {
            Some(ControlRequest::SelectProfile(*index))
        }
        Command::Mode(mode) => Some(ControlRequest::SetChargeMode(*mode)),
        Command::Current(milliamps) => Some(ControlRequest::SetChargeCurrent(*milliamps)),
        Command::Ack => Some(ControlRequest::Acknowledge),
        Command::Supply(SupplyCommand::Enter { preset }) => {
            Some(ControlRequest::EnterPowerSupply { preset: *preset })
        }
        Command::Supply(SupplyCommand::On) => Some(ControlRequest::SetSupplyOutput(true)),
        Command::Supply(SupplyCommand::Off) => Some(ControlRequest::SetSupplyOutput(false)),
        Command::Supply(SupplyCommand::Exit) => Some(ControlRequest::ExitPowerSupply),
        Command::Status
        | Command::Help(_)
        | Command::Profile(ProfileCommand::Show | ProfileCommand::List)
        | Command::Battery(_)
        | Command::Wait(_)
        | Command::Events => None,
    }
}

fn command_name(command: &Command<'_>) -> &'static str {
    match command {
        Command::Status => "status",
        Command::Help(_) => "help",
        Command::Profile(_) => "profile",
        Command::Mode(_) => "mode",
        Command::Current(_) => "current",
        Command::Ack => "ack",
        Command::Supply(_) => "supply",
        Command::Battery(_) => "battery",
        Command::Wait(_) => "wait",
        Command::Events => "events",
    }
}

/// Dispatches REPL commands into an [`InstrumentControl`] sink.
pub struct CommandExecutor<C> {
    control: C,
}

impl<C> CommandExecutor<C> {
    pub const fn new(control: C) -> Self {
        Self { control }
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    pub fn into_inner(self) -> C {
        self.control
    }
}

impl<C: InstrumentControl> CommandExecutor<C> {
    /// Parses and executes a REPL command.
    ///
    /// # Errors
    ///
    /// See [`CommandExecutor::dispatch`]; parse failures surface as
    /// [`CommandError::Parse`].
    pub fn execute<'a>(&mut self, line: &'a str) -> Result<ControlAck, CommandError<'a, C::Error>> {
        let command = grammar::parse(line)?;
        self.dispatch(&command)
    }

    /// Submits the request behind `command`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Unsupported`] for commands the front end must
    /// render itself and [`CommandError::Control`] when the sink refuses.
    pub fn dispatch<'a>(
        &mut self,
        command: &Command<'_>,
    ) -> Result<ControlAck, CommandError<'a, C::Error>> {
        let request = control_request(command)
            .ok_or_else(|| CommandError::Unsupported(command_name(command)))?;
        self.control.submit(request).map_err(CommandError::Control)
    }
}

/// Renders an acknowledgment line for the operator.
///
/// # Errors
///
/// Propagates writer failures.
pub fn write_ack<W: fmt::Write>(writer: &mut W, ack: &ControlAck) -> fmt::Result {
    match ack {
        ControlAck::ProfileSelected { index, outcome } => {
            write!(writer, "OK profile={index}")?;
            if matches!(outcome, crate::settings::LoadOutcome::Defaulted) {
                writer.write_str(" (factory defaults)")?;
            }
            Ok(())
        }
        ControlAck::ChargeModeSet(mode) => write!(writer, "OK mode={mode}"),
        ControlAck::ChargeCurrentSet(milliamps) => write!(writer, "OK current={milliamps}mA"),
        ControlAck::Acknowledged { left_battery_error } => {
            if *left_battery_error {
                writer.write_str("OK ack resumed charging")
            } else {
                writer.write_str("OK ack")
            }
        }
        ControlAck::PowerSupplyEntered(setpoint) => write!(
            writer,
            "OK supply {}mV {}mA output=off",
            setpoint.voltage, setpoint.current
        ),
        ControlAck::SupplyOutput(enabled) => {
            write!(writer, "OK output={}", if *enabled { "on" } else { "off" })
        }
        ControlAck::ChargerEntered => writer.write_str("OK charger"),
    }
}
