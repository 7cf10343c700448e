use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::mem;
use std::path::PathBuf;
use std::time::Duration;

use charger_core::charger::{ChargeState, ChargerIo, Outcome, PollInput};
use charger_core::counters::TickContext;
use charger_core::failure::{FailureFlags, FailureInputs, OutputDirective};
use charger_core::instrument::{ControlAck, Instrument, InstrumentMode};
use charger_core::profile::PROFILE_SLOTS;
use charger_core::repl::catalog;
use charger_core::repl::commands::{CommandExecutor, DirectControl, write_ack};
use charger_core::repl::grammar::{self, BatteryCommand, Command, HelpCommand, ProfileCommand};
use charger_core::repl::status::{
    StatusFormatter, StatusProvider, StatusSnapshot, write_profile_line,
};
use charger_core::settings::{self, MemoryStore, Settings, SoundId};
use charger_core::telemetry::{
    FailureTelemetry, TelemetryEventKind, TelemetryInstant, TelemetryPayload, TelemetryRecorder,
};

use crate::plant::{Battery, Plant, Reading, TICK_MS};

/// The charger loop runs every fifth tick, 50 ms apart.
const POLL_EVERY_TICKS: u64 = 5;
const POLL_TICKS: u16 = 5;
const MAX_WAIT: Duration = Duration::from_secs(12 * 3_600);

/// Simulated time in 10 ms ticks since power-on.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct SimInstant(u64);

impl SimInstant {
    pub fn as_millis(self) -> u64 {
        self.0 * TICK_MS
    }
}

impl TelemetryInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0) * TICK_MS)
    }
}

impl fmt::Display for SimInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}ms", self.as_millis())
    }
}

/// Output relay and sound requests coming out of the core.
#[derive(Debug, Default)]
struct BenchIo {
    output_enabled: bool,
    reset_pending: bool,
    notes: Vec<String>,
}

impl ChargerIo for BenchIo {
    fn set_output_enabled(&mut self, enabled: bool) {
        self.output_enabled = enabled;
    }

    fn play_sound(&mut self, sound: SoundId) {
        self.notes.push(format!("sound {}", sound.0));
    }

    fn stop_sound(&mut self) {
        self.notes.push("sound stop".to_string());
    }

    fn reset_time_and_capacity(&mut self) {
        self.reset_pending = true;
    }
}

/// Instrument, tick context and plant wired together the way the firmware does.
struct Bench {
    instrument: Instrument,
    store: MemoryStore,
    io: BenchIo,
    ticks: TickContext,
    plant: Plant,
    directive: OutputDirective,
    last: Reading,
    telemetry: TelemetryRecorder<SimInstant>,
    now: SimInstant,
}

impl Bench {
    fn power_on(profile_index: Option<u8>) -> Result<Self, String> {
        let mut store = MemoryStore::new();
        if let Some(index) = profile_index {
            let settings = Settings {
                profile_index: index,
                ..Settings::DEFAULT
            };
            settings::save_settings(&mut store, &settings).map_err(|err| err.to_string())?;
        }

        let (mut instrument, report) = Instrument::load(&mut store);
        let mut io = BenchIo::default();
        instrument.start(&mut io);

        let mut telemetry = TelemetryRecorder::new();
        let now = SimInstant::default();
        if report.settings == settings::LoadOutcome::Defaulted {
            telemetry.record(
                TelemetryEventKind::SettingsDefaulted,
                TelemetryPayload::none(),
                now,
            );
        }
        telemetry.record_profile_selected(instrument.settings().profile_index, report.profile, now);

        let mut plant = Plant::new();
        let last = plant.step(OutputDirective::OFF, instrument.target_display());
        Ok(Self {
            instrument,
            store,
            io,
            ticks: TickContext::new(),
            plant,
            directive: OutputDirective::OFF,
            last,
            telemetry,
            now,
        })
    }

    /// Runs one 10 ms tick and returns narration for anything that happened.
    fn step(&mut self, lines: &mut Vec<String>) {
        self.now = SimInstant(self.now.0 + 1);

        let target = self.instrument.target_display();
        let reading = self.plant.step(self.directive, target);
        let inputs = FailureInputs {
            power_good: true,
            measured: reading.measured,
            target,
            output_requested: self.io.output_enabled,
            regulation: reading.regulation,
        };
        let reset = mem::take(&mut self.io.reset_pending);
        let report = self.ticks.on_tick(&inputs, reset);
        self.directive = report.failure.directive;
        self.last = reading;

        if self
            .telemetry
            .record_failures(&report.failure, reading.measured, self.now)
            > 0
        {
            for kind in report.failure.tripped.kinds() {
                lines.push(format!("[{}] failure {kind} tripped", self.now));
            }
            for kind in report.failure.cleared.kinds() {
                lines.push(format!("[{}] failure {kind} cleared", self.now));
            }
        }

        if self.now.0 % POLL_EVERY_TICKS == 0 {
            self.poll(reading, lines);
        }
        self.drain_notes(lines);
    }

    fn poll(&mut self, reading: Reading, lines: &mut Vec<String>) {
        let from = self.instrument.charger().state();
        let input = PollInput {
            measured: reading.measured,
            regulation: reading.regulation,
        };
        let Some(evaluation) =
            self.instrument
                .poll(POLL_TICKS, input, &mut self.io, &mut self.plant)
        else {
            return;
        };

        if let Outcome::Transition(to) = evaluation.outcome {
            self.telemetry.record_transition(from, to, self.now);
            lines.push(format!(
                "[{}] charger {from} -> {to} at {}mV/{}mA",
                self.now, reading.measured.voltage, reading.measured.current
            ));

            let charger = self.instrument.charger();
            if from == ChargeState::NoBattery && charger.profile().uses_alternate_protocol() {
                if let Some(message) = charger.battery_message() {
                    self.telemetry.record(
                        TelemetryEventKind::BatteryMessageRead,
                        TelemetryPayload::none(),
                        self.now,
                    );
                    lines.push(format!("[{}] pack message {}", self.now, hex_prefix(message)));
                }
            }
        }
    }

    fn drain_notes(&mut self, lines: &mut Vec<String>) {
        for note in self.io.notes.drain(..) {
            lines.push(format!("[{}] {note}", self.now));
        }
    }

    fn run_for(&mut self, duration: Duration) -> Vec<String> {
        let ticks = duration.as_millis() / u128::from(TICK_MS);
        let mut lines = Vec::new();
        for _ in 0..ticks {
            self.step(&mut lines);
        }
        lines.push(format!("OK waited {}ms now={}", duration.as_millis(), self.now));
        lines
    }

    /// Records the side effects of an accepted operator request.
    fn note_ack(&mut self, ack: &ControlAck) {
        match ack {
            ControlAck::ProfileSelected { index, outcome } => {
                self.telemetry
                    .record_profile_selected(*index, *outcome, self.now);
            }
            ControlAck::PowerSupplyEntered(_) => {
                self.telemetry.record(
                    TelemetryEventKind::PowerSupplyEntered,
                    TelemetryPayload::none(),
                    self.now,
                );
            }
            ControlAck::ChargerEntered => {
                self.telemetry.record(
                    TelemetryEventKind::ChargerEntered,
                    TelemetryPayload::none(),
                    self.now,
                );
            }
            ControlAck::ChargeModeSet(_)
            | ControlAck::ChargeCurrentSet(_)
            | ControlAck::Acknowledged { .. }
            | ControlAck::SupplyOutput(_) => {}
        }
    }

    /// `ack` also releases latched overvoltage and overcurrent failures.
    fn clear_latched(&mut self) -> FailureFlags {
        let cleared = self.ticks.monitor_mut().clear_latched();
        let payload = TelemetryPayload::Failure(FailureTelemetry {
            flags: self.ticks.monitor().flags(),
            measured: self.last.measured,
        });
        for kind in cleared.kinds() {
            self.telemetry
                .record(TelemetryEventKind::FailureCleared(kind), payload, self.now);
        }
        cleared
    }
}

impl StatusProvider for Bench {
    fn snapshot(&mut self) -> Option<StatusSnapshot> {
        let charger = self.instrument.charger();
        let counters = self.ticks.counters();
        let failures = self.ticks.monitor().flags();
        let mode = self.instrument.mode();
        Some(StatusSnapshot {
            mode,
            charge_state: (mode == InstrumentMode::Charger).then_some(charger.state()),
            profile_index: self.instrument.settings().profile_index,
            charge_mode: self.instrument.charge_mode(),
            measured: self.last.measured,
            target: self.instrument.target_display(),
            relay_closed: self.directive.relay_closed,
            output_requested: self.io.output_enabled,
            regulation: self.directive.mode,
            percent: charger.status().percent,
            elapsed: counters.elapsed,
            capacity_mah: counters.capacity.milliamp_hours(),
            power_good: !failures.contains(FailureFlags::LOW_POWER),
            failures,
        })
    }
}

/// Transcript name and the profile the bench powers on with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionConfig {
    pub scenario: String,
    pub profile: Option<u8>,
}

impl SessionConfig {
    pub fn log_path(&self) -> PathBuf {
        PathBuf::from("transcripts").join(format!("{}.log", self.scenario))
    }
}

pub struct Session {
    bench: Bench,
    transcript: TranscriptLogger,
}

impl Session {
    pub fn new(config: &SessionConfig) -> io::Result<Self> {
        let bench = Bench::power_on(config.profile).map_err(io::Error::other)?;
        let transcript = TranscriptLogger::new(config)?;
        Ok(Self { bench, transcript })
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let started = self.bench.now;
        self.transcript
            .append_line(started, TranscriptRole::Host, trimmed)?;

        let lines = match grammar::parse(trimmed) {
            Ok(command) => self.run(&command),
            Err(err) => vec![format!("ERR syntax {err}")],
        };

        self.transcript.record_output(started, &lines)?;
        Ok(lines)
    }

    fn run(&mut self, command: &Command<'_>) -> Vec<String> {
        match command {
            Command::Status => self.status_lines(),
            Command::Help(HelpCommand { topic }) => help_lines(*topic),
            Command::Profile(ProfileCommand::Show) => {
                let index = self.bench.instrument.settings().profile_index;
                let profile = self.bench.instrument.charger().profile().clone();
                vec![render(|out| write_profile_line(out, index, &profile))]
            }
            Command::Profile(ProfileCommand::List) => self.profile_list(),
            Command::Battery(battery) => self.battery(*battery),
            Command::Wait(duration) if *duration > MAX_WAIT => {
                vec![format!("ERR wait longer than {}h", MAX_WAIT.as_secs() / 3_600)]
            }
            Command::Wait(duration) => self.bench.run_for(*duration),
            Command::Events => self.event_lines(),
            Command::Profile(ProfileCommand::Select(_))
            | Command::Mode(_)
            | Command::Current(_)
            | Command::Ack
            | Command::Supply(_) => self.control(command),
        }
    }

    fn control(&mut self, command: &Command<'_>) -> Vec<String> {
        let bench = &mut self.bench;
        let result = CommandExecutor::new(DirectControl {
            instrument: &mut bench.instrument,
            io: &mut bench.io,
            store: &mut bench.store,
        })
        .dispatch(command);

        let mut lines = Vec::new();
        match result {
            Ok(ack) => {
                bench.note_ack(&ack);
                lines.push(render(|out| write_ack(out, &ack)));
            }
            Err(err) => lines.push(format!("ERR {err}")),
        }

        if matches!(command, Command::Ack) {
            let cleared = bench.clear_latched();
            if !cleared.is_empty() {
                lines.push(format!("OK cleared {cleared}"));
            }
        }
        bench.drain_notes(&mut lines);
        lines
    }

    fn status_lines(&mut self) -> Vec<String> {
        let Some(snapshot) = self.bench.snapshot() else {
            return vec!["ERR status unavailable".to_string()];
        };
        let formatter = StatusFormatter::new(&snapshot);
        let mut lines = vec![
            render(|out| formatter.write_mode_line(out)),
            render(|out| formatter.write_output_line(out)),
            render(|out| formatter.write_session_line(out)),
            render(|out| formatter.write_failures_line(out)),
        ];
        lines.push(match self.bench.plant.battery() {
            Some(battery) => format!(
                "plant battery={:.0}mV charge={:.0}/{:.0}mAh fault={}",
                battery.open_circuit_mv(),
                battery.charge_mah,
                battery.capacity_mah,
                if battery.fault { "yes" } else { "no" }
            ),
            None => "plant battery=none".to_string(),
        });
        lines
    }

    fn profile_list(&mut self) -> Vec<String> {
        let active = usize::from(self.bench.instrument.settings().profile_index);
        (0..PROFILE_SLOTS)
            .filter_map(|slot| {
                let index = u8::try_from(slot).ok()?;
                let loaded = settings::load_profile(&mut self.bench.store, slot);
                let marker = if slot == active { '*' } else { ' ' };
                Some(format!(
                    "{marker}{}",
                    render(|out| write_profile_line(out, index, &loaded.value))
                ))
            })
            .collect()
    }

    fn battery(&mut self, command: BatteryCommand) -> Vec<String> {
        let plant = &mut self.bench.plant;
        let line = match command {
            BatteryCommand::Insert { millivolts } => {
                plant.insert(Battery::resting_at(millivolts));
                format!("OK battery inserted at {millivolts}mV")
            }
            BatteryCommand::Remove => {
                if plant.remove() {
                    "OK battery removed".to_string()
                } else {
                    "ERR no battery inserted".to_string()
                }
            }
            BatteryCommand::Fault => match plant.toggle_fault() {
                Some(true) => "OK battery status line asserted".to_string(),
                Some(false) => "OK battery status line released".to_string(),
                None => "ERR no battery inserted".to_string(),
            },
        };
        vec![line]
    }

    fn event_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .bench
            .telemetry
            .oldest_first()
            .map(|record| {
                let mut line = format!("#{} {} {}", record.id, record.timestamp, record.event);
                let details = record.details.to_string();
                if !details.is_empty() {
                    line.push(' ');
                    line.push_str(&details);
                }
                line
            })
            .collect();
        if lines.is_empty() {
            lines.push("no events recorded".to_string());
        }
        lines
    }
}

fn help_lines(topic: Option<&str>) -> Vec<String> {
    match topic {
        Some(name) => match catalog::find(name) {
            Some(spec) => vec![format!("{:<40} - {}", spec.usage, spec.summary)],
            None => vec![
                format!("No help available for `{name}`."),
                format!("Available topics: {}", topic_list()),
            ],
        },
        None => {
            let mut lines = vec!["Available commands:".to_string()];
            for spec in catalog::commands() {
                lines.push(format!("  {:<40} - {}", spec.usage, spec.summary));
            }
            lines.push("Type `help <command>` for a specific command.".to_string());
            lines
        }
    }
}

fn topic_list() -> String {
    catalog::commands()
        .iter()
        .map(|spec| spec.name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn hex_prefix(message: &[u8]) -> String {
    message
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Renders a core formatter into an owned line.
fn render(write: impl FnOnce(&mut String) -> fmt::Result) -> String {
    let mut line = String::new();
    if write(&mut line).is_err() {
        line.push_str("<format error>");
    }
    line
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(config: &SessionConfig) -> io::Result<Self> {
        let path = config.log_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header(config)?;
        Ok(logger)
    }

    fn write_header(&mut self, config: &SessionConfig) -> io::Result<()> {
        writeln!(
            self.writer,
            "# Smart charger emulator transcript: {}",
            config.scenario
        )?;
        writeln!(
            self.writer,
            "# Timestamps are simulated milliseconds since power-on"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        at: SimInstant,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>8} ms] {} {}",
            at.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }

    fn record_output(&mut self, at: SimInstant, lines: &[String]) -> io::Result<()> {
        for line in lines {
            self.append_line(at, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
