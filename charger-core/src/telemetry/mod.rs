//! Telemetry event catalog and the ring buffer that records it.
//!
//! Events encode to compact numeric codes so the firmware can log them over
//! defmt and the emulator can print them for `events`. Payloads carry the
//! extra context the REPL shows while staying `no_std`.

use core::{convert::TryFrom, fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::charger::ChargeState;
use crate::failure::{FailureFlags, FailureKind, FailureReport};
use crate::measurement::Measurements;
use crate::settings::LoadOutcome;

/// Monotonic identifier assigned to each recorded event.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 128;

/// Discriminated telemetry events shared by the firmware and the emulator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    StateEntered(ChargeState),
    FailureTripped(FailureKind),
    FailureCleared(FailureKind),
    ProfileSelected(u8),
    SettingsDefaulted,
    BatteryMessageRead,
    PowerSupplyEntered,
    ChargerEntered,
    UsbDisconnect,
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::StateEntered(state) => write!(f, "state-entered {state}"),
            TelemetryEventKind::FailureTripped(kind) => write!(f, "failure-tripped {kind}"),
            TelemetryEventKind::FailureCleared(kind) => write!(f, "failure-cleared {kind}"),
            TelemetryEventKind::ProfileSelected(index) => write!(f, "profile-selected {index}"),
            TelemetryEventKind::SettingsDefaulted => f.write_str("settings-defaulted"),
            TelemetryEventKind::BatteryMessageRead => f.write_str("battery-message-read"),
            TelemetryEventKind::PowerSupplyEntered => f.write_str("power-supply-entered"),
            TelemetryEventKind::ChargerEntered => f.write_str("charger-entered"),
            TelemetryEventKind::UsbDisconnect => f.write_str("usb-disconnect"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const STATE_ENTERED_BASE: u16 = 0x0000;
    const FAILURE_TRIPPED_BASE: u16 = 0x0010;
    const FAILURE_CLEARED_BASE: u16 = 0x0014;
    const PROFILE_SELECTED_BASE: u16 = 0x0020;
    const SETTINGS_DEFAULTED_CODE: u16 = 0x0030;
    const BATTERY_MESSAGE_CODE: u16 = 0x0031;
    const POWER_SUPPLY_CODE: u16 = 0x0032;
    const CHARGER_CODE: u16 = 0x0033;
    const USB_DISCONNECT_CODE: u16 = 0x0034;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::StateEntered(state) => {
                Self::STATE_ENTERED_BASE + state.to_raw() as u16
            }
            TelemetryEventKind::FailureTripped(kind) => {
                Self::FAILURE_TRIPPED_BASE + failure_index(kind)
            }
            TelemetryEventKind::FailureCleared(kind) => {
                Self::FAILURE_CLEARED_BASE + failure_index(kind)
            }
            TelemetryEventKind::ProfileSelected(index) => {
                Self::PROFILE_SELECTED_BASE + index as u16
            }
            TelemetryEventKind::SettingsDefaulted => Self::SETTINGS_DEFAULTED_CODE,
            TelemetryEventKind::BatteryMessageRead => Self::BATTERY_MESSAGE_CODE,
            TelemetryEventKind::PowerSupplyEntered => Self::POWER_SUPPLY_CODE,
            TelemetryEventKind::ChargerEntered => Self::CHARGER_CODE,
            TelemetryEventKind::UsbDisconnect => Self::USB_DISCONNECT_CODE,
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::SETTINGS_DEFAULTED_CODE => TelemetryEventKind::SettingsDefaulted,
            Self::BATTERY_MESSAGE_CODE => TelemetryEventKind::BatteryMessageRead,
            Self::POWER_SUPPLY_CODE => TelemetryEventKind::PowerSupplyEntered,
            Self::CHARGER_CODE => TelemetryEventKind::ChargerEntered,
            Self::USB_DISCONNECT_CODE => TelemetryEventKind::UsbDisconnect,
            value if (Self::STATE_ENTERED_BASE..Self::FAILURE_TRIPPED_BASE).contains(&value) => {
                u8::try_from(value - Self::STATE_ENTERED_BASE)
                    .ok()
                    .and_then(ChargeState::from_raw)
                    .map_or(TelemetryEventKind::Custom(value), |state| {
                        TelemetryEventKind::StateEntered(state)
                    })
            }
            value if (Self::FAILURE_TRIPPED_BASE..Self::FAILURE_CLEARED_BASE).contains(&value) => {
                failure_from_index(value - Self::FAILURE_TRIPPED_BASE)
                    .map_or(TelemetryEventKind::Custom(value), |kind| {
                        TelemetryEventKind::FailureTripped(kind)
                    })
            }
            value if (Self::FAILURE_CLEARED_BASE..Self::PROFILE_SELECTED_BASE).contains(&value) => {
                failure_from_index(value - Self::FAILURE_CLEARED_BASE)
                    .map_or(TelemetryEventKind::Custom(value), |kind| {
                        TelemetryEventKind::FailureCleared(kind)
                    })
            }
            value
                if (Self::PROFILE_SELECTED_BASE..Self::SETTINGS_DEFAULTED_CODE).contains(&value) =>
            {
                u8::try_from(value - Self::PROFILE_SELECTED_BASE)
                    .map_or(TelemetryEventKind::Custom(value), |index| {
                        TelemetryEventKind::ProfileSelected(index)
                    })
            }
            other => TelemetryEventKind::Custom(other),
        }
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    Transition(TransitionTelemetry),
    Failure(FailureTelemetry),
    Profile(ProfileTelemetry),
}

impl TelemetryPayload {
    /// Convenience constructor when no payload data is needed.
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

impl fmt::Display for TelemetryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Transition(details) => {
                write!(f, "from={}", details.from)?;
                if let Some(elapsed) = details.time_in_previous {
                    write!(f, " after={}ms", elapsed.as_millis())?;
                }
                Ok(())
            }
            TelemetryPayload::Failure(details) => write!(
                f,
                "flags={} at={}mV/{}mA",
                details.flags, details.measured.voltage, details.measured.current
            ),
            TelemetryPayload::Profile(details) => {
                f.write_str(if details.defaulted { "source=factory" } else { "source=stored" })
            }
        }
    }
}

/// Charge state change payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransitionTelemetry {
    pub from: ChargeState,
    pub time_in_previous: Option<Duration>,
}

/// Failure flag change payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FailureTelemetry {
    /// Flags in force after the change.
    pub flags: FailureFlags,
    pub measured: Measurements,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProfileTelemetry {
    pub defaulted: bool,
}

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    last_transition_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_transition_at: None,
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records a charge state change with the time spent in the previous state.
    ///
    /// The first transition has no previous timestamp and reports `None`.
    pub fn record_transition(
        &mut self,
        from: ChargeState,
        to: ChargeState,
        timestamp: TInstant,
    ) -> EventId {
        let time_in_previous = self
            .last_transition_at
            .map(|previous| timestamp.saturating_duration_since(previous));
        self.last_transition_at = Some(timestamp);

        self.record(
            TelemetryEventKind::StateEntered(to),
            TelemetryPayload::Transition(TransitionTelemetry {
                from,
                time_in_previous,
            }),
            timestamp,
        )
    }

    /// Records one event per failure that tripped or cleared in `report`.
    ///
    /// Returns the number of events written.
    pub fn record_failures(
        &mut self,
        report: &FailureReport,
        measured: Measurements,
        timestamp: TInstant,
    ) -> u8 {
        let payload = TelemetryPayload::Failure(FailureTelemetry {
            flags: report.flags,
            measured,
        });

        let mut written = 0usize;
        for kind in report.tripped.kinds() {
            self.record(TelemetryEventKind::FailureTripped(kind), payload, timestamp);
            written += 1;
        }
        for kind in report.cleared.kinds() {
            self.record(TelemetryEventKind::FailureCleared(kind), payload, timestamp);
            written += 1;
        }
        truncate_count(written)
    }

    /// Records a profile change and whether it fell back to the factory table.
    pub fn record_profile_selected(
        &mut self,
        index: u8,
        outcome: LoadOutcome,
        timestamp: TInstant,
    ) -> EventId {
        self.record(
            TelemetryEventKind::ProfileSelected(index),
            TelemetryPayload::Profile(ProfileTelemetry {
                defaulted: outcome == LoadOutcome::Defaulted,
            }),
            timestamp,
        )
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

fn truncate_count(count: usize) -> u8 {
    u8::try_from(count).unwrap_or(u8::MAX)
}

const fn failure_index(kind: FailureKind) -> u16 {
    match kind {
        FailureKind::LowPower => 0,
        FailureKind::Overvoltage => 1,
        FailureKind::Overcurrent => 2,
    }
}

fn failure_from_index(index: u16) -> Option<FailureKind> {
    FailureKind::ALL.get(usize::from(index)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::OutputDirective;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MicrosInstant(u64);

    impl MicrosInstant {
        fn from_micros(value: u64) -> Self {
            Self(value)
        }
    }

    impl TelemetryInstant for MicrosInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    #[test]
    fn event_codes_decode_to_themselves() {
        let fixtures = [
            TelemetryEventKind::StateEntered(ChargeState::BatteryError),
            TelemetryEventKind::FailureTripped(FailureKind::Overcurrent),
            TelemetryEventKind::FailureCleared(FailureKind::LowPower),
            TelemetryEventKind::ProfileSelected(9),
            TelemetryEventKind::SettingsDefaulted,
            TelemetryEventKind::UsbDisconnect,
        ];
        for event in fixtures {
            assert_eq!(TelemetryEventKind::from_raw(event.to_raw()), event);
        }
    }

    #[test]
    fn unknown_codes_become_custom() {
        assert_eq!(
            TelemetryEventKind::from_raw(0x0007),
            TelemetryEventKind::Custom(0x0007)
        );
        assert_eq!(
            TelemetryEventKind::from_raw(0x0013),
            TelemetryEventKind::Custom(0x0013)
        );
        assert_eq!(
            TelemetryEventKind::from_raw(0x0100),
            TelemetryEventKind::Custom(0x0100)
        );
    }

    #[test]
    fn transitions_carry_time_in_previous_state() {
        let mut recorder = TelemetryRecorder::<MicrosInstant>::new();

        let first = recorder.record_transition(
            ChargeState::NoBattery,
            ChargeState::MeasuringVoltage,
            MicrosInstant::from_micros(1_000),
        );
        assert_eq!(first, 0);
        let record = recorder.latest().copied().expect("record");
        assert_eq!(
            record.details,
            TelemetryPayload::Transition(TransitionTelemetry {
                from: ChargeState::NoBattery,
                time_in_previous: None,
            })
        );

        let second = recorder.record_transition(
            ChargeState::MeasuringVoltage,
            ChargeState::Charging,
            MicrosInstant::from_micros(101_000),
        );
        assert_eq!(second, 1);
        match recorder.latest().copied().expect("record").details {
            TelemetryPayload::Transition(details) => {
                let elapsed = details.time_in_previous.expect("missing elapsed");
                assert_eq!(elapsed.as_millis(), 100);
            }
            other => panic!("expected transition payload, got {other:?}"),
        }
    }

    #[test]
    fn failure_reports_expand_into_events() {
        let mut recorder = TelemetryRecorder::<MicrosInstant>::new();
        let report = FailureReport {
            directive: OutputDirective::OFF,
            flags: FailureFlags::OVERCURRENT,
            tripped: FailureFlags::OVERCURRENT,
            cleared: FailureFlags::LOW_POWER,
        };

        let written = recorder.record_failures(
            &report,
            Measurements::new(12_000, 9_500),
            MicrosInstant::from_micros(5),
        );
        assert_eq!(written, 2);

        let events: heapless::Vec<TelemetryEventKind, 4> =
            recorder.oldest_first().map(|record| record.event).collect();
        assert_eq!(
            events.as_slice(),
            &[
                TelemetryEventKind::FailureTripped(FailureKind::Overcurrent),
                TelemetryEventKind::FailureCleared(FailureKind::LowPower),
            ]
        );
    }

    #[test]
    fn ring_keeps_the_newest_records() {
        let mut recorder = TelemetryRecorder::<MicrosInstant, 4>::new();
        for index in 0..6u8 {
            recorder.record_profile_selected(
                index,
                LoadOutcome::Stored,
                MicrosInstant::from_micros(u64::from(index)),
            );
        }
        assert_eq!(recorder.len(), 4);
        let first = recorder.oldest_first().next().copied().expect("record");
        assert_eq!(first.event, TelemetryEventKind::ProfileSelected(2));
        assert_eq!(first.id, 2);
    }

    #[test]
    fn payloads_render_for_the_event_log() {
        let payload = TelemetryPayload::Transition(TransitionTelemetry {
            from: ChargeState::Charging,
            time_in_previous: Some(Duration::from_millis(1_500)),
        });
        let mut line: heapless::String<48> = heapless::String::new();
        core::fmt::write(&mut line, format_args!("{payload}")).expect("fits");
        assert_eq!(line.as_str(), "from=charging after=1500ms");
    }
}
