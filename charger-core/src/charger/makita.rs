//! Makita 3-pin battery detection over the single-wire status pin.
//!
//! Only the exchange sequence and the retry policy live here. Pulse timing is
//! the job of whatever implements [`OneWireBus`].

use core::fmt;

/// Command that switches the pack into charge mode.
pub const ENTER_CHARGE_MODE: [u8; 3] = [0xCC, 0xF0, 0x00];
/// Length of the status/identity message returned after [`ENTER_CHARGE_MODE`].
pub const BATTERY_MESSAGE_LEN: usize = 32;
/// Consecutive presence pulses required before a pack counts as inserted.
pub const PRESENCE_CHECKS: u8 = 5;
/// Consecutive polls the status line must stay asserted before it is acted on.
pub const STATUS_DEBOUNCE_POLLS: u8 = 3;

/// Identity and status bytes reported by the pack.
pub type BatteryMessage = [u8; BATTERY_MESSAGE_LEN];

/// Reset failures on the single-wire bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OneWireError {
    /// The idle line was not high before the reset pulse.
    LineStuckLow,
    /// No device answered the reset pulse.
    NoPresence,
}

impl fmt::Display for OneWireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OneWireError::LineStuckLow => f.write_str("line stuck low"),
            OneWireError::NoPresence => f.write_str("no presence pulse"),
        }
    }
}

/// Master side of a bit-banged single-wire bus. Bytes travel LSB first.
pub trait OneWireBus {
    /// Issues a reset pulse and samples the presence response.
    ///
    /// # Errors
    ///
    /// Returns [`OneWireError`] when the line is held low or nothing answers.
    fn reset(&mut self) -> Result<(), OneWireError>;

    fn send(&mut self, byte: u8);

    fn recv(&mut self) -> u8;
}

/// Battery connector with a 1-wire data pin and a separate status input.
pub trait BatteryPort: OneWireBus {
    /// Returns `true` while the pack pulls its status line active.
    fn status_asserted(&mut self) -> bool;
}

/// Port used when no alternate-protocol hardware is fitted.
#[derive(Copy, Clone, Debug, Default)]
pub struct DisconnectedPort;

impl OneWireBus for DisconnectedPort {
    fn reset(&mut self) -> Result<(), OneWireError> {
        Err(OneWireError::NoPresence)
    }

    fn send(&mut self, _byte: u8) {}

    fn recv(&mut self) -> u8 {
        0xFF
    }
}

impl BatteryPort for DisconnectedPort {
    fn status_asserted(&mut self) -> bool {
        false
    }
}

/// Result of one presence check.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PresenceStep {
    /// The reset went unanswered; the streak starts over.
    Absent,
    /// Presence seen, more confirmations needed.
    Pending(u8),
    /// Presence seen on [`PRESENCE_CHECKS`] consecutive resets.
    Confirmed,
}

/// Result of one status-line check while charging.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StatusStep {
    Normal,
    Debouncing(u8),
    /// The pack still answers resets while signalling: it reports a fault.
    Fault,
    /// Nothing answers any more: the pack was pulled.
    Removed,
}

/// Presence and status counters plus the last message read from the pack.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MakitaLink {
    presence_streak: u8,
    status_polls: u8,
    message: Option<BatteryMessage>,
}

impl MakitaLink {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            presence_streak: 0,
            status_polls: 0,
            message: None,
        }
    }

    /// Clears the debounce counters, keeping the last message.
    pub fn reset_counters(&mut self) {
        self.presence_streak = 0;
        self.status_polls = 0;
    }

    #[must_use]
    pub const fn message(&self) -> Option<&BatteryMessage> {
        self.message.as_ref()
    }

    /// Issues one reset and counts the presence answer.
    pub fn check_presence<P: OneWireBus + ?Sized>(&mut self, port: &mut P) -> PresenceStep {
        if port.reset().is_err() {
            self.presence_streak = 0;
            return PresenceStep::Absent;
        }

        self.presence_streak = self.presence_streak.saturating_add(1);
        if self.presence_streak < PRESENCE_CHECKS {
            return PresenceStep::Pending(self.presence_streak);
        }

        self.presence_streak = 0;
        PresenceStep::Confirmed
    }

    /// Sends the charge-mode command and stores the reply.
    pub fn read_battery_message<P: OneWireBus + ?Sized>(&mut self, port: &mut P) -> &BatteryMessage {
        for byte in ENTER_CHARGE_MODE {
            port.send(byte);
        }

        let mut message = [0u8; BATTERY_MESSAGE_LEN];
        for slot in &mut message {
            *slot = port.recv();
        }
        self.message.insert(message)
    }

    /// Checks the status line once while charging.
    pub fn watch_status<P: BatteryPort + ?Sized>(&mut self, port: &mut P) -> StatusStep {
        if !port.status_asserted() {
            self.status_polls = 0;
            return StatusStep::Normal;
        }

        self.status_polls = self.status_polls.saturating_add(1);
        if self.status_polls < STATUS_DEBOUNCE_POLLS {
            return StatusStep::Debouncing(self.status_polls);
        }

        self.status_polls = 0;
        match port.reset() {
            Ok(()) => StatusStep::Fault,
            Err(_) => StatusStep::Removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedPort {
        presence: bool,
        status: bool,
        sent: heapless::Vec<u8, 8>,
        next: u8,
    }

    impl ScriptedPort {
        fn new(presence: bool) -> Self {
            Self {
                presence,
                status: false,
                sent: heapless::Vec::new(),
                next: 0,
            }
        }
    }

    impl OneWireBus for ScriptedPort {
        fn reset(&mut self) -> Result<(), OneWireError> {
            if self.presence {
                Ok(())
            } else {
                Err(OneWireError::NoPresence)
            }
        }

        fn send(&mut self, byte: u8) {
            self.sent.push(byte).expect("sent buffer full");
        }

        fn recv(&mut self) -> u8 {
            self.next = self.next.wrapping_add(1);
            self.next
        }
    }

    impl BatteryPort for ScriptedPort {
        fn status_asserted(&mut self) -> bool {
            self.status
        }
    }

    #[test]
    fn five_answers_confirm_presence() {
        let mut link = MakitaLink::new();
        let mut port = ScriptedPort::new(true);
        for expected in 1..PRESENCE_CHECKS {
            assert_eq!(link.check_presence(&mut port), PresenceStep::Pending(expected));
        }
        assert_eq!(link.check_presence(&mut port), PresenceStep::Confirmed);
    }

    #[test]
    fn missing_answer_restarts_the_streak() {
        let mut link = MakitaLink::new();
        let mut port = ScriptedPort::new(true);
        link.check_presence(&mut port);
        link.check_presence(&mut port);
        port.presence = false;
        assert_eq!(link.check_presence(&mut port), PresenceStep::Absent);
        port.presence = true;
        assert_eq!(link.check_presence(&mut port), PresenceStep::Pending(1));
    }

    #[test]
    fn battery_message_follows_command() {
        let mut link = MakitaLink::new();
        let mut port = ScriptedPort::new(true);
        let message = *link.read_battery_message(&mut port);
        assert_eq!(port.sent.as_slice(), &ENTER_CHARGE_MODE);
        assert_eq!(message[0], 1);
        assert_eq!(message[BATTERY_MESSAGE_LEN - 1], 32);
        assert_eq!(link.message(), Some(&message));
    }

    #[test]
    fn status_line_is_debounced() {
        let mut link = MakitaLink::new();
        let mut port = ScriptedPort::new(true);
        port.status = true;
        assert_eq!(link.watch_status(&mut port), StatusStep::Debouncing(1));
        assert_eq!(link.watch_status(&mut port), StatusStep::Debouncing(2));
        port.status = false;
        assert_eq!(link.watch_status(&mut port), StatusStep::Normal);
        port.status = true;
        assert_eq!(link.watch_status(&mut port), StatusStep::Debouncing(1));
        link.watch_status(&mut port);
        assert_eq!(link.watch_status(&mut port), StatusStep::Fault);

        port.presence = false;
        for _ in 0..2 {
            link.watch_status(&mut port);
        }
        assert_eq!(link.watch_status(&mut port), StatusStep::Removed);
    }

    #[test]
    fn disconnected_port_never_answers() {
        let mut link = MakitaLink::new();
        let mut port = DisconnectedPort;
        assert_eq!(link.check_presence(&mut port), PresenceStep::Absent);
        assert_eq!(link.watch_status(&mut port), StatusStep::Normal);
    }
}
