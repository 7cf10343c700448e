use charger_core::charger::makita::{
    BATTERY_MESSAGE_LEN, BatteryPort, ENTER_CHARGE_MODE, OneWireBus, OneWireError,
};
use charger_core::charger::{ChargeState, Charger, ChargerIo, Evaluation, PollInput};
use charger_core::failure::RegulationMode;
use charger_core::measurement::{ChannelCalibration, Measurements};
use charger_core::profile;
use charger_core::settings::{SoundId, SoundMap};
use heapless::Vec as HeaplessVec;

const MAKITA_18V: usize = 0;

/// Pack simulator: answers resets while inserted and replays a fixed message.
#[derive(Default)]
struct FakePack {
    inserted: bool,
    status: bool,
    sent: HeaplessVec<u8, 8>,
    resets: u32,
    cursor: u8,
}

impl OneWireBus for FakePack {
    fn reset(&mut self) -> Result<(), OneWireError> {
        self.resets += 1;
        if self.inserted {
            Ok(())
        } else {
            Err(OneWireError::NoPresence)
        }
    }

    fn send(&mut self, byte: u8) {
        self.sent.push(byte).expect("command buffer full");
    }

    fn recv(&mut self) -> u8 {
        let byte = 0xA0 ^ self.cursor;
        self.cursor = self.cursor.wrapping_add(1);
        byte
    }
}

impl BatteryPort for FakePack {
    fn status_asserted(&mut self) -> bool {
        self.status
    }
}

#[derive(Default)]
struct SoundLog {
    output: bool,
    sounds: HeaplessVec<SoundId, 8>,
}

impl ChargerIo for SoundLog {
    fn set_output_enabled(&mut self, enabled: bool) {
        self.output = enabled;
    }

    fn play_sound(&mut self, sound: SoundId) {
        self.sounds.push(sound).expect("sound log full");
    }

    fn stop_sound(&mut self) {}

    fn reset_time_and_capacity(&mut self) {}
}

struct Bench {
    charger: Charger,
    io: SoundLog,
    pack: FakePack,
}

impl Bench {
    fn new() -> Self {
        let mut bench = Self {
            charger: Charger::new(
                profile::builtin(MAKITA_18V),
                ChannelCalibration::DEFAULT,
                SoundMap::DEFAULT,
            ),
            io: SoundLog::default(),
            pack: FakePack::default(),
        };
        bench.charger.start(&mut bench.io);
        bench
    }

    fn poll(&mut self) -> Evaluation {
        let input = PollInput {
            measured: Measurements::new(18_500, 1_900),
            regulation: RegulationMode::ConstantCurrent,
        };
        self.charger.poll(5, input, &mut self.io, &mut self.pack)
    }

    fn poll_until_transition(&mut self, max_polls: usize) -> Option<ChargeState> {
        (0..max_polls).find_map(|_| self.poll().transition())
    }

    /// Inserts the pack and runs until charging has passed its ignore window.
    fn charging() -> Self {
        let mut bench = Self::new();
        bench.pack.inserted = true;
        assert_eq!(
            bench.poll_until_transition(6),
            Some(ChargeState::MeasuringVoltage)
        );
        assert_eq!(bench.poll_until_transition(2), Some(ChargeState::Charging));
        bench.poll();
        bench.poll();
        assert_eq!(bench.charger.state(), ChargeState::Charging);
        bench
    }
}

#[test]
fn empty_connector_keeps_probing() {
    let mut bench = Bench::new();
    for _ in 0..40 {
        assert_eq!(bench.poll().transition(), None);
    }
    assert_eq!(bench.charger.state(), ChargeState::NoBattery);
    assert!(bench.pack.resets > 0);
    assert!(bench.charger.battery_message().is_none());
}

#[test]
fn five_presence_answers_start_a_charge() {
    let mut bench = Bench::new();
    bench.pack.inserted = true;

    // One debounce poll, four pending resets, then the confirming one.
    for _ in 0..5 {
        assert_eq!(bench.poll().transition(), None);
    }
    assert_eq!(
        bench.poll().transition(),
        Some(ChargeState::MeasuringVoltage)
    );

    assert_eq!(bench.pack.sent.as_slice(), &ENTER_CHARGE_MODE);
    let message = bench.charger.battery_message().expect("message read");
    assert_eq!(message[0], 0xA0);
    assert_eq!(message[BATTERY_MESSAGE_LEN - 1], 0xA0 ^ 31);
    assert_eq!(bench.io.sounds.as_slice(), &[SoundMap::DEFAULT.charge_start]);
    assert!(!bench.io.output);
}

#[test]
fn asserted_status_with_presence_is_a_battery_error() {
    let mut bench = Bench::charging();
    bench.pack.status = true;

    assert_eq!(bench.poll().transition(), None);
    assert_eq!(bench.poll().transition(), None);
    assert_eq!(bench.poll().transition(), Some(ChargeState::BatteryError));
    assert!(!bench.io.output);
    assert_eq!(
        bench.io.sounds.last(),
        Some(&SoundMap::DEFAULT.battery_error)
    );

    // Only an acknowledgment leaves the error state.
    for _ in 0..20 {
        assert_eq!(bench.poll(), Evaluation::NO_CHANGE);
    }
    bench.pack.status = false;
    assert_eq!(
        bench.charger.acknowledge(),
        Some(Evaluation::to(ChargeState::MeasuringVoltage))
    );
    assert_eq!(bench.poll_until_transition(2), Some(ChargeState::Charging));
}

#[test]
fn asserted_status_without_presence_is_a_removal() {
    let mut bench = Bench::charging();
    bench.pack.status = true;
    bench.pack.inserted = false;

    assert_eq!(bench.poll_until_transition(3), Some(ChargeState::NoBattery));
    assert!(bench.io.output, "probing output resumes after removal");
    assert_eq!(
        bench.io.sounds.last(),
        Some(&SoundMap::DEFAULT.charge_interrupted)
    );
}

#[test]
fn brief_status_glitch_is_ignored() {
    let mut bench = Bench::charging();
    bench.pack.status = true;
    bench.poll();
    bench.poll();
    bench.pack.status = false;
    for _ in 0..10 {
        assert_eq!(bench.poll().transition(), None);
    }
    assert_eq!(bench.charger.state(), ChargeState::Charging);
}
