//! Board-level glue: output stage, sound requests and the analog front end.
//!
//! Pin assignments for the STM32G0B1 board:
//!
//! | Signal               | Pin  |
//! |----------------------|------|
//! | Output relay         | PB3  |
//! | Regulator enable     | PB4  |
//! | Regulator CC flag    | PB5  |
//! | Battery data (1W)    | PA8  |
//! | Battery status       | PA9  |
//! | Output voltage       | PA0  |
//! | Output current       | PA1  |
//! | Input supply         | PA4  |
//!
//! The tick task owns the relay and the regulator enable. The charger task
//! only publishes whether it wants output; the failure monitor's directive
//! decides what actually reaches the pins.

pub mod one_wire;
pub mod power;

use charger_core::charger::ChargerIo;
use charger_core::failure::{OutputDirective, RegulationMode};
use charger_core::settings::SoundId;

use crate::status;

/// Drives one of the output stage control lines.
pub trait OutputSwitch {
    fn set_enabled(&mut self, enabled: bool);
}

/// Hands sound requests to whatever plays them.
pub trait SoundSink {
    fn play(&mut self, sound: SoundId);

    fn stop(&mut self);
}

/// Relay plus regulator enable, applied once per tick.
pub struct OutputStage<R, E> {
    relay: R,
    enable: E,
}

impl<R: OutputSwitch, E: OutputSwitch> OutputStage<R, E> {
    pub const fn new(relay: R, enable: E) -> Self {
        Self { relay, enable }
    }

    /// Applies the monitor's directive and returns whether the regulator runs.
    ///
    /// The regulator only runs while output is requested and the directive
    /// names a regulation mode, so it stays off through a trip and through
    /// the relay settle ticks.
    pub fn apply(&mut self, directive: OutputDirective, output_requested: bool) -> bool {
        let regulating = output_requested && directive.mode != RegulationMode::Off;
        self.relay.set_enabled(directive.relay_closed);
        self.enable.set_enabled(regulating);
        regulating
    }
}

/// Regulation mode reported back to the core from the regulator's CC flag.
#[must_use]
pub const fn reported_regulation(regulating: bool, cc_active: bool) -> RegulationMode {
    match (regulating, cc_active) {
        (false, _) => RegulationMode::Off,
        (true, true) => RegulationMode::ConstantCurrent,
        (true, false) => RegulationMode::ConstantVoltage,
    }
}

/// [`ChargerIo`] for the board: output requests go to the status words,
/// sounds to the sink.
pub struct BoardIo<S> {
    sounds: S,
}

impl<S: SoundSink> BoardIo<S> {
    pub const fn new(sounds: S) -> Self {
        Self { sounds }
    }
}

impl<S: SoundSink> ChargerIo for BoardIo<S> {
    fn set_output_enabled(&mut self, enabled: bool) {
        status::set_output_requested(enabled);
    }

    fn play_sound(&mut self, sound: SoundId) {
        self.sounds.play(sound);
    }

    fn stop_sound(&mut self) {
        self.sounds.stop();
    }

    fn reset_time_and_capacity(&mut self) {
        status::request_counter_reset();
    }
}

/// Logs sound requests; the board has no player wired yet.
#[derive(Default)]
pub struct LoggedSounds;

impl SoundSink for LoggedSounds {
    fn play(&mut self, sound: SoundId) {
        #[cfg(target_os = "none")]
        defmt::info!("sound: play {}", sound.0);
        #[cfg(not(target_os = "none"))]
        println!("sound: play {}", sound.0);
    }

    fn stop(&mut self) {
        #[cfg(target_os = "none")]
        defmt::info!("sound: stop");
        #[cfg(not(target_os = "none"))]
        println!("sound: stop");
    }
}

#[cfg(target_os = "none")]
impl OutputSwitch for embassy_stm32::gpio::Output<'_> {
    fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.set_high();
        } else {
            self.set_low();
        }
    }
}
