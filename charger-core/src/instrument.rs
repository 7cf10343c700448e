//! Top-level instrument: charger or adjustable power supply.
//!
//! The instrument owns the settings and the active charge session and is the
//! single writer of both. Operator requests arrive as [`ControlRequest`]
//! values, whether they come from the REPL or from local controls.

use core::fmt;

use crate::charger::makita::BatteryPort;
use crate::charger::{ChargeState, Charger, ChargerIo, Evaluation, PollInput};
use crate::measurement::Measurements;
use crate::profile::{ChargeProfile, PROFILE_SLOTS};
use crate::settings::{
    self, LoadOutcome, Settings, SettingsStore, StoreError, SupplySetpoint, SUPPLY_PRESETS,
};
use crate::setpoints::{self, RegulationTarget};

/// Which front end drives the output stage.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InstrumentMode {
    Charger,
    PowerSupply,
}

impl fmt::Display for InstrumentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InstrumentMode::Charger => "charger",
            InstrumentMode::PowerSupply => "supply",
        })
    }
}

/// Charging regime selected by the operator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChargeMode {
    /// Constant current only; the voltage target is raised to the output limit.
    Ccc,
    /// Constant current followed by constant voltage.
    CcCv,
}

impl fmt::Display for ChargeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChargeMode::Ccc => "ccc",
            ChargeMode::CcCv => "cccv",
        })
    }
}

/// Operator requests accepted by [`Instrument::apply`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlRequest {
    SelectProfile(u8),
    SetChargeMode(ChargeMode),
    SetChargeCurrent(u16),
    /// Confirms a battery error so charging may resume.
    Acknowledge,
    EnterPowerSupply { preset: Option<u8> },
    SetSupplyOutput(bool),
    ExitPowerSupply,
}

/// Successful results of a [`ControlRequest`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlAck {
    ProfileSelected { index: u8, outcome: LoadOutcome },
    ChargeModeSet(ChargeMode),
    ChargeCurrentSet(u16),
    Acknowledged { left_battery_error: bool },
    PowerSupplyEntered(SupplySetpoint),
    SupplyOutput(bool),
    ChargerEntered,
}

/// Reasons a [`ControlRequest`] was refused.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlError {
    ProfileOutOfRange(u8),
    PresetOutOfRange(u8),
    /// The request only makes sense in the other instrument mode.
    WrongMode(InstrumentMode),
    Store(StoreError),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::ProfileOutOfRange(index) => write!(f, "no profile {index}"),
            ControlError::PresetOutOfRange(index) => write!(f, "no supply preset {index}"),
            ControlError::WrongMode(mode) => write!(f, "not available in {mode} mode"),
            ControlError::Store(err) => write!(f, "storage: {err}"),
        }
    }
}

impl From<StoreError> for ControlError {
    fn from(err: StoreError) -> Self {
        ControlError::Store(err)
    }
}

/// Power-supply mode state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PowerSupply {
    pub setpoint: SupplySetpoint,
    pub output_enabled: bool,
}

/// Where the startup settings and profile came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StartupReport {
    pub settings: LoadOutcome,
    pub profile: LoadOutcome,
}

/// Settings, mode and the front end currently in control.
#[derive(Clone, Debug)]
pub struct Instrument {
    settings: Settings,
    mode: InstrumentMode,
    charger: Charger,
    supply: PowerSupply,
}

impl Instrument {
    #[must_use]
    pub fn new(settings: Settings, profile: ChargeProfile) -> Self {
        Self {
            charger: Charger::new(profile, settings.calibration, settings.sounds),
            supply: PowerSupply {
                setpoint: settings.supply,
                output_enabled: false,
            },
            settings,
            mode: InstrumentMode::Charger,
        }
    }

    /// Loads settings and the selected profile, substituting defaults when invalid.
    pub fn load<S: SettingsStore>(store: &mut S) -> (Self, StartupReport) {
        let loaded_settings = settings::load_settings(store);
        let slot = usize::from(loaded_settings.value.profile_index);
        let loaded_profile = settings::load_profile(store, slot);
        let report = StartupReport {
            settings: loaded_settings.outcome,
            profile: loaded_profile.outcome,
        };
        (Self::new(loaded_settings.value, loaded_profile.value), report)
    }

    #[must_use]
    pub const fn mode(&self) -> InstrumentMode {
        self.mode
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub const fn charger(&self) -> &Charger {
        &self.charger
    }

    #[must_use]
    pub const fn supply(&self) -> &PowerSupply {
        &self.supply
    }

    #[must_use]
    pub fn charge_mode(&self) -> ChargeMode {
        if self.charger.profile().ccc_mode() {
            ChargeMode::Ccc
        } else {
            ChargeMode::CcCv
        }
    }

    /// Starts the charger front end.
    pub fn start<IO: ChargerIo + ?Sized>(&mut self, io: &mut IO) {
        self.mode = InstrumentMode::Charger;
        self.charger.start(io);
    }

    /// Targets the PID loop should track right now.
    #[must_use]
    pub fn target(&self) -> RegulationTarget {
        match self.mode {
            InstrumentMode::Charger => self.charger.target(),
            InstrumentMode::PowerSupply => {
                setpoints::power_supply(self.supply.setpoint, self.settings.calibration)
            }
        }
    }

    /// [`target`](Self::target) converted back to display units for the failure monitor.
    #[must_use]
    pub fn target_display(&self) -> Measurements {
        let target = self.target();
        let calibration = self.settings.calibration;
        Measurements {
            voltage: calibration.voltage.adc_to_display(target.voltage_raw),
            current: calibration.current.adc_to_display(target.current_raw),
        }
    }

    /// Polls the charge state machine; power-supply mode has nothing to evaluate.
    pub fn poll<IO, P>(
        &mut self,
        elapsed_ticks: u16,
        input: PollInput,
        io: &mut IO,
        port: &mut P,
    ) -> Option<Evaluation>
    where
        IO: ChargerIo + ?Sized,
        P: BatteryPort + ?Sized,
    {
        match self.mode {
            InstrumentMode::Charger => Some(self.charger.poll(elapsed_ticks, input, io, port)),
            InstrumentMode::PowerSupply => None,
        }
    }

    /// Applies one operator request.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] when the request is out of range, does not
    /// apply to the current mode, or could not be persisted.
    pub fn apply<IO, S>(
        &mut self,
        request: ControlRequest,
        io: &mut IO,
        store: &mut S,
    ) -> Result<ControlAck, ControlError>
    where
        IO: ChargerIo + ?Sized,
        S: SettingsStore,
    {
        match request {
            ControlRequest::SelectProfile(index) => self.select_profile(index, io, store),
            ControlRequest::SetChargeMode(mode) => {
                self.require_mode(InstrumentMode::Charger)?;
                self.edit_profile(store, |charger| charger.set_ccc_mode(mode == ChargeMode::Ccc))?;
                Ok(ControlAck::ChargeModeSet(mode))
            }
            ControlRequest::SetChargeCurrent(current) => {
                self.require_mode(InstrumentMode::Charger)?;
                let applied =
                    self.edit_profile(store, |charger| charger.set_charge_current(current))?;
                Ok(ControlAck::ChargeCurrentSet(applied))
            }
            ControlRequest::Acknowledge => {
                let left_battery_error = self.charger.acknowledge().is_some();
                Ok(ControlAck::Acknowledged { left_battery_error })
            }
            ControlRequest::EnterPowerSupply { preset } => self.enter_power_supply(preset, io, store),
            ControlRequest::SetSupplyOutput(enabled) => {
                self.require_mode(InstrumentMode::PowerSupply)?;
                self.supply.output_enabled = enabled;
                io.set_output_enabled(enabled);
                Ok(ControlAck::SupplyOutput(enabled))
            }
            ControlRequest::ExitPowerSupply => {
                self.require_mode(InstrumentMode::PowerSupply)?;
                self.supply.output_enabled = false;
                self.start(io);
                Ok(ControlAck::ChargerEntered)
            }
        }
    }

    fn require_mode(&self, mode: InstrumentMode) -> Result<(), ControlError> {
        if self.mode == mode {
            Ok(())
        } else {
            Err(ControlError::WrongMode(self.mode))
        }
    }

    fn select_profile<IO, S>(
        &mut self,
        index: u8,
        io: &mut IO,
        store: &mut S,
    ) -> Result<ControlAck, ControlError>
    where
        IO: ChargerIo + ?Sized,
        S: SettingsStore,
    {
        let slot = usize::from(index);
        if slot >= PROFILE_SLOTS {
            return Err(ControlError::ProfileOutOfRange(index));
        }

        let loaded = settings::load_profile(store, slot);
        let mut next = self.settings;
        next.profile_index = index;
        settings::save_settings(store, &next)?;
        self.settings = next;

        if self.mode == InstrumentMode::Charger {
            self.charger.select_profile(loaded.value, io);
        } else {
            self.charger = Charger::new(
                loaded.value,
                self.settings.calibration,
                self.settings.sounds,
            );
        }

        Ok(ControlAck::ProfileSelected {
            index,
            outcome: loaded.outcome,
        })
    }

    fn enter_power_supply<IO, S>(
        &mut self,
        preset: Option<u8>,
        io: &mut IO,
        store: &mut S,
    ) -> Result<ControlAck, ControlError>
    where
        IO: ChargerIo + ?Sized,
        S: SettingsStore,
    {
        if let Some(index) = preset {
            if usize::from(index) >= SUPPLY_PRESETS {
                return Err(ControlError::PresetOutOfRange(index));
            }
            let mut next = self.settings;
            next.load_supply_preset(usize::from(index));
            settings::save_settings(store, &next)?;
            self.settings = next;
        }

        io.set_output_enabled(false);
        self.mode = InstrumentMode::PowerSupply;
        self.charger = Charger::new(
            self.charger.profile().clone(),
            self.settings.calibration,
            self.settings.sounds,
        );
        self.supply = PowerSupply {
            setpoint: self.settings.supply.clamped(),
            output_enabled: false,
        };
        Ok(ControlAck::PowerSupplyEntered(self.supply.setpoint))
    }

    /// Applies `edit` to a copy of the charger and keeps it only once its profile is stored.
    fn edit_profile<S, T>(
        &mut self,
        store: &mut S,
        edit: impl FnOnce(&mut Charger) -> T,
    ) -> Result<T, ControlError>
    where
        S: SettingsStore,
    {
        let mut charger = self.charger.clone();
        let applied = edit(&mut charger);
        let slot = usize::from(self.settings.profile_index);
        settings::save_profile(store, slot, charger.profile())?;
        self.charger = charger;
        Ok(applied)
    }

    /// Returns `true` while the charger sits in a state that needs acknowledgment.
    #[must_use]
    pub fn awaiting_acknowledgment(&self) -> bool {
        self.mode == InstrumentMode::Charger && self.charger.state() == ChargeState::BatteryError
    }
}
