//! Persistent instrument settings and the profile catalog store.
//!
//! Storage is an external collaborator behind [`SettingsStore`]. Every record
//! carries a validity marker; a missing record, a stale marker or a profile
//! that fails [`ChargeProfile::validate`] is replaced with the compiled-in
//! default and reported as [`LoadOutcome::Defaulted`].

use core::fmt;

use crate::measurement::ChannelCalibration;
use crate::profile::{self, ChargeProfile, PROFILE_SLOTS};

/// Marker written alongside valid settings records.
pub const SETTINGS_MARKER: u16 = 0x1236;
/// Marker written alongside valid profile records.
pub const PROFILE_MARKER: u8 = 0x18;
/// Number of stored power-supply presets.
pub const SUPPLY_PRESETS: usize = 10;

/// Melody identifier understood by the sound collaborator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SoundId(pub u8);

/// Melodies played for each charger event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SoundMap {
    pub charge_start: SoundId,
    pub charge_end: SoundId,
    pub charge_interrupted: SoundId,
    pub bad_battery: SoundId,
    pub battery_error: SoundId,
}

impl SoundMap {
    pub const DEFAULT: Self = Self {
        charge_start: SoundId(1),
        charge_end: SoundId(2),
        charge_interrupted: SoundId(3),
        bad_battery: SoundId(4),
        battery_error: SoundId(5),
    };
}

impl Default for SoundMap {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Voltage (mV) and current limit (mA) for power-supply mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SupplySetpoint {
    pub voltage: u16,
    pub current: u16,
}

impl SupplySetpoint {
    #[must_use]
    pub const fn new(voltage: u16, current: u16) -> Self {
        Self { voltage, current }
    }

    /// Clamps both values to the output stage limits.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            voltage: self.voltage.min(profile::MAX_VOLTAGE),
            current: self.current.min(profile::MAX_CURRENT),
        }
    }
}

const DEFAULT_SUPPLY_PRESETS: [SupplySetpoint; SUPPLY_PRESETS] = [
    SupplySetpoint::new(5_000, 6_000),
    SupplySetpoint::new(12_000, 6_000),
    SupplySetpoint::new(21_000, 6_000),
    SupplySetpoint::new(4_200, 1_500),
    SupplySetpoint::new(8_400, 1_500),
    SupplySetpoint::new(12_600, 1_500),
    SupplySetpoint::new(16_800, 1_500),
    SupplySetpoint::new(21_000, 1_500),
    SupplySetpoint::new(4_200, 300),
    SupplySetpoint::new(8_400, 300),
];

/// Instrument-wide configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Settings {
    pub calibration: ChannelCalibration,
    pub sounds: SoundMap,
    pub profile_index: u8,
    pub supply: SupplySetpoint,
    pub supply_presets: [SupplySetpoint; SUPPLY_PRESETS],
}

impl Settings {
    pub const DEFAULT: Self = Self {
        calibration: ChannelCalibration::DEFAULT,
        sounds: SoundMap::DEFAULT,
        profile_index: 0,
        supply: SupplySetpoint::new(12_000, 1_000),
        supply_presets: DEFAULT_SUPPLY_PRESETS,
    };

    /// Copies preset `index` into the active power-supply setpoint.
    pub fn load_supply_preset(&mut self, index: usize) -> Option<SupplySetpoint> {
        let preset = *self.supply_presets.get(index)?;
        self.supply = preset;
        Some(preset)
    }

    /// Stores the active power-supply setpoint into preset `index`.
    pub fn save_supply_preset(&mut self, index: usize) -> Option<SupplySetpoint> {
        let slot = self.supply_presets.get_mut(index)?;
        *slot = self.supply;
        Some(self.supply)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Stored settings with their validity marker.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SettingsRecord {
    pub marker: u16,
    pub settings: Settings,
}

/// Stored profile with its validity marker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProfileRecord {
    pub marker: u8,
    pub profile: ChargeProfile,
}

/// Failures reported by a backing store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StoreError {
    /// The profile slot does not exist.
    SlotOutOfRange(usize),
    /// The underlying medium rejected the operation.
    Medium,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::SlotOutOfRange(slot) => write!(f, "profile slot {slot} out of range"),
            StoreError::Medium => f.write_str("storage medium error"),
        }
    }
}

/// Atomic record access to persistent storage.
pub trait SettingsStore {
    /// Reads the raw profile record in `slot`, `None` when never written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the medium cannot be read.
    fn read_profile(&mut self, slot: usize) -> Result<Option<ProfileRecord>, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] when the slot is invalid or the write fails.
    fn write_profile(&mut self, slot: usize, record: &ProfileRecord) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] when the medium cannot be read.
    fn read_settings(&mut self) -> Result<Option<SettingsRecord>, StoreError>;

    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn write_settings(&mut self, record: &SettingsRecord) -> Result<(), StoreError>;
}

/// Whether a loaded value came from storage or from compiled-in defaults.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadOutcome {
    Stored,
    Defaulted,
}

/// A value paired with where it came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Loaded<T> {
    pub value: T,
    pub outcome: LoadOutcome,
}

impl<T> Loaded<T> {
    #[must_use]
    pub fn was_defaulted(&self) -> bool {
        self.outcome == LoadOutcome::Defaulted
    }
}

/// Loads the profile in `slot`, falling back to the built-in profile on any failure.
pub fn load_profile<S: SettingsStore>(store: &mut S, slot: usize) -> Loaded<ChargeProfile> {
    let slot = if slot < PROFILE_SLOTS { slot } else { 0 };
    match store.read_profile(slot) {
        Ok(Some(record))
            if record.marker == PROFILE_MARKER && record.profile.validate().is_ok() =>
        {
            Loaded {
                value: record.profile,
                outcome: LoadOutcome::Stored,
            }
        }
        _ => Loaded {
            value: profile::builtin(slot),
            outcome: LoadOutcome::Defaulted,
        },
    }
}

/// Validates and stores `profile` in `slot`.
///
/// # Errors
///
/// Returns [`StoreError::SlotOutOfRange`] for slots beyond the catalog, or
/// the store's own error.
pub fn save_profile<S: SettingsStore>(
    store: &mut S,
    slot: usize,
    profile: &ChargeProfile,
) -> Result<(), StoreError> {
    if slot >= PROFILE_SLOTS {
        return Err(StoreError::SlotOutOfRange(slot));
    }
    store.write_profile(
        slot,
        &ProfileRecord {
            marker: PROFILE_MARKER,
            profile: profile.clone(),
        },
    )
}

/// Loads settings, falling back to [`Settings::DEFAULT`] on any failure.
pub fn load_settings<S: SettingsStore>(store: &mut S) -> Loaded<Settings> {
    match store.read_settings() {
        Ok(Some(record)) if record.marker == SETTINGS_MARKER => Loaded {
            value: record.settings,
            outcome: LoadOutcome::Stored,
        },
        _ => Loaded {
            value: Settings::DEFAULT,
            outcome: LoadOutcome::Defaulted,
        },
    }
}

/// # Errors
///
/// Returns the store's error when the write fails.
pub fn save_settings<S: SettingsStore>(store: &mut S, settings: &Settings) -> Result<(), StoreError> {
    store.write_settings(&SettingsRecord {
        marker: SETTINGS_MARKER,
        settings: *settings,
    })
}

/// RAM-backed store used by the emulator, tests and boards without data flash.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    profiles: [Option<ProfileRecord>; PROFILE_SLOTS],
    settings: Option<SettingsRecord>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites a profile record as-is, marker included.
    pub fn put_profile_record(&mut self, slot: usize, record: ProfileRecord) {
        if let Some(entry) = self.profiles.get_mut(slot) {
            *entry = Some(record);
        }
    }

    /// Overwrites the settings record as-is, marker included.
    pub fn put_settings_record(&mut self, record: SettingsRecord) {
        self.settings = Some(record);
    }
}

impl SettingsStore for MemoryStore {
    fn read_profile(&mut self, slot: usize) -> Result<Option<ProfileRecord>, StoreError> {
        self.profiles
            .get(slot)
            .cloned()
            .ok_or(StoreError::SlotOutOfRange(slot))
    }

    fn write_profile(&mut self, slot: usize, record: &ProfileRecord) -> Result<(), StoreError> {
        let entry = self
            .profiles
            .get_mut(slot)
            .ok_or(StoreError::SlotOutOfRange(slot))?;
        *entry = Some(record.clone());
        Ok(())
    }

    fn read_settings(&mut self) -> Result<Option<SettingsRecord>, StoreError> {
        Ok(self.settings)
    }

    fn write_settings(&mut self, record: &SettingsRecord) -> Result<(), StoreError> {
        self.settings = Some(*record);
        Ok(())
    }
}
