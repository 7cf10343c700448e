//! Settings storage shared between the charger task and the REPL.
//!
//! The cell holds a RAM-backed [`MemoryStore`]. Records written here last
//! until reset: every boot starts from a blank store, so the instrument comes
//! up on [`Settings::DEFAULT`](charger_core::settings::Settings::DEFAULT) and
//! the built-in profile and reports both loads as defaulted. A non-volatile
//! medium plugs in by replacing the cell's contents with another
//! [`SettingsStore`]; [`SharedStore`] and its callers stay as they are.

use core::cell::RefCell;

use charger_core::settings::{MemoryStore, ProfileRecord, SettingsRecord, SettingsStore, StoreError};
use embassy_sync::blocking_mutex::Mutex;

use crate::control::ControlMutex;

pub type StoreCell = Mutex<ControlMutex, RefCell<MemoryStore>>;

/// Creates an empty store cell.
pub fn new_cell() -> StoreCell {
    Mutex::new(RefCell::new(MemoryStore::new()))
}

/// [`SettingsStore`] handle that locks the shared cell per record access.
#[derive(Clone, Copy)]
pub struct SharedStore<'a> {
    cell: &'a StoreCell,
}

impl<'a> SharedStore<'a> {
    pub const fn new(cell: &'a StoreCell) -> Self {
        Self { cell }
    }
}

impl SettingsStore for SharedStore<'_> {
    fn read_profile(&mut self, slot: usize) -> Result<Option<ProfileRecord>, StoreError> {
        self.cell.lock(|store| store.borrow_mut().read_profile(slot))
    }

    fn write_profile(&mut self, slot: usize, record: &ProfileRecord) -> Result<(), StoreError> {
        self.cell
            .lock(|store| store.borrow_mut().write_profile(slot, record))
    }

    fn read_settings(&mut self) -> Result<Option<SettingsRecord>, StoreError> {
        self.cell.lock(|store| store.borrow_mut().read_settings())
    }

    fn write_settings(&mut self, record: &SettingsRecord) -> Result<(), StoreError> {
        self.cell.lock(|store| store.borrow_mut().write_settings(record))
    }
}
