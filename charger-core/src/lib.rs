#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// Control core of a bench battery charger and adjustable power supply.
//
// Everything here is platform independent: the firmware feeds it ADC samples
// and carries out its output decisions, while the emulator drives the same
// code against a simulated battery on the host.

pub mod charger;
pub mod counters;
pub mod failure;
pub mod instrument;
pub mod measurement;
pub mod profile;
pub mod repl;
pub mod settings;
pub mod setpoints;
pub mod telemetry;
