//! REPL tooling shared between the firmware and the emulator.
//!
//! Lines are tokenized and parsed in [`grammar`], turned into instrument
//! requests in [`commands`], and `status` output is rendered by [`status`].

pub mod catalog;
pub mod commands;
pub mod grammar;
pub mod status;
