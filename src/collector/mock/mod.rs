//! Mock filesystem and `/proc` scenarios for collector tests.

mod filesystem;
mod scenarios;

pub use filesystem::{MockFs, MockProcess};
pub use scenarios::SCENARIO_BOOT_TIME;
