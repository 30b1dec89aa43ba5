//! Collectors for the Linux `/proc` filesystem.
//!
//! This module provides parsers and the named-process collector reading
//! per-process information from the `/proc` virtual filesystem.

pub mod parser;
pub mod process;

pub use process::{BinaryNameMatcher, CollectError, NamedProcessCollector, ProcessGroupStats};
