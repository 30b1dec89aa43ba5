//! ngxmon - Prometheus exporter core for nginx-based ingress controllers.
//!
//! This library provides:
//! - `collector` - nginx process and status collectors (`/proc`, stub_status, VTS)
//! - `registry` - metrics registry seam (Prometheus-backed and recording fake)
//! - `switcher` - status-module mode switcher owning the collector lifetimes
//! - `config` - reloadable TOML configuration
//!
//! The `ngxmond` binary wires these together behind a `/metrics` endpoint.

pub mod collector;
pub mod config;
pub mod registry;
pub mod switcher;

pub use switcher::{StatusMode, StatusTarget, SwitchError, Switcher};

/// Crate version, reported by the daemon at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
