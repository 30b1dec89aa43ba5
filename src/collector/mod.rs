//! Metric collectors for a running nginx instance.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Collectors                            │
//! │  ┌──────────────────────┐   ┌──────────────────────────────┐ │
//! │  │ NamedProcessCollector│   │ BasicStatusCollector  (xor)  │ │
//! │  │  - /proc/[pid]/*     │   │ VtsCollector                 │ │
//! │  └──────────┬───────────┘   └──────────────┬───────────────┘ │
//! │             │                              │ ScrapeWorker    │
//! │      ┌──────▼──────┐                ┌──────▼───────┐         │
//! │      │  FileSystem │ (trait)        │ StatusSource │ (trait) │
//! │      └──────┬──────┘                └──────┬───────┘         │
//! └─────────────┼──────────────────────────────┼─────────────────┘
//!        ┌──────┴──────┐                ┌──────┴───────┐
//!   ┌────▼───┐    ┌────▼───┐       ┌────▼─────┐  ┌─────▼────┐
//!   │ RealFs │    │ MockFs │       │HttpSource│  │MockSource│
//!   └────────┘    └────────┘       └──────────┘  └──────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use prometheus::core::Collector;
//! use ngxmon::collector::{BinaryNameMatcher, MockFs, NamedProcessCollector};
//!
//! let fs = MockFs::nginx_ingress();
//! let matcher = BinaryNameMatcher::new("nginx", "/usr/sbin/nginx");
//! let collector = NamedProcessCollector::new(fs, "/proc", matcher).unwrap();
//! assert!(!collector.collect().is_empty());
//! ```

pub mod mock;
pub mod procfs;
pub mod status;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use mock::{MockFs, MockProcess};
pub use procfs::{BinaryNameMatcher, CollectError, NamedProcessCollector};
pub use status::{
    BasicStatusCollector, HttpSource, MockSource, StatusEndpoint, StatusError, StatusSource,
    Stoppable, VtsCollector,
};
pub use traits::{FileSystem, RealFs};

/// Metric namespace shared by every collector.
pub const NAMESPACE: &str = "nginx";
