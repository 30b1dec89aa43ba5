//! Collectors scraping nginx status endpoints.
//!
//! Two mutually exclusive variants exist:
//! - [`BasicStatusCollector`] reads the `stub_status` text page;
//! - [`VtsCollector`] reads the JSON document of nginx-module-vts.
//!
//! Each collector owns a scrape worker thread which holds the
//! [`StatusSource`]. [`Stoppable::stop`] shuts the worker down; a stopped
//! collector reports no samples.

pub mod basic;
pub mod source;
pub mod vts;
mod worker;

use prometheus::Opts;
use prometheus::core::Collector;
use thiserror::Error;

pub use basic::{BasicStatus, BasicStatusCollector, parse_stub_status};
pub use source::{HttpSource, MockSource, StatusSource};
pub use vts::{VtsCollector, VtsStatus, parse_vts};

use crate::collector::NAMESPACE;

/// Errors raised while building or scraping a status collector.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("no status document served at {0}")]
    NotFound(String),
    #[error("malformed stub_status: {0}")]
    Parse(String),
    #[error("malformed vts document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("collector is stopped")]
    Stopped,
    #[error("failed to spawn scrape worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("invalid metric: {0}")]
    Metric(#[from] prometheus::Error),
}

/// A collector with a background scrape worker that must be stopped
/// before it is dropped from the registry.
pub trait Stoppable: Collector {
    /// Stops the scrape worker. Calling it more than once is a no-op.
    fn stop(&self);
}

/// Where a status collector scrapes and how its samples are labelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEndpoint {
    /// Namespace watched by the ingress controller (`namespace` label).
    pub namespace: String,
    /// Ingress class served by the controller (`ingress_class` label).
    pub class: String,
    /// Local port nginx exposes its status locations on.
    pub port: u16,
    /// Location of the status document, e.g. `/nginx_status`.
    pub path: String,
}

impl StatusEndpoint {
    /// Metric options with the endpoint's constant labels applied.
    pub(crate) fn opts(&self, subsystem: &str, name: &str, help: &str) -> Opts {
        Opts::new(name, help)
            .namespace(NAMESPACE)
            .subsystem(subsystem)
            .const_label("ingress_class", self.class.clone())
            .const_label("namespace", self.namespace.clone())
    }
}
