//! Metrics registry seam.
//!
//! The switcher never touches a process-wide registry; it receives an
//! `Arc<dyn MetricsRegistry>` at construction. `PrometheusRegistry` backs
//! the daemon, `mock::RecordingRegistry` backs the tests.

pub mod mock;

use std::sync::Arc;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, TextEncoder};
use thiserror::Error;

pub use mock::{Journal, JournalEvent, RecordingRegistry};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a collector with the same descriptors is already registered")]
    AlreadyRegistered,
    #[error("registry rejected collector: {0}")]
    Rejected(#[source] prometheus::Error),
    #[error("failed to encode metrics: {0}")]
    Encode(String),
}

impl From<prometheus::Error> for RegistryError {
    fn from(e: prometheus::Error) -> Self {
        match e {
            prometheus::Error::AlreadyReg => RegistryError::AlreadyRegistered,
            other => RegistryError::Rejected(other),
        }
    }
}

/// Store of the collectors exposed to scrapers.
pub trait MetricsRegistry: Send + Sync {
    /// Registers a collector. Fails when its descriptors collide with an
    /// already registered collector.
    fn register(&self, collector: Arc<dyn Collector>) -> Result<(), RegistryError>;

    /// Removes a collector. Returns false when it was not registered.
    fn unregister(&self, collector: Arc<dyn Collector>) -> bool;
}

/// Lets a shared collector be handed to `prometheus::Registry`, which takes
/// ownership of a box.
struct SharedCollector(Arc<dyn Collector>);

impl Collector for SharedCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.0.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.0.collect()
    }
}

/// Registry backed by `prometheus::Registry`.
#[derive(Clone, Default)]
pub struct PrometheusRegistry {
    inner: prometheus::Registry,
}

impl PrometheusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects all registered collectors.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.inner.gather()
    }

    /// Renders all metrics in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, RegistryError> {
        let families = self.gather();
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buf)
            .map_err(|e| RegistryError::Encode(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| RegistryError::Encode(e.to_string()))
    }
}

impl MetricsRegistry for PrometheusRegistry {
    fn register(&self, collector: Arc<dyn Collector>) -> Result<(), RegistryError> {
        self.inner.register(Box::new(SharedCollector(collector)))?;
        Ok(())
    }

    fn unregister(&self, collector: Arc<dyn Collector>) -> bool {
        self.inner
            .unregister(Box::new(SharedCollector(collector)))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{IntGauge, Opts};

    fn gauge(name: &str) -> Arc<dyn Collector> {
        let gauge = IntGauge::with_opts(Opts::new(name, "test gauge")).unwrap();
        gauge.set(7);
        Arc::new(gauge)
    }

    #[test]
    fn test_register_and_gather() {
        let registry = PrometheusRegistry::new();
        registry.register(gauge("ngxmon_test_a")).unwrap();

        let text = registry.encode_text().unwrap();
        assert!(text.contains("ngxmon_test_a 7"));
    }

    #[test]
    fn test_double_registration_is_rejected() {
        let registry = PrometheusRegistry::new();
        let collector = gauge("ngxmon_test_b");

        registry.register(collector.clone()).unwrap();
        let err = registry.register(collector).unwrap_err();

        assert!(matches!(err, RegistryError::AlreadyRegistered));
    }

    #[test]
    fn test_unregister_by_shared_handle() {
        let registry = PrometheusRegistry::new();
        let collector = gauge("ngxmon_test_c");

        registry.register(collector.clone()).unwrap();
        assert!(registry.unregister(collector.clone()));
        assert!(!registry.unregister(collector.clone()));
        assert!(registry.gather().is_empty());

        registry.register(collector).unwrap();
    }
}
