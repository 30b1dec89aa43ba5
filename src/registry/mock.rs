//! Recording registry for tests.
//!
//! `RecordingRegistry` keeps collectors keyed by their descriptor ids, like
//! `prometheus::Registry` does, and writes every accepted call into a
//! shared [`Journal`]. Test collectors can write into the same journal, so
//! the relative order of stops and registry calls can be asserted.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use prometheus::core::Collector;

use super::{MetricsRegistry, RegistryError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEvent {
    Registered(String),
    Unregistered(String),
    Stopped(String),
}

/// Ordered log of registry calls and collector stops.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<JournalEvent>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: JournalEvent) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<JournalEvent> {
        self.events.lock().clone()
    }

    /// Returns the recorded events and clears the log.
    pub fn take(&self) -> Vec<JournalEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

/// Name a collector is recorded under: its first descriptor's name.
pub fn collector_name(collector: &dyn Collector) -> String {
    collector
        .desc()
        .first()
        .map(|desc| desc.fq_name.clone())
        .unwrap_or_default()
}

fn collector_key(collector: &dyn Collector) -> BTreeSet<u64> {
    collector.desc().iter().map(|desc| desc.id).collect()
}

#[derive(Default)]
struct RecordingState {
    registered: Vec<(BTreeSet<u64>, String)>,
    failing: HashSet<String>,
}

#[derive(Default)]
pub struct RecordingRegistry {
    journal: Journal,
    state: Mutex<RecordingState>,
}

impl RecordingRegistry {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            state: Mutex::new(RecordingState::default()),
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Makes every later registration of the named collector fail.
    pub fn fail_registration_of(&self, name: &str) {
        self.state.lock().failing.insert(name.to_string());
    }

    pub fn allow_registration_of(&self, name: &str) {
        self.state.lock().failing.remove(name);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.state
            .lock()
            .registered
            .iter()
            .any(|(_, registered)| registered == name)
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.state
            .lock()
            .registered
            .iter()
            .map(|(_, name)| name.clone())
            .collect()
    }
}

impl MetricsRegistry for RecordingRegistry {
    fn register(&self, collector: Arc<dyn Collector>) -> Result<(), RegistryError> {
        let name = collector_name(collector.as_ref());
        let key = collector_key(collector.as_ref());
        let mut state = self.state.lock();

        if state.failing.contains(&name) {
            return Err(RegistryError::Rejected(prometheus::Error::Msg(format!(
                "registration of {} refused",
                name
            ))));
        }
        if state.registered.iter().any(|(k, _)| *k == key) {
            return Err(RegistryError::AlreadyRegistered);
        }

        state.registered.push((key, name.clone()));
        self.journal.record(JournalEvent::Registered(name));
        Ok(())
    }

    fn unregister(&self, collector: Arc<dyn Collector>) -> bool {
        let key = collector_key(collector.as_ref());
        let mut state = self.state.lock();

        let Some(idx) = state.registered.iter().position(|(k, _)| *k == key) else {
            return false;
        };
        let (_, name) = state.registered.remove(idx);
        self.journal.record(JournalEvent::Unregistered(name));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{IntGauge, Opts};

    fn gauge(name: &str) -> Arc<dyn Collector> {
        Arc::new(IntGauge::with_opts(Opts::new(name, "test gauge")).unwrap())
    }

    #[test]
    fn test_records_register_and_unregister() {
        let registry = RecordingRegistry::new(Journal::new());
        let collector = gauge("a");

        registry.register(collector.clone()).unwrap();
        assert!(registry.is_registered("a"));
        assert!(registry.unregister(collector.clone()));
        assert!(!registry.unregister(collector));

        assert_eq!(
            registry.journal().events(),
            vec![
                JournalEvent::Registered("a".to_string()),
                JournalEvent::Unregistered("a".to_string()),
            ]
        );
    }

    #[test]
    fn test_rejects_duplicate_descriptors() {
        let registry = RecordingRegistry::new(Journal::new());
        let collector = gauge("a");

        registry.register(collector.clone()).unwrap();
        assert!(matches!(
            registry.register(collector),
            Err(RegistryError::AlreadyRegistered)
        ));
        assert_eq!(registry.registered_names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_injected_failure() {
        let registry = RecordingRegistry::new(Journal::new());
        registry.fail_registration_of("a");

        assert!(registry.register(gauge("a")).is_err());
        assert!(registry.journal().events().is_empty());

        registry.allow_registration_of("a");
        assert!(registry.register(gauge("a")).is_ok());
    }
}
