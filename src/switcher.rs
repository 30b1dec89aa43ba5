//! Status-module mode switcher.
//!
//! The switcher owns the collectors attached to the monitored nginx:
//! the process collector, registered once for its whole lifetime, and at
//! most one status collector variant selected by [`StatusMode`].
//!
//! A transition always stops and unregisters the old variant before the new
//! one is built and registered, since both scrape the same status port and
//! share metric names with the registry. Requests for the mode that is
//! already active do nothing.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use prometheus::core::Collector;
use thiserror::Error;
use tracing::{debug, info};

use crate::collector::{
    BasicStatusCollector, BinaryNameMatcher, CollectError, FileSystem, HttpSource,
    NamedProcessCollector, StatusEndpoint, StatusError, Stoppable, VtsCollector,
};
use crate::registry::{MetricsRegistry, RegistryError};

/// Location of the `stub_status` page.
pub const NGX_STATUS_PATH: &str = "/nginx_status";
/// Location of the nginx-module-vts JSON document.
pub const NGX_VTS_PATH: &str = "/nginx_status/format/json";

/// Process name the process collector matches on.
const NGINX_PROCESS_NAME: &str = "nginx";

/// Which status module feeds the status collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusMode {
    /// nginx `stub_status`.
    Default,
    /// nginx-module-vts (virtual host traffic status).
    Extended,
}

impl StatusMode {
    /// Status location scraped in this mode.
    pub fn endpoint_path(self) -> &'static str {
        match self {
            StatusMode::Default => NGX_STATUS_PATH,
            StatusMode::Extended => NGX_VTS_PATH,
        }
    }

    /// Maps the controller's `enable-vts-status` setting to a mode.
    pub fn from_vts_enabled(enabled: bool) -> Self {
        if enabled {
            StatusMode::Extended
        } else {
            StatusMode::Default
        }
    }
}

impl fmt::Display for StatusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusMode::Default => write!(f, "default"),
            StatusMode::Extended => write!(f, "vts"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status module {0:?} (expected default or vts)")]
pub struct ParseModeError(String);

impl FromStr for StatusMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "basic" => Ok(StatusMode::Default),
            "vts" | "extended" => Ok(StatusMode::Extended),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

struct ModeDisplay(Option<StatusMode>);

impl fmt::Display for ModeDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(mode) => mode.fmt(f),
            None => write!(f, "none"),
        }
    }
}

/// Identity of the monitored controller and where its nginx serves status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTarget {
    pub namespace: String,
    pub class: String,
    pub port: u16,
}

impl StatusTarget {
    pub fn new(namespace: impl Into<String>, class: impl Into<String>, port: u16) -> Self {
        Self {
            namespace: namespace.into(),
            class: class.into(),
            port,
        }
    }

    /// Endpoint a status collector for `mode` scrapes.
    pub fn endpoint(&self, mode: StatusMode) -> StatusEndpoint {
        StatusEndpoint {
            namespace: self.namespace.clone(),
            class: self.class.clone(),
            port: self.port,
            path: mode.endpoint_path().to_string(),
        }
    }
}

/// Builds the collectors the switcher manages.
pub trait CollectorFactory: Send + Sync {
    type Process: Collector + 'static;
    type Basic: Stoppable + 'static;
    type Extended: Stoppable + 'static;

    fn process(&self, matcher: &BinaryNameMatcher) -> Result<Self::Process, CollectError>;
    fn basic(&self, endpoint: StatusEndpoint) -> Result<Self::Basic, StatusError>;
    fn extended(&self, endpoint: StatusEndpoint) -> Result<Self::Extended, StatusError>;
}

/// Production factory: procfs process collector and HTTP status collectors.
pub struct NginxCollectorFactory<F: FileSystem + Clone> {
    fs: F,
    proc_path: String,
    scrape_timeout: Duration,
}

impl<F: FileSystem + Clone> NginxCollectorFactory<F> {
    pub fn new(fs: F, proc_path: impl Into<String>, scrape_timeout: Duration) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            scrape_timeout,
        }
    }
}

impl<F: FileSystem + Clone + 'static> CollectorFactory for NginxCollectorFactory<F> {
    type Process = NamedProcessCollector<F>;
    type Basic = BasicStatusCollector;
    type Extended = VtsCollector;

    fn process(&self, matcher: &BinaryNameMatcher) -> Result<Self::Process, CollectError> {
        NamedProcessCollector::new(self.fs.clone(), self.proc_path.clone(), matcher.clone())
    }

    fn basic(&self, endpoint: StatusEndpoint) -> Result<Self::Basic, StatusError> {
        let source = HttpSource::new(endpoint.port, self.scrape_timeout);
        BasicStatusCollector::new(endpoint, source)
    }

    fn extended(&self, endpoint: StatusEndpoint) -> Result<Self::Extended, StatusError> {
        let source = HttpSource::new(endpoint.port, self.scrape_timeout);
        VtsCollector::new(endpoint, source)
    }
}

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("failed to create nginx process collector: {0}")]
    ProcessCollector(#[source] CollectError),
    #[error("failed to create {mode} status collector: {source}")]
    Build {
        mode: StatusMode,
        #[source]
        source: StatusError,
    },
    #[error("failed to register {collector} collector: {source}")]
    Register {
        collector: String,
        #[source]
        source: RegistryError,
    },
}

/// The status collector currently alive, tagged with its variant.
enum ActiveStatus<B, E> {
    Basic(Arc<B>),
    Extended(Arc<E>),
}

impl<B: Stoppable + 'static, E: Stoppable + 'static> ActiveStatus<B, E> {
    fn mode(&self) -> StatusMode {
        match self {
            ActiveStatus::Basic(_) => StatusMode::Default,
            ActiveStatus::Extended(_) => StatusMode::Extended,
        }
    }

    fn collector(&self) -> Arc<dyn Collector> {
        match self {
            ActiveStatus::Basic(c) => {
                let c: Arc<dyn Collector> = c.clone();
                c
            }
            ActiveStatus::Extended(c) => {
                let c: Arc<dyn Collector> = c.clone();
                c
            }
        }
    }

    fn stop(&self) {
        match self {
            ActiveStatus::Basic(c) => c.stop(),
            ActiveStatus::Extended(c) => c.stop(),
        }
    }
}

struct SwitchState<B, E> {
    /// `None` until the first transition completes, and after a failed one.
    mode: Option<StatusMode>,
    active: Option<ActiveStatus<B, E>>,
}

/// Keeps exactly one status collector variant registered.
///
/// Transitions are serialized by an internal lock, so `request_mode` may be
/// called from any thread.
pub struct Switcher<F: CollectorFactory> {
    registry: Arc<dyn MetricsRegistry>,
    factory: F,
    target: StatusTarget,
    process: Arc<F::Process>,
    state: Mutex<SwitchState<F::Basic, F::Extended>>,
}

impl<F: CollectorFactory> Switcher<F> {
    /// Creates the process collector for `binary` and registers it.
    ///
    /// No status collector is started; the first [`Switcher::request_mode`]
    /// always performs a transition.
    pub fn new(
        registry: Arc<dyn MetricsRegistry>,
        factory: F,
        target: StatusTarget,
        binary: &str,
    ) -> Result<Self, SwitchError> {
        info!(
            namespace = %target.namespace,
            class = %target.class,
            "starting new nginx stats collector for ingress controller"
        );
        info!(port = target.port, "collector extracting information from status port");

        let matcher = BinaryNameMatcher::new(NGINX_PROCESS_NAME, binary);
        let process = Arc::new(
            factory
                .process(&matcher)
                .map_err(SwitchError::ProcessCollector)?,
        );
        registry
            .register(process.clone())
            .map_err(|source| SwitchError::Register {
                collector: "nginx process".to_string(),
                source,
            })?;

        Ok(Self {
            registry,
            factory,
            target,
            process,
            state: Mutex::new(SwitchState {
                mode: None,
                active: None,
            }),
        })
    }

    pub fn target(&self) -> &StatusTarget {
        &self.target
    }

    /// The process collector, registered for the switcher's whole lifetime.
    pub fn process_collector(&self) -> &Arc<F::Process> {
        &self.process
    }

    /// Mode of the registered status collector, `None` before the first
    /// transition.
    pub fn current_mode(&self) -> Option<StatusMode> {
        self.state.lock().mode
    }

    /// Returns true when a status collector for `mode` is alive.
    pub fn is_active(&self, mode: StatusMode) -> bool {
        self.state
            .lock()
            .active
            .as_ref()
            .is_some_and(|active| active.mode() == mode)
    }

    /// Switches the status collector to `target`.
    ///
    /// Returns `Ok(false)` without touching anything when `target` is already
    /// active. On failure no status collector is registered and the mode is
    /// reset, so the next request performs a full transition.
    pub fn request_mode(&self, target: StatusMode) -> Result<bool, SwitchError> {
        let mut state = self.state.lock();
        if state.mode == Some(target) {
            debug!(mode = %target, "status module unchanged");
            return Ok(false);
        }

        info!(
            "changing prometheus collector from {} to {}",
            ModeDisplay(state.mode),
            target
        );
        self.stop(&mut state);
        self.start(&mut state, target)?;
        Ok(true)
    }

    /// Stops and unregisters the status collector. The process collector
    /// stays registered.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.active.is_some() {
            info!(mode = %ModeDisplay(state.mode), "stopping status collector");
        }
        self.stop(&mut state);
    }

    fn stop(&self, state: &mut SwitchState<F::Basic, F::Extended>) {
        state.mode = None;
        let Some(active) = state.active.take() else {
            return;
        };
        active.stop();
        if !self.registry.unregister(active.collector()) {
            debug!(mode = %active.mode(), "status collector was not registered");
        }
    }

    fn start(
        &self,
        state: &mut SwitchState<F::Basic, F::Extended>,
        mode: StatusMode,
    ) -> Result<(), SwitchError> {
        let endpoint = self.target.endpoint(mode);
        let build_error = |source| SwitchError::Build { mode, source };

        let active = match mode {
            StatusMode::Default => {
                ActiveStatus::Basic(Arc::new(self.factory.basic(endpoint).map_err(build_error)?))
            }
            StatusMode::Extended => ActiveStatus::Extended(Arc::new(
                self.factory.extended(endpoint).map_err(build_error)?,
            )),
        };

        if let Err(source) = self.registry.register(active.collector()) {
            active.stop();
            return Err(SwitchError::Register {
                collector: format!("{} status", mode),
                source,
            });
        }

        state.active = Some(active);
        state.mode = Some(mode);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use prometheus::core::Desc;
    use prometheus::proto::MetricFamily;
    use prometheus::{IntGauge, Opts};

    use crate::collector::MockFs;
    use crate::registry::mock::collector_name;
    use crate::registry::{Journal, JournalEvent, PrometheusRegistry, RecordingRegistry};

    const BASIC: &str = "nginx_active_connections";
    const VTS: &str = "nginx_vts_connections";
    const PROCESS: &str = "nginx_num_procs";

    struct FakeStatus {
        name: String,
        gauge: IntGauge,
        journal: Journal,
        stopped: AtomicBool,
    }

    impl FakeStatus {
        fn new(name: &str, endpoint: &StatusEndpoint, journal: Journal) -> Self {
            let opts = Opts::new(name, "fake status collector")
                .const_label("ingress_class", endpoint.class.clone())
                .const_label("namespace", endpoint.namespace.clone());
            Self {
                name: name.to_string(),
                gauge: IntGauge::with_opts(opts).unwrap(),
                journal,
                stopped: AtomicBool::new(false),
            }
        }
    }

    impl Collector for FakeStatus {
        fn desc(&self) -> Vec<&Desc> {
            self.gauge.desc()
        }

        fn collect(&self) -> Vec<MetricFamily> {
            self.gauge.collect()
        }
    }

    impl Stoppable for FakeStatus {
        fn stop(&self) {
            if !self.stopped.swap(true, Ordering::SeqCst) {
                self.journal
                    .record(JournalEvent::Stopped(self.name.clone()));
            }
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        journal: Journal,
        fail_process: bool,
        /// Status mode whose collector fails to build.
        fail_build: Mutex<Option<StatusMode>>,
        endpoints: Mutex<Vec<StatusEndpoint>>,
    }

    impl FakeFactory {
        fn check_build(&self, mode: StatusMode) -> Result<(), StatusError> {
            if *self.fail_build.lock() == Some(mode) {
                return Err(StatusError::Spawn(std::io::Error::other(
                    "thread limit reached",
                )));
            }
            Ok(())
        }
    }

    impl CollectorFactory for FakeFactory {
        type Process = IntGauge;
        type Basic = FakeStatus;
        type Extended = FakeStatus;

        fn process(&self, matcher: &BinaryNameMatcher) -> Result<IntGauge, CollectError> {
            assert_eq!(matcher.name, "nginx");
            if self.fail_process {
                return Err(CollectError::Io(std::io::Error::other("proc not mounted")));
            }
            Ok(IntGauge::with_opts(Opts::new(PROCESS, "fake process collector"))?)
        }

        fn basic(&self, endpoint: StatusEndpoint) -> Result<FakeStatus, StatusError> {
            self.check_build(StatusMode::Default)?;
            let status = FakeStatus::new(BASIC, &endpoint, self.journal.clone());
            self.endpoints.lock().push(endpoint);
            Ok(status)
        }

        fn extended(&self, endpoint: StatusEndpoint) -> Result<FakeStatus, StatusError> {
            self.check_build(StatusMode::Extended)?;
            let status = FakeStatus::new(VTS, &endpoint, self.journal.clone());
            self.endpoints.lock().push(endpoint);
            Ok(status)
        }
    }

    fn setup() -> (Arc<RecordingRegistry>, Switcher<FakeFactory>) {
        let journal = Journal::new();
        let registry = Arc::new(RecordingRegistry::new(journal.clone()));
        let factory = FakeFactory {
            journal,
            ..FakeFactory::default()
        };
        let switcher = Switcher::new(
            registry.clone(),
            factory,
            StatusTarget::new("ingress", "nginx", 18080),
            "/usr/sbin/nginx",
        )
        .unwrap();
        registry.journal().take();
        (registry, switcher)
    }

    fn registered(name: &str) -> JournalEvent {
        JournalEvent::Registered(name.to_string())
    }

    fn unregistered(name: &str) -> JournalEvent {
        JournalEvent::Unregistered(name.to_string())
    }

    fn stopped(name: &str) -> JournalEvent {
        JournalEvent::Stopped(name.to_string())
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("default".parse::<StatusMode>().unwrap(), StatusMode::Default);
        assert_eq!("VTS".parse::<StatusMode>().unwrap(), StatusMode::Extended);
        assert_eq!(" extended ".parse::<StatusMode>().unwrap(), StatusMode::Extended);
        assert!("prometheus".parse::<StatusMode>().is_err());
        assert_eq!(StatusMode::Extended.to_string(), "vts");
        assert_eq!(StatusMode::from_vts_enabled(false), StatusMode::Default);
    }

    #[test]
    fn test_construction_registers_process_collector_only() {
        let journal = Journal::new();
        let registry = Arc::new(RecordingRegistry::new(journal.clone()));
        let factory = FakeFactory {
            journal: journal.clone(),
            ..FakeFactory::default()
        };

        let switcher = Switcher::new(
            registry.clone(),
            factory,
            StatusTarget::new("ingress", "nginx", 18080),
            "/usr/sbin/nginx",
        )
        .unwrap();

        assert_eq!(journal.events(), vec![registered(PROCESS)]);
        assert_eq!(switcher.current_mode(), None);
        assert!(!switcher.is_active(StatusMode::Default));
        assert!(!switcher.is_active(StatusMode::Extended));
    }

    #[test]
    fn test_first_request_always_transitions() {
        for mode in [StatusMode::Default, StatusMode::Extended] {
            let (registry, switcher) = setup();

            assert!(switcher.request_mode(mode).unwrap());

            assert_eq!(switcher.current_mode(), Some(mode));
            assert!(switcher.is_active(mode));
            assert_eq!(registry.registered_names().len(), 2);
        }
    }

    #[test]
    fn test_reference_scenario() {
        let (registry, switcher) = setup();
        let journal = registry.journal().clone();

        switcher.request_mode(StatusMode::Default).unwrap();
        assert!(registry.is_registered(BASIC));
        assert!(!registry.is_registered(VTS));
        assert_eq!(switcher.current_mode(), Some(StatusMode::Default));
        assert_eq!(journal.take(), vec![registered(BASIC)]);

        switcher.request_mode(StatusMode::Extended).unwrap();
        assert!(!registry.is_registered(BASIC));
        assert!(registry.is_registered(VTS));
        assert_eq!(switcher.current_mode(), Some(StatusMode::Extended));
        assert_eq!(
            journal.take(),
            vec![stopped(BASIC), unregistered(BASIC), registered(VTS)]
        );

        assert!(!switcher.request_mode(StatusMode::Extended).unwrap());
        assert!(journal.take().is_empty());
        assert!(registry.is_registered(PROCESS));
    }

    #[test]
    fn test_repeated_request_is_noop() {
        let (registry, switcher) = setup();
        switcher.request_mode(StatusMode::Default).unwrap();
        let names = registry.registered_names();
        registry.journal().take();

        for _ in 0..3 {
            assert!(!switcher.request_mode(StatusMode::Default).unwrap());
        }

        assert!(registry.journal().events().is_empty());
        assert_eq!(registry.registered_names(), names);
        assert_eq!(switcher.factory.endpoints.lock().len(), 1);
    }

    #[test]
    fn test_status_variants_are_mutually_exclusive() {
        let (registry, switcher) = setup();
        let modes = [
            StatusMode::Default,
            StatusMode::Extended,
            StatusMode::Extended,
            StatusMode::Default,
            StatusMode::Default,
            StatusMode::Extended,
        ];

        for mode in modes {
            switcher.request_mode(mode).unwrap();
            let basic = registry.is_registered(BASIC);
            let vts = registry.is_registered(VTS);
            assert!(basic ^ vts);
            assert_eq!(basic, mode == StatusMode::Default);
            assert!(registry.is_registered(PROCESS));
        }
    }

    #[test]
    fn test_stop_completes_before_start() {
        let (registry, switcher) = setup();
        switcher.request_mode(StatusMode::Extended).unwrap();
        registry.journal().take();

        switcher.request_mode(StatusMode::Default).unwrap();

        assert_eq!(
            registry.journal().events(),
            vec![stopped(VTS), unregistered(VTS), registered(BASIC)]
        );
    }

    #[test]
    fn test_collectors_receive_mode_endpoints() {
        let (_registry, switcher) = setup();
        switcher.request_mode(StatusMode::Default).unwrap();
        switcher.request_mode(StatusMode::Extended).unwrap();

        let endpoints = switcher.factory.endpoints.lock();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].path, NGX_STATUS_PATH);
        assert_eq!(endpoints[1].path, NGX_VTS_PATH);
        assert_eq!(endpoints[1], switcher.target().endpoint(StatusMode::Extended));
        for endpoint in endpoints.iter() {
            assert_eq!(endpoint.namespace, "ingress");
            assert_eq!(endpoint.class, "nginx");
            assert_eq!(endpoint.port, 18080);
        }
    }

    #[test]
    fn test_process_factory_failure_aborts_construction() {
        let journal = Journal::new();
        let registry = Arc::new(RecordingRegistry::new(journal.clone()));
        let factory = FakeFactory {
            journal,
            fail_process: true,
            ..FakeFactory::default()
        };

        let result = Switcher::new(
            registry.clone(),
            factory,
            StatusTarget::new("ingress", "nginx", 18080),
            "/usr/sbin/nginx",
        );

        assert!(matches!(result, Err(SwitchError::ProcessCollector(_))));
        assert!(registry.registered_names().is_empty());
    }

    #[test]
    fn test_process_registration_failure_aborts_construction() {
        let journal = Journal::new();
        let registry = Arc::new(RecordingRegistry::new(journal.clone()));
        registry.fail_registration_of(PROCESS);
        let factory = FakeFactory {
            journal,
            ..FakeFactory::default()
        };

        let result = Switcher::new(
            registry,
            factory,
            StatusTarget::new("ingress", "nginx", 18080),
            "/usr/sbin/nginx",
        );

        match result {
            Err(SwitchError::Register { collector, .. }) => {
                assert_eq!(collector, "nginx process")
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn test_failed_registration_resets_mode() {
        let (registry, switcher) = setup();
        switcher.request_mode(StatusMode::Default).unwrap();
        registry.fail_registration_of(VTS);
        registry.journal().take();

        let err = switcher.request_mode(StatusMode::Extended).unwrap_err();

        assert!(err.to_string().contains("vts status"));
        assert_eq!(switcher.current_mode(), None);
        assert!(!switcher.is_active(StatusMode::Default));
        assert!(!registry.is_registered(BASIC));
        assert!(!registry.is_registered(VTS));
        assert_eq!(
            registry.journal().events(),
            vec![stopped(BASIC), unregistered(BASIC), stopped(VTS)]
        );

        registry.allow_registration_of(VTS);
        assert!(switcher.request_mode(StatusMode::Extended).unwrap());
        assert!(registry.is_registered(VTS));
    }

    #[test]
    fn test_failed_build_leaves_no_status_collector() {
        let (registry, switcher) = setup();
        switcher.request_mode(StatusMode::Default).unwrap();
        *switcher.factory.fail_build.lock() = Some(StatusMode::Extended);
        registry.journal().take();

        let err = switcher.request_mode(StatusMode::Extended).unwrap_err();

        assert!(matches!(
            err,
            SwitchError::Build {
                mode: StatusMode::Extended,
                ..
            }
        ));
        assert_eq!(switcher.current_mode(), None);
        assert!(!switcher.is_active(StatusMode::Default));
        assert_eq!(
            registry.journal().take(),
            vec![stopped(BASIC), unregistered(BASIC)]
        );
        assert_eq!(registry.registered_names(), vec![PROCESS.to_string()]);

        *switcher.factory.fail_build.lock() = None;
        assert!(switcher.request_mode(StatusMode::Extended).unwrap());
        assert_eq!(registry.journal().take(), vec![registered(VTS)]);
        assert!(switcher.is_active(StatusMode::Extended));
    }

    #[test]
    fn test_shutdown_keeps_process_collector() {
        let (registry, switcher) = setup();
        switcher.request_mode(StatusMode::Extended).unwrap();

        switcher.shutdown();
        switcher.shutdown();

        assert_eq!(switcher.current_mode(), None);
        assert_eq!(registry.registered_names(), vec![PROCESS.to_string()]);
        let process = collector_name(switcher.process_collector().as_ref());
        assert!(registry.is_registered(&process));
    }

    #[test]
    fn test_concurrent_requests_keep_one_variant() {
        let (registry, switcher) = setup();
        let switcher = Arc::new(switcher);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let switcher = Arc::clone(&switcher);
                thread::spawn(move || {
                    for j in 0..50 {
                        let mode = if (i + j) % 3 == 0 {
                            StatusMode::Extended
                        } else {
                            StatusMode::Default
                        };
                        switcher.request_mode(mode).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let status_registered: Vec<String> = registry
            .registered_names()
            .into_iter()
            .filter(|name| name != PROCESS)
            .collect();
        assert_eq!(status_registered.len(), 1);
        let expected = match switcher.current_mode() {
            Some(StatusMode::Default) => BASIC,
            Some(StatusMode::Extended) => VTS,
            None => panic!("mode unset after successful transitions"),
        };
        assert_eq!(status_registered[0], expected);
    }

    #[test]
    fn test_nginx_factory_with_prometheus_registry() {
        let registry = Arc::new(PrometheusRegistry::new());
        let factory =
            NginxCollectorFactory::new(MockFs::nginx_ingress(), "/proc", Duration::from_secs(1));
        // Nothing listens on port 1, so status scrapes fail and yield no samples.
        let switcher = Switcher::new(
            registry.clone(),
            factory,
            StatusTarget::new("ingress", "nginx", 1),
            "/usr/sbin/nginx",
        )
        .unwrap();

        assert!(switcher.request_mode(StatusMode::Default).unwrap());
        assert!(switcher.request_mode(StatusMode::Extended).unwrap());
        assert!(switcher.request_mode(StatusMode::Default).unwrap());

        let text = registry.encode_text().unwrap();
        assert!(text.contains("nginx_num_procs 3"));
        assert!(!text.contains("nginx_vts_"));

        switcher.shutdown();
    }

    #[test]
    fn test_nginx_factory_fails_without_proc() {
        let registry = Arc::new(PrometheusRegistry::new());
        let factory = NginxCollectorFactory::new(MockFs::new(), "/proc", Duration::from_secs(1));

        let result = Switcher::new(
            registry,
            factory,
            StatusTarget::new("ingress", "nginx", 18080),
            "/usr/sbin/nginx",
        );

        assert!(matches!(result, Err(SwitchError::ProcessCollector(_))));
    }
}
