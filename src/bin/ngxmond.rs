//! ngxmond - nginx metrics daemon for an ingress controller.
//!
//! Registers the nginx process collector and one status collector, serves
//! them on `/metrics`, and follows the controller configuration to switch
//! between the `stub_status` and VTS status modules.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ngxmon::collector::RealFs;
use ngxmon::config::ConfigWatcher;
use ngxmon::registry::PrometheusRegistry;
use ngxmon::switcher::NginxCollectorFactory;
use ngxmon::{StatusMode, StatusTarget, Switcher};

type NginxSwitcher = Switcher<NginxCollectorFactory<RealFs>>;

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(name = "ngxmond", about = "nginx metrics daemon for ingress controllers", version = ngxmon::VERSION)]
struct Args {
    /// Namespace of the ingress controller, attached to every status metric.
    #[arg(long, default_value = "default", env = "POD_NAMESPACE")]
    namespace: String,

    /// Ingress class served by the controller.
    #[arg(long, default_value = "nginx", env = "NGXMON_INGRESS_CLASS")]
    ingress_class: String,

    /// Path of the nginx binary, used to find its processes.
    #[arg(long, default_value = "/usr/sbin/nginx", env = "NGXMON_NGINX_BINARY")]
    nginx_binary: String,

    /// Local port where nginx serves its status pages.
    #[arg(long, default_value = "18080", env = "NGXMON_STATUS_PORT")]
    status_port: u16,

    /// Listen address for the metrics endpoint.
    #[arg(long, default_value = "0.0.0.0:10254", env = "NGXMON_LISTEN")]
    listen: String,

    /// Controller configuration file. Its `enable-vts-status` setting
    /// selects the status module and is reloaded on change or SIGHUP.
    #[arg(long, env = "NGXMON_CONFIG")]
    config: Option<PathBuf>,

    /// Status module used when no configuration file is given (default or vts).
    #[arg(long, default_value = "default", env = "NGXMON_STATUS_MODULE")]
    status_module: StatusMode,

    /// Path to /proc filesystem.
    #[arg(long, default_value = "/proc", env = "NGXMON_PROC_PATH")]
    proc_path: String,

    /// Timeout for a single status page fetch, in seconds.
    #[arg(long, default_value = "5", env = "NGXMON_SCRAPE_TIMEOUT")]
    scrape_timeout: u64,

    /// How often the configuration file is checked for changes, in seconds.
    #[arg(long, default_value = "10", env = "NGXMON_RELOAD_INTERVAL")]
    reload_interval: u64,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber. `RUST_LOG` directives for other
/// targets are kept.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["ngxmond", "ngxmon"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };
    runtime.block_on(async_main(args));
}

async fn async_main(args: Args) {
    info!(version = ngxmon::VERSION, "starting ngxmond");

    let addr: SocketAddr = match args.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(listen = %args.listen, error = %e, "invalid listen address");
            process::exit(1);
        }
    };

    let mut watcher = args.config.clone().map(ConfigWatcher::new);
    let initial_mode = match watcher.as_mut().map(|w| w.reload()) {
        Some(Ok(config)) => config.status_mode(),
        Some(Err(e)) => {
            error!(error = %e, "failed to load configuration");
            process::exit(1);
        }
        None => args.status_module,
    };

    let registry = PrometheusRegistry::new();
    let factory = NginxCollectorFactory::new(
        RealFs,
        args.proc_path.clone(),
        Duration::from_secs(args.scrape_timeout),
    );
    let target = StatusTarget::new(args.namespace.clone(), args.ingress_class.clone(), args.status_port);

    let switcher = {
        let registry = Arc::new(registry.clone());
        let binary = args.nginx_binary.clone();
        let built = tokio::task::spawn_blocking(move || {
            let switcher = Switcher::new(registry, factory, target, &binary)?;
            switcher.request_mode(initial_mode)?;
            Ok::<_, ngxmon::SwitchError>(switcher)
        })
        .await;
        match built {
            Ok(Ok(switcher)) => Arc::new(switcher),
            Ok(Err(e)) => {
                error!(error = %e, "failed to start nginx collectors");
                process::exit(1);
            }
            Err(e) => {
                error!(error = %e, "collector setup task failed");
                process::exit(1);
            }
        }
    };

    if let Some(watcher) = watcher {
        let switcher = switcher.clone();
        let interval = Duration::from_secs(args.reload_interval.max(1));
        tokio::spawn(async move {
            reload_loop(switcher, watcher, interval).await;
        });
    }

    let app = Router::new()
        .route("/metrics", get(handle_metrics))
        .route("/healthz", get(handle_health))
        .with_state(registry);

    info!(%addr, "listening");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
    }

    if let Err(e) = tokio::task::spawn_blocking(move || switcher.shutdown()).await {
        warn!(error = %e, "collector shutdown task failed");
    }
    info!("ngxmond stopped");
}

// ============================================================
// Handlers
// ============================================================

async fn handle_metrics(State(registry): State<PrometheusRegistry>) -> Response {
    // Status collectors block on their scrape workers.
    match tokio::task::spawn_blocking(move || registry.encode_text()).await {
        Ok(Ok(body)) => ([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            error!(error = %e, "metrics task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn handle_health() -> &'static str {
    "ok"
}

// ============================================================
// Configuration reload
// ============================================================

/// Follows the configuration file and forwards the selected status module
/// to the switcher. A failed switch is fatal.
async fn reload_loop(switcher: Arc<NginxSwitcher>, mut watcher: ConfigWatcher, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; the file was loaded at startup.
    ticker.tick().await;
    let mut hangup = Hangup::new();

    loop {
        let forced = tokio::select! {
            _ = ticker.tick() => false,
            _ = hangup.recv() => {
                info!(path = %watcher.path().display(), "received SIGHUP, reloading configuration");
                true
            }
        };

        let loaded = if forced {
            watcher.reload().map(Some)
        } else {
            watcher.poll()
        };
        let config = match loaded {
            Ok(Some(config)) => config,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "failed to reload configuration, keeping current status module");
                continue;
            }
        };

        let mode = config.status_mode();
        let switcher = switcher.clone();
        match tokio::task::spawn_blocking(move || switcher.request_mode(mode)).await {
            Ok(Ok(changed)) => debug!(%mode, changed, "status module applied"),
            Ok(Err(e)) => {
                error!(error = %e, "failed to switch status collector");
                process::exit(1);
            }
            Err(e) => {
                error!(error = %e, "status switch task failed");
                process::exit(1);
            }
        }
    }
}

#[cfg(unix)]
struct Hangup(Option<tokio::signal::unix::Signal>);

#[cfg(unix)]
impl Hangup {
    fn new() -> Self {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::hangup()) {
            Ok(stream) => Self(Some(stream)),
            Err(e) => {
                warn!(error = %e, "failed to install SIGHUP handler, relying on polling");
                Self(None)
            }
        }
    }

    async fn recv(&mut self) {
        match self.0.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(not(unix))]
struct Hangup;

#[cfg(not(unix))]
impl Hangup {
    fn new() -> Self {
        Self
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("received shutdown signal");
}
