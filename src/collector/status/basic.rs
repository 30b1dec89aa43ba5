//! Basic status collector backed by nginx's `stub_status` page.
//!
//! Expected document:
//!
//! ```text
//! Active connections: 291
//! server accepts handled requests
//!  16630948 16630948 31070465
//! Reading: 6 Writing: 179 Waiting: 106
//! ```

use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{IntCounter, IntGauge, IntGaugeVec};
use tracing::warn;

use super::source::StatusSource;
use super::worker::ScrapeWorker;
use super::{StatusEndpoint, StatusError, Stoppable};

/// Parsed `stub_status` document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicStatus {
    pub active: u64,
    pub accepted: u64,
    pub handled: u64,
    pub requests: u64,
    pub reading: u64,
    pub writing: u64,
    pub waiting: u64,
}

fn parse_number(token: &str, field: &str) -> Result<u64, StatusError> {
    token
        .parse()
        .map_err(|_| StatusError::Parse(format!("invalid {}: {:?}", field, token)))
}

/// Parses a `stub_status` document.
pub fn parse_stub_status(body: &str) -> Result<BasicStatus, StatusError> {
    let mut status = BasicStatus::default();
    let mut seen_active = false;
    let mut seen_totals = false;
    let mut seen_states = false;

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(value) = line.strip_prefix("Active connections:") {
            status.active = parse_number(value.trim(), "active connections")?;
            seen_active = true;
        } else if line.starts_with("Reading:") {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            for pair in tokens.chunks(2) {
                let [key, value] = pair else {
                    return Err(StatusError::Parse(format!("dangling token in {:?}", line)));
                };
                match *key {
                    "Reading:" => status.reading = parse_number(value, "reading")?,
                    "Writing:" => status.writing = parse_number(value, "writing")?,
                    "Waiting:" => status.waiting = parse_number(value, "waiting")?,
                    other => {
                        return Err(StatusError::Parse(format!("unknown state {:?}", other)));
                    }
                }
            }
            seen_states = true;
        } else if line.starts_with(|c: char| c.is_ascii_digit()) {
            let numbers: Vec<&str> = line.split_whitespace().collect();
            let [accepted, handled, requests] = numbers.as_slice() else {
                return Err(StatusError::Parse(format!(
                    "expected 3 totals, got {:?}",
                    line
                )));
            };
            status.accepted = parse_number(accepted, "accepts")?;
            status.handled = parse_number(handled, "handled")?;
            status.requests = parse_number(requests, "requests")?;
            seen_totals = true;
        }
    }

    if !(seen_active && seen_totals && seen_states) {
        return Err(StatusError::Parse("incomplete document".to_string()));
    }
    Ok(status)
}

struct BasicMetrics {
    active: IntGauge,
    accepted: IntCounter,
    handled: IntCounter,
    requests: IntCounter,
    connections: IntGaugeVec,
    all: Vec<Box<dyn Collector>>,
}

impl BasicMetrics {
    fn new(endpoint: &StatusEndpoint) -> Result<Self, prometheus::Error> {
        let active = IntGauge::with_opts(endpoint.opts(
            "",
            "active_connections",
            "total number of active connections",
        ))?;
        let accepted = IntCounter::with_opts(endpoint.opts(
            "",
            "accepted_connections",
            "total number of accepted client connections",
        ))?;
        let handled = IntCounter::with_opts(endpoint.opts(
            "",
            "handled_connections",
            "total number of handled connections",
        ))?;
        let requests = IntCounter::with_opts(endpoint.opts(
            "",
            "total_requests",
            "total number of client requests",
        ))?;
        let connections = IntGaugeVec::new(
            endpoint.opts("", "current_connections", "current number of client connections"),
            &["state"],
        )?;

        let all: Vec<Box<dyn Collector>> = vec![
            Box::new(active.clone()),
            Box::new(accepted.clone()),
            Box::new(handled.clone()),
            Box::new(requests.clone()),
            Box::new(connections.clone()),
        ];

        Ok(Self {
            active,
            accepted,
            handled,
            requests,
            connections,
            all,
        })
    }

    fn update(&self, status: &BasicStatus) {
        self.active.set(status.active as i64);
        for (counter, value) in [
            (&self.accepted, status.accepted),
            (&self.handled, status.handled),
            (&self.requests, status.requests),
        ] {
            counter.reset();
            counter.inc_by(value);
        }
        for (state, value) in [
            ("reading", status.reading),
            ("writing", status.writing),
            ("waiting", status.waiting),
        ] {
            self.connections
                .with_label_values(&[state])
                .set(value as i64);
        }
    }
}

/// Collector for the basic (`stub_status`) status module.
pub struct BasicStatusCollector {
    endpoint: StatusEndpoint,
    worker: ScrapeWorker,
    metrics: BasicMetrics,
    scrape: Mutex<()>,
}

impl BasicStatusCollector {
    /// Builds the collector and starts its scrape worker.
    pub fn new(endpoint: StatusEndpoint, source: impl StatusSource) -> Result<Self, StatusError> {
        let metrics = BasicMetrics::new(&endpoint)?;
        let worker = ScrapeWorker::spawn("basic-status", endpoint.path.clone(), Box::new(source))?;
        Ok(Self {
            endpoint,
            worker,
            metrics,
            scrape: Mutex::new(()),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.worker.is_stopped()
    }
}

impl Collector for BasicStatusCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.metrics.all.iter().flat_map(|c| c.desc()).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let _guard = self.scrape.lock();
        match self
            .worker
            .scrape()
            .and_then(|body| parse_stub_status(&body))
        {
            Ok(status) => self.metrics.update(&status),
            Err(StatusError::Stopped) => return Vec::new(),
            Err(e) => {
                warn!(path = %self.endpoint.path, error = %e, "failed to scrape nginx status");
                return Vec::new();
            }
        }
        self.metrics.all.iter().flat_map(|c| c.collect()).collect()
    }
}

impl Stoppable for BasicStatusCollector {
    fn stop(&self) {
        self.worker.stop();
    }
}
