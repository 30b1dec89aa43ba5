//! Extended status collector backed by nginx-module-vts.
//!
//! The module serves a JSON document at `<status location>/format/json`
//! with per server zone, upstream, filter and cache counters.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{IntCounter, IntCounterVec, IntGaugeVec};
use serde::Deserialize;
use tracing::warn;

use super::source::StatusSource;
use super::worker::ScrapeWorker;
use super::{StatusEndpoint, StatusError, Stoppable};

const SUBSYSTEM: &str = "vts";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct VtsStatus {
    pub nginx_version: String,
    pub connections: Connections,
    pub server_zones: BTreeMap<String, ServerZone>,
    pub upstream_zones: BTreeMap<String, Vec<UpstreamServer>>,
    pub filter_zones: BTreeMap<String, BTreeMap<String, ServerZone>>,
    pub cache_zones: BTreeMap<String, CacheZone>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Connections {
    pub active: u64,
    pub reading: u64,
    pub writing: u64,
    pub waiting: u64,
    pub accepted: u64,
    pub handled: u64,
    pub requests: u64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Responses {
    #[serde(rename = "1xx")]
    pub informational: u64,
    #[serde(rename = "2xx")]
    pub success: u64,
    #[serde(rename = "3xx")]
    pub redirection: u64,
    #[serde(rename = "4xx")]
    pub client_error: u64,
    #[serde(rename = "5xx")]
    pub server_error: u64,
    pub miss: u64,
    pub bypass: u64,
    pub expired: u64,
    pub stale: u64,
    pub updating: u64,
    pub revalidated: u64,
    pub hit: u64,
    pub scarce: u64,
}

impl Responses {
    fn by_code(&self) -> [(&'static str, u64); 5] {
        [
            ("1xx", self.informational),
            ("2xx", self.success),
            ("3xx", self.redirection),
            ("4xx", self.client_error),
            ("5xx", self.server_error),
        ]
    }

    fn by_cache_status(&self) -> [(&'static str, u64); 8] {
        [
            ("miss", self.miss),
            ("bypass", self.bypass),
            ("expired", self.expired),
            ("stale", self.stale),
            ("updating", self.updating),
            ("revalidated", self.revalidated),
            ("hit", self.hit),
            ("scarce", self.scarce),
        ]
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerZone {
    pub request_counter: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub responses: Responses,
    pub request_msec: u64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamServer {
    pub server: String,
    pub request_counter: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub responses: Responses,
    pub response_msec: u64,
    pub weight: u64,
    pub max_fails: u64,
    pub fail_timeout: u64,
    pub backup: bool,
    pub down: bool,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheZone {
    pub max_size: u64,
    pub used_size: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub responses: Responses,
}

/// Parses the VTS JSON document. Missing sections default to empty.
pub fn parse_vts(body: &str) -> Result<VtsStatus, StatusError> {
    Ok(serde_json::from_str(body)?)
}

struct VtsMetrics {
    connections: IntGaugeVec,
    requests: IntCounter,
    server_bytes: IntCounterVec,
    server_requests: IntCounterVec,
    server_cache: IntCounterVec,
    server_request_msec: IntGaugeVec,
    upstream_bytes: IntCounterVec,
    upstream_requests: IntCounterVec,
    upstream_response_msec: IntGaugeVec,
    upstream_weight: IntGaugeVec,
    upstream_max_fails: IntGaugeVec,
    upstream_fail_timeout: IntGaugeVec,
    upstream_backup: IntGaugeVec,
    upstream_down: IntGaugeVec,
    filter_bytes: IntCounterVec,
    filter_requests: IntCounterVec,
    cache_size: IntGaugeVec,
    cache_bytes: IntCounterVec,
    cache_requests: IntCounterVec,
    all: Vec<Box<dyn Collector>>,
}

impl VtsMetrics {
    fn new(endpoint: &StatusEndpoint) -> Result<Self, prometheus::Error> {
        let gauge = |name: &str, help: &str, labels: &[&str]| {
            IntGaugeVec::new(endpoint.opts(SUBSYSTEM, name, help), labels)
        };
        let counter = |name: &str, help: &str, labels: &[&str]| {
            IntCounterVec::new(endpoint.opts(SUBSYSTEM, name, help), labels)
        };
        let upstream = ["upstream", "server"];

        let metrics = Self {
            connections: gauge("connections", "nginx connections by state", &["state"])?,
            requests: IntCounter::with_opts(endpoint.opts(
                SUBSYSTEM,
                "requests_total",
                "total number of client requests",
            ))?,
            server_bytes: counter(
                "bytes_total",
                "bytes transferred per server zone",
                &["server_zone", "direction"],
            )?,
            server_requests: counter(
                "server_requests_total",
                "requests per server zone by response code class",
                &["server_zone", "code"],
            )?,
            server_cache: counter(
                "server_cache_total",
                "cache lookups per server zone by status",
                &["server_zone", "status"],
            )?,
            server_request_msec: gauge(
                "server_request_msec",
                "average request processing time per server zone in milliseconds",
                &["server_zone"],
            )?,
            upstream_bytes: counter(
                "upstream_bytes_total",
                "bytes transferred per upstream server",
                &["upstream", "server", "direction"],
            )?,
            upstream_requests: counter(
                "upstream_requests_total",
                "requests per upstream server by response code class",
                &["upstream", "server", "code"],
            )?,
            upstream_response_msec: gauge(
                "upstream_response_msec",
                "average upstream response time in milliseconds",
                &upstream,
            )?,
            upstream_weight: gauge("upstream_weight", "upstream server weight", &upstream)?,
            upstream_max_fails: gauge(
                "upstream_max_fails",
                "upstream server max_fails setting",
                &upstream,
            )?,
            upstream_fail_timeout: gauge(
                "upstream_fail_timeout",
                "upstream server fail_timeout setting in seconds",
                &upstream,
            )?,
            upstream_backup: gauge(
                "upstream_backup",
                "1 when the upstream server is a backup",
                &upstream,
            )?,
            upstream_down: gauge("upstream_down", "1 when the upstream server is down", &upstream)?,
            filter_bytes: counter(
                "filterzone_bytes_total",
                "bytes transferred per filter zone",
                &["filter", "zone", "direction"],
            )?,
            filter_requests: counter(
                "filterzone_requests_total",
                "requests per filter zone by response code class",
                &["filter", "zone", "code"],
            )?,
            cache_size: gauge(
                "cache_size_bytes",
                "cache zone size in bytes",
                &["cache_zone", "type"],
            )?,
            cache_bytes: counter(
                "cache_bytes_total",
                "bytes transferred per cache zone",
                &["cache_zone", "direction"],
            )?,
            cache_requests: counter(
                "cache_requests_total",
                "cache lookups per cache zone by status",
                &["cache_zone", "status"],
            )?,
            all: Vec::new(),
        };
        Ok(metrics.with_collector_list())
    }

    fn with_collector_list(mut self) -> Self {
        let mut all: Vec<Box<dyn Collector>> = vec![
            Box::new(self.connections.clone()),
            Box::new(self.requests.clone()),
        ];
        for vec in [
            &self.server_bytes,
            &self.server_requests,
            &self.server_cache,
            &self.upstream_bytes,
            &self.upstream_requests,
            &self.filter_bytes,
            &self.filter_requests,
            &self.cache_bytes,
            &self.cache_requests,
        ] {
            all.push(Box::new(vec.clone()));
        }
        for vec in [
            &self.server_request_msec,
            &self.upstream_response_msec,
            &self.upstream_weight,
            &self.upstream_max_fails,
            &self.upstream_fail_timeout,
            &self.upstream_backup,
            &self.upstream_down,
            &self.cache_size,
        ] {
            all.push(Box::new(vec.clone()));
        }
        self.all = all;
        self
    }

    fn reset(&self) {
        self.connections.reset();
        self.requests.reset();
        for vec in [
            &self.server_bytes,
            &self.server_requests,
            &self.server_cache,
            &self.upstream_bytes,
            &self.upstream_requests,
            &self.filter_bytes,
            &self.filter_requests,
            &self.cache_bytes,
            &self.cache_requests,
        ] {
            vec.reset();
        }
        for vec in [
            &self.server_request_msec,
            &self.upstream_response_msec,
            &self.upstream_weight,
            &self.upstream_max_fails,
            &self.upstream_fail_timeout,
            &self.upstream_backup,
            &self.upstream_down,
            &self.cache_size,
        ] {
            vec.reset();
        }
    }

    /// Replaces every sample with the values of `status`.
    ///
    /// Label sets of zones missing from `status` are dropped.
    fn update(&self, status: &VtsStatus) {
        self.reset();

        let conn = &status.connections;
        for (state, value) in [
            ("active", conn.active),
            ("reading", conn.reading),
            ("writing", conn.writing),
            ("waiting", conn.waiting),
            ("accepted", conn.accepted),
            ("handled", conn.handled),
        ] {
            self.connections.with_label_values(&[state]).set(value as i64);
        }
        self.requests.inc_by(conn.requests);

        for (zone, stats) in &status.server_zones {
            let zone = zone.as_str();
            self.server_bytes
                .with_label_values(&[zone, "in"])
                .inc_by(stats.in_bytes);
            self.server_bytes
                .with_label_values(&[zone, "out"])
                .inc_by(stats.out_bytes);
            for (code, value) in stats.responses.by_code() {
                self.server_requests
                    .with_label_values(&[zone, code])
                    .inc_by(value);
            }
            for (cache_status, value) in stats.responses.by_cache_status() {
                self.server_cache
                    .with_label_values(&[zone, cache_status])
                    .inc_by(value);
            }
            self.server_request_msec
                .with_label_values(&[zone])
                .set(stats.request_msec as i64);
        }

        for (name, servers) in &status.upstream_zones {
            for server in servers {
                let labels = [name.as_str(), server.server.as_str()];
                let [upstream, addr] = labels;
                self.upstream_bytes
                    .with_label_values(&[upstream, addr, "in"])
                    .inc_by(server.in_bytes);
                self.upstream_bytes
                    .with_label_values(&[upstream, addr, "out"])
                    .inc_by(server.out_bytes);
                for (code, value) in server.responses.by_code() {
                    self.upstream_requests
                        .with_label_values(&[upstream, addr, code])
                        .inc_by(value);
                }
                self.upstream_response_msec
                    .with_label_values(&labels)
                    .set(server.response_msec as i64);
                self.upstream_weight
                    .with_label_values(&labels)
                    .set(server.weight as i64);
                self.upstream_max_fails
                    .with_label_values(&labels)
                    .set(server.max_fails as i64);
                self.upstream_fail_timeout
                    .with_label_values(&labels)
                    .set(server.fail_timeout as i64);
                self.upstream_backup
                    .with_label_values(&labels)
                    .set(i64::from(server.backup));
                self.upstream_down
                    .with_label_values(&labels)
                    .set(i64::from(server.down));
            }
        }

        for (filter, zones) in &status.filter_zones {
            for (zone, stats) in zones {
                let (filter, zone) = (filter.as_str(), zone.as_str());
                self.filter_bytes
                    .with_label_values(&[filter, zone, "in"])
                    .inc_by(stats.in_bytes);
                self.filter_bytes
                    .with_label_values(&[filter, zone, "out"])
                    .inc_by(stats.out_bytes);
                for (code, value) in stats.responses.by_code() {
                    self.filter_requests
                        .with_label_values(&[filter, zone, code])
                        .inc_by(value);
                }
            }
        }

        for (zone, cache) in &status.cache_zones {
            let zone = zone.as_str();
            self.cache_size
                .with_label_values(&[zone, "max"])
                .set(cache.max_size as i64);
            self.cache_size
                .with_label_values(&[zone, "used"])
                .set(cache.used_size as i64);
            self.cache_bytes
                .with_label_values(&[zone, "in"])
                .inc_by(cache.in_bytes);
            self.cache_bytes
                .with_label_values(&[zone, "out"])
                .inc_by(cache.out_bytes);
            for (cache_status, value) in cache.responses.by_cache_status() {
                self.cache_requests
                    .with_label_values(&[zone, cache_status])
                    .inc_by(value);
            }
        }
    }
}

/// Collector for the extended (virtual traffic status) module.
pub struct VtsCollector {
    endpoint: StatusEndpoint,
    worker: ScrapeWorker,
    metrics: VtsMetrics,
    scrape: Mutex<()>,
}

impl VtsCollector {
    /// Builds the collector and starts its scrape worker.
    pub fn new(endpoint: StatusEndpoint, source: impl StatusSource) -> Result<Self, StatusError> {
        let metrics = VtsMetrics::new(&endpoint)?;
        let worker = ScrapeWorker::spawn("vts-status", endpoint.path.clone(), Box::new(source))?;
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

impl Collector for VtsCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.metrics.all.iter().flat_map(|c| c.desc()).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let _guard = self.scrape.lock();
        match self.worker.scrape().and_then(|body| parse_vts(&body)) {
            Ok(status) => self.metrics.update(&status),
            Err(StatusError::Stopped) => return Vec::new(),
            Err(e) => {
                warn!(path = %self.endpoint.path, error = %e, "failed to scrape vts status");
                return Vec::new();
            }
        }
        self.metrics.all.iter().flat_map(|c| c.collect()).collect()
    }
}

impl Stoppable for VtsCollector {
    fn stop(&self) {
        self.worker.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::status::source::MockSource;
    use crate::collector::testutil::{sample_count, sample_value};

    const VTS_PATH: &str = "/nginx_status/format/json";

    const VTS_DOCUMENT: &str = r#"{
        "hostName": "ingress-nginx-controller-7d9f",
        "nginxVersion": "1.21.6",
        "loadMsec": 1700000000000,
        "nowMsec": 1700000060000,
        "connections": {"active": 12, "reading": 0, "writing": 3, "waiting": 9,
                        "accepted": 1500, "handled": 1500, "requests": 4200},
        "serverZones": {
            "example.com": {"requestCounter": 4000, "inBytes": 800000, "outBytes": 9600000,
                "responses": {"1xx": 0, "2xx": 3900, "3xx": 50, "4xx": 40, "5xx": 10,
                              "miss": 7, "hit": 93},
                "requestMsec": 12},
            "*": {"requestCounter": 4200, "inBytes": 810000, "outBytes": 9700000,
                "responses": {"2xx": 4100, "5xx": 100}}
        },
        "upstreamZones": {
            "default-echo-80": [
                {"server": "10.0.0.5:8080", "requestCounter": 2000, "inBytes": 400000,
                 "outBytes": 4800000, "responses": {"2xx": 1990, "5xx": 10},
                 "responseMsec": 8, "weight": 1, "maxFails": 0, "failTimeout": 10,
                 "backup": false, "down": false},
                {"server": "10.0.0.6:8080", "requestCounter": 2000, "down": true}
            ]
        },
        "filterZones": {
            "country::example.com": {"NL": {"requestCounter": 10, "inBytes": 100, "outBytes": 2000,
                                             "responses": {"2xx": 10}}}
        },
        "cacheZones": {
            "static": {"maxSize": 1048576, "usedSize": 4096, "inBytes": 300, "outBytes": 9000,
                       "responses": {"miss": 3, "hit": 30}}
        }
    }"#;

    fn endpoint() -> StatusEndpoint {
        StatusEndpoint {
            namespace: "ingress".to_string(),
            class: "nginx".to_string(),
            port: 18080,
            path: VTS_PATH.to_string(),
        }
    }

    #[test]
    fn test_parse_vts_document() {
        let status = parse_vts(VTS_DOCUMENT).unwrap();

        assert_eq!(status.nginx_version, "1.21.6");
        assert_eq!(status.connections.requests, 4200);
        assert_eq!(status.server_zones.len(), 2);
        assert_eq!(status.server_zones["example.com"].responses.success, 3900);
        let servers = &status.upstream_zones["default-echo-80"];
        assert_eq!(servers.len(), 2);
        assert!(servers[1].down);
        assert_eq!(servers[1].weight, 0);
        assert_eq!(status.cache_zones["static"].responses.hit, 30);
    }

    #[test]
    fn test_parse_vts_defaults_missing_sections() {
        let status = parse_vts(r#"{"connections": {"active": 1}}"#).unwrap();
        assert_eq!(status.connections.active, 1);
        assert!(status.server_zones.is_empty());
        assert!(status.upstream_zones.is_empty());
    }

    #[test]
    fn test_parse_vts_rejects_non_json() {
        assert!(matches!(
            parse_vts("Active connections: 1"),
            Err(StatusError::Json(_))
        ));
    }

    #[test]
    fn test_collect_reports_zones() {
        let source = MockSource::new().with_document(VTS_PATH, VTS_DOCUMENT);
        let collector = VtsCollector::new(endpoint(), source).unwrap();

        let families = collector.collect();

        assert_eq!(
            sample_value(&families, "nginx_vts_requests_total", &[("namespace", "ingress")]),
            Some(4200.0)
        );
        assert_eq!(
            sample_value(&families, "nginx_vts_connections", &[("state", "waiting")]),
            Some(9.0)
        );
        assert_eq!(
            sample_value(
                &families,
                "nginx_vts_bytes_total",
                &[("server_zone", "example.com"), ("direction", "out")]
            ),
            Some(9600000.0)
        );
        assert_eq!(
            sample_value(
                &families,
                "nginx_vts_upstream_requests_total",
                &[("server", "10.0.0.5:8080"), ("code", "5xx")]
            ),
            Some(10.0)
        );
        assert_eq!(
            sample_value(&families, "nginx_vts_upstream_down", &[("server", "10.0.0.6:8080")]),
            Some(1.0)
        );
        assert_eq!(
            sample_value(
                &families,
                "nginx_vts_filterzone_requests_total",
                &[("filter", "country::example.com"), ("zone", "NL"), ("code", "2xx")]
            ),
            Some(10.0)
        );
        assert_eq!(
            sample_value(
                &families,
                "nginx_vts_cache_size_bytes",
                &[("cache_zone", "static"), ("type", "used")]
            ),
            Some(4096.0)
        );
        collector.stop();
    }

    #[test]
    fn test_vanished_zones_are_dropped() {
        let source = MockSource::new().with_document(VTS_PATH, VTS_DOCUMENT);
        let collector = VtsCollector::new(endpoint(), source.clone()).unwrap();

        let families = collector.collect();
        assert_eq!(sample_count(&families, "nginx_vts_server_request_msec"), 2);

        source.set_document(
            VTS_PATH,
            r#"{"serverZones": {"*": {"requestCounter": 1, "requestMsec": 3}}}"#,
        );
        let families = collector.collect();

        assert_eq!(sample_count(&families, "nginx_vts_server_request_msec"), 1);
        assert_eq!(sample_count(&families, "nginx_vts_upstream_weight"), 0);
        assert_eq!(
            sample_value(&families, "nginx_vts_server_request_msec", &[("server_zone", "*")]),
            Some(3.0)
        );
        collector.stop();
    }

    #[test]
    fn test_collect_after_stop_is_empty() {
        let source = MockSource::new().with_document(VTS_PATH, VTS_DOCUMENT);
        let collector = VtsCollector::new(endpoint(), source.clone()).unwrap();

        collector.stop();

        assert!(collector.is_stopped());
        assert!(collector.collect().is_empty());
        assert_eq!(source.fetches(), 0);
    }
}
