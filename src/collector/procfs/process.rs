//! Named-process collector aggregating `/proc/[pid]/` metrics of nginx.
//!
//! The collector scans the proc tree on every scrape, keeps the processes
//! accepted by a [`BinaryNameMatcher`] and reports them as one group.
//! The `*_total` counters carry the usage of exited processes forward, so
//! they never decrease when a worker is replaced.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Counter, Gauge, IntCounter, IntGauge, Opts};
use thiserror::Error;
use tracing::{debug, warn};

use crate::collector::procfs::parser::{
    ParseError, parse_boot_time, parse_cmdline, parse_proc_io, parse_proc_stat, parse_proc_status,
};
use crate::collector::traits::FileSystem;
use crate::collector::NAMESPACE;

/// Clock ticks per second (USER_HZ). Standard value for Linux.
const CLK_TCK: u64 = 100;

/// Page size used to convert `rss` pages when `VmRSS` is unavailable.
const PAGE_SIZE: u64 = 4096;

/// Error type for collection failures.
#[derive(Debug, Error)]
pub enum CollectError {
    /// Process disappeared during collection.
    #[error("process {0} disappeared")]
    ProcessGone(u32),
    /// I/O error reading proc files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Parse error in proc files.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Metric descriptor rejected by the prometheus client.
    #[error("invalid metric: {0}")]
    Metric(#[from] prometheus::Error),
}

/// Selects the processes belonging to the monitored nginx instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryNameMatcher {
    /// Process name as reported by `/proc/[pid]/comm`.
    pub name: String,
    /// Path of the nginx binary; only its base name is compared.
    pub binary: String,
}

impl BinaryNameMatcher {
    pub fn new(name: impl Into<String>, binary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
        }
    }

    /// Returns true when the process is part of the nginx group.
    ///
    /// Processes without a command line (kernel threads, zombies) never match.
    pub fn matches(&self, comm: &str, cmdline: &[String]) -> bool {
        let Some(argv0) = cmdline.first() else {
            return false;
        };
        base_name(argv0) == base_name(&self.binary) || comm == self.name
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Aggregated resource usage of all matched processes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessGroupStats {
    pub num_procs: u64,
    pub cpu_ticks: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
    pub open_fds: u64,
    /// Smallest `starttime` (clock ticks after boot) among matched processes.
    pub oldest_starttime: Option<u64>,
}

/// Cumulative per-process counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct UsageCounters {
    cpu_ticks: u64,
    read_bytes: u64,
    write_bytes: u64,
}

impl UsageCounters {
    fn of(stats: &ProcessGroupStats) -> Self {
        Self {
            cpu_ticks: stats.cpu_ticks,
            read_bytes: stats.read_bytes,
            write_bytes: stats.write_bytes,
        }
    }

    fn add(&mut self, other: &Self) {
        self.cpu_ticks += other.cpu_ticks;
        self.read_bytes += other.read_bytes;
        self.write_bytes += other.write_bytes;
    }

    fn max(self, other: Self) -> Self {
        Self {
            cpu_ticks: self.cpu_ticks.max(other.cpu_ticks),
            read_bytes: self.read_bytes.max(other.read_bytes),
            write_bytes: self.write_bytes.max(other.write_bytes),
        }
    }
}

/// Last-seen counters of live processes plus the usage of exited ones.
///
/// Processes are keyed by pid and start time, so a recycled pid counts as
/// a new process.
#[derive(Debug, Default)]
struct GroupCounters {
    live: HashMap<(u32, u64), UsageCounters>,
    exited: UsageCounters,
}

impl GroupCounters {
    /// Records one scan and returns the group totals since the first scan.
    fn observe(&mut self, members: &[(u32, ProcessGroupStats)]) -> UsageCounters {
        let mut live = HashMap::with_capacity(members.len());
        for (pid, stats) in members {
            let key = (*pid, stats.oldest_starttime.unwrap_or_default());
            let mut usage = UsageCounters::of(stats);
            // An unreadable io file reads as zero; keep the last value.
            if let Some(last) = self.live.get(&key) {
                usage = usage.max(*last);
            }
            live.insert(key, usage);
        }

        for (key, last) in &self.live {
            if !live.contains_key(key) {
                self.exited.add(last);
            }
        }
        self.live = live;

        let mut total = self.exited;
        for usage in self.live.values() {
            total.add(usage);
        }
        total
    }
}

struct ProcessMetrics {
    num_procs: IntGauge,
    cpu_seconds: Counter,
    read_bytes: IntCounter,
    write_bytes: IntCounter,
    resident_memory: IntGauge,
    virtual_memory: IntGauge,
    open_fds: IntGauge,
    oldest_start_time: Gauge,
}

impl ProcessMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        let opts = |name: &str, help: &str| Opts::new(name, help).namespace(NAMESPACE);
        Ok(Self {
            num_procs: IntGauge::with_opts(opts("num_procs", "number of nginx processes"))?,
            cpu_seconds: Counter::with_opts(opts(
                "cpu_seconds_total",
                "cpu time consumed by nginx processes in seconds",
            ))?,
            read_bytes: IntCounter::with_opts(opts(
                "read_bytes_total",
                "bytes read from storage by nginx processes",
            ))?,
            write_bytes: IntCounter::with_opts(opts(
                "write_bytes_total",
                "bytes written to storage by nginx processes",
            ))?,
            resident_memory: IntGauge::with_opts(opts(
                "resident_memory_bytes",
                "resident memory of nginx processes in bytes",
            ))?,
            virtual_memory: IntGauge::with_opts(opts(
                "virtual_memory_bytes",
                "virtual memory of nginx processes in bytes",
            ))?,
            open_fds: IntGauge::with_opts(opts(
                "open_fds",
                "file descriptors held by nginx processes",
            ))?,
            oldest_start_time: Gauge::with_opts(opts(
                "oldest_start_time_seconds",
                "start time of the oldest nginx process in seconds since epoch",
            ))?,
        })
    }

    fn update(&self, stats: &ProcessGroupStats, totals: &UsageCounters, boot_time: u64) {
        self.num_procs.set(stats.num_procs as i64);
        self.cpu_seconds.reset();
        self.cpu_seconds
            .inc_by(totals.cpu_ticks as f64 / CLK_TCK as f64);
        self.read_bytes.reset();
        self.read_bytes.inc_by(totals.read_bytes);
        self.write_bytes.reset();
        self.write_bytes.inc_by(totals.write_bytes);
        self.resident_memory.set(stats.resident_bytes as i64);
        self.virtual_memory.set(stats.virtual_bytes as i64);
        self.open_fds.set(stats.open_fds as i64);
        let start = stats
            .oldest_starttime
            .map(|ticks| boot_time as f64 + ticks as f64 / CLK_TCK as f64)
            .unwrap_or(0.0);
        self.oldest_start_time.set(start);
    }

    fn desc(&self) -> Vec<&Desc> {
        let mut descs = Vec::new();
        descs.extend(self.num_procs.desc());
        descs.extend(self.cpu_seconds.desc());
        descs.extend(self.read_bytes.desc());
        descs.extend(self.write_bytes.desc());
        descs.extend(self.resident_memory.desc());
        descs.extend(self.virtual_memory.desc());
        descs.extend(self.open_fds.desc());
        descs.extend(self.oldest_start_time.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        families.extend(self.num_procs.collect());
        families.extend(self.cpu_seconds.collect());
        families.extend(self.read_bytes.collect());
        families.extend(self.write_bytes.collect());
        families.extend(self.resident_memory.collect());
        families.extend(self.virtual_memory.collect());
        families.extend(self.open_fds.collect());
        families.extend(self.oldest_start_time.collect());
        families
    }
}

/// Collects process-group metrics for the processes selected by a matcher.
pub struct NamedProcessCollector<F: FileSystem> {
    fs: F,
    proc_path: String,
    matcher: BinaryNameMatcher,
    /// System boot time (seconds since epoch), used to calculate process start time.
    boot_time: u64,
    metrics: ProcessMetrics,
    /// Held for a whole scrape; serializes concurrent collects.
    counters: Mutex<GroupCounters>,
}

impl<F: FileSystem> NamedProcessCollector<F> {
    /// Creates a new process collector.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    /// * `matcher` - Selects the nginx processes
    ///
    /// Fails when the proc tree cannot be listed.
    pub fn new(
        fs: F,
        proc_path: impl Into<String>,
        matcher: BinaryNameMatcher,
    ) -> Result<Self, CollectError> {
        let proc_path = proc_path.into();
        fs.pids(Path::new(&proc_path))?;

        let boot_time = match fs
            .read_to_string(Path::new(&format!("{}/stat", proc_path)))
            .map_err(CollectError::from)
            .and_then(|content| parse_boot_time(&content).map_err(CollectError::from))
        {
            Ok(boot_time) => boot_time,
            Err(e) => {
                debug!(error = %e, "boot time unavailable, start times will be relative");
                0
            }
        };

        Ok(Self {
            fs,
            proc_path,
            matcher,
            boot_time,
            metrics: ProcessMetrics::new()?,
            counters: Mutex::new(GroupCounters::default()),
        })
    }

    /// Reads one process and returns its contribution, or `None` when it
    /// does not belong to the group.
    fn read_process(&self, pid: u32) -> Result<Option<ProcessGroupStats>, CollectError> {
        let proc_dir = format!("{}/{}", self.proc_path, pid);

        let cmdline = self
            .fs
            .read_to_string(Path::new(&format!("{}/cmdline", proc_dir)))
            .map_err(|_| CollectError::ProcessGone(pid))?;
        let cmdline = parse_cmdline(&cmdline);

        let stat_content = self
            .fs
            .read_to_string(Path::new(&format!("{}/stat", proc_dir)))
            .map_err(|_| CollectError::ProcessGone(pid))?;
        let stat = parse_proc_stat(&stat_content)?;

        let comm = self
            .fs
            .read_to_string(Path::new(&format!("{}/comm", proc_dir)))
            .map(|c| c.trim().to_string())
            .unwrap_or_else(|_| stat.comm.clone());

        if !self.matcher.matches(&comm, &cmdline) {
            return Ok(None);
        }

        // /proc/[pid]/io may be unreadable without CAP_SYS_PTRACE
        let io = self
            .fs
            .read_to_string(Path::new(&format!("{}/io", proc_dir)))
            .ok()
            .and_then(|content| parse_proc_io(&content).ok())
            .unwrap_or_default();

        let resident_bytes = self
            .fs
            .read_to_string(Path::new(&format!("{}/status", proc_dir)))
            .ok()
            .and_then(|content| parse_proc_status(&content).ok())
            .map(|status| status.vm_rss * 1024)
            .unwrap_or_else(|| stat.rss.max(0) as u64 * PAGE_SIZE);

        let open_fds = self
            .fs
            .count_entries(Path::new(&format!("{}/fd", proc_dir)))
            .unwrap_or(0) as u64;

        Ok(Some(ProcessGroupStats {
            num_procs: 1,
            cpu_ticks: stat.utime + stat.stime,
            read_bytes: io.read_bytes,
            write_bytes: io.write_bytes,
            resident_bytes,
            virtual_bytes: stat.vsize,
            open_fds,
            oldest_starttime: Some(stat.starttime),
        }))
    }

    /// Reads every matched process. Processes that disappear during the
    /// scan are silently skipped.
    fn scan_members(&self) -> Result<Vec<(u32, ProcessGroupStats)>, CollectError> {
        let pids = self.fs.pids(Path::new(&self.proc_path))?;
        let mut members = Vec::new();

        for pid in pids {
            match self.read_process(pid) {
                Ok(Some(stats)) => members.push((pid, stats)),
                Ok(None) | Err(CollectError::ProcessGone(_)) => continue,
                Err(e) => warn!(pid, error = %e, "failed to read process"),
            }
        }

        Ok(members)
    }

    /// Scans the proc tree and aggregates all matched processes.
    ///
    /// Counters are the current usage of live processes only.
    pub fn scan(&self) -> Result<ProcessGroupStats, CollectError> {
        Ok(aggregate(&self.scan_members()?))
    }
}

fn aggregate(members: &[(u32, ProcessGroupStats)]) -> ProcessGroupStats {
    let mut total = ProcessGroupStats::default();
    for (_, stats) in members {
        total.num_procs += stats.num_procs;
        total.cpu_ticks += stats.cpu_ticks;
        total.read_bytes += stats.read_bytes;
        total.write_bytes += stats.write_bytes;
        total.resident_bytes += stats.resident_bytes;
        total.virtual_bytes += stats.virtual_bytes;
        total.open_fds += stats.open_fds;
        total.oldest_starttime = match (total.oldest_starttime, stats.oldest_starttime) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
    total
}

impl<F: FileSystem> Collector for NamedProcessCollector<F> {
    fn desc(&self) -> Vec<&Desc> {
        self.metrics.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut counters = self.counters.lock();
        match self.scan_members() {
            Ok(members) => {
                let totals = counters.observe(&members);
                self.metrics
                    .update(&aggregate(&members), &totals, self.boot_time);
            }
            Err(e) => {
                warn!(error = %e, "failed to scan nginx processes");
                return Vec::new();
            }
        }
        self.metrics.collect()
    }
}
