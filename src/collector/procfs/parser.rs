//! Pure parsers for the `/proc` files the process collector reads.

use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{file}: command name is not enclosed in parentheses")]
    Comm { file: &'static str },
    #[error("{file}: missing {field}")]
    Missing {
        file: &'static str,
        field: &'static str,
    },
    #[error("{file}: invalid {field} {value:?}")]
    Invalid {
        file: &'static str,
        field: &'static str,
        value: String,
    },
}

fn parse_value<T: FromStr>(
    file: &'static str,
    field: &'static str,
    value: Option<&str>,
) -> Result<T, ParseError> {
    let value = value.ok_or(ParseError::Missing { file, field })?;
    value.parse().map_err(|_| ParseError::Invalid {
        file,
        field,
        value: value.to_string(),
    })
}

/// Iterates `key: value` lines, trimming both sides.
fn key_values(content: &str) -> impl Iterator<Item = (&str, &str)> {
    content
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
}

/// Fields of `/proc/[pid]/stat` used for aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    /// Clock ticks spent in user mode.
    pub utime: u64,
    /// Clock ticks spent in kernel mode.
    pub stime: u64,
    /// Clock ticks after boot at which the process started.
    pub starttime: u64,
    /// Virtual memory size in bytes.
    pub vsize: u64,
    /// Resident set size in pages.
    pub rss: i64,
}

/// Parses `/proc/[pid]/stat`.
///
/// `comm` may itself contain spaces and parentheses, so it is taken between
/// the first `(` and the last `)`.
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    const FILE: &str = "stat";
    // Positions counted from the state field, the first one after `comm`.
    const UTIME: usize = 11;
    const STIME: usize = 12;
    const STARTTIME: usize = 19;
    const VSIZE: usize = 20;
    const RSS: usize = 21;

    let content = content.trim();
    let (head, rest) = content
        .split_once('(')
        .ok_or(ParseError::Comm { file: FILE })?;
    let (comm, tail) = rest
        .rsplit_once(')')
        .ok_or(ParseError::Comm { file: FILE })?;

    let fields: Vec<&str> = tail.split_whitespace().collect();
    let field = |idx: usize| fields.get(idx).copied();

    Ok(ProcStat {
        pid: parse_value(FILE, "pid", Some(head.trim()))?,
        comm: comm.to_string(),
        state: field(0)
            .and_then(|s| s.chars().next())
            .ok_or(ParseError::Missing {
                file: FILE,
                field: "state",
            })?,
        utime: parse_value(FILE, "utime", field(UTIME))?,
        stime: parse_value(FILE, "stime", field(STIME))?,
        starttime: parse_value(FILE, "starttime", field(STARTTIME))?,
        vsize: parse_value(FILE, "vsize", field(VSIZE))?,
        rss: parse_value(FILE, "rss", field(RSS))?,
    })
}

/// Fields of `/proc/[pid]/status`. Memory sizes are in kB.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcStatus {
    pub name: String,
    pub vm_size: u64,
    pub vm_rss: u64,
}

/// Parses `/proc/[pid]/status`. Kernel threads carry no `Vm*` lines, so
/// those default to zero; `Name` is required.
pub fn parse_proc_status(content: &str) -> Result<ProcStatus, ParseError> {
    const FILE: &str = "status";

    let mut name = None;
    let mut status = ProcStatus::default();
    for (key, value) in key_values(content) {
        let kb = value.split_whitespace().next();
        match key {
            "Name" => name = Some(value.to_string()),
            "VmSize" => status.vm_size = parse_value(FILE, "VmSize", kb)?,
            "VmRSS" => status.vm_rss = parse_value(FILE, "VmRSS", kb)?,
            _ => {}
        }
    }

    status.name = name.ok_or(ParseError::Missing {
        file: FILE,
        field: "Name",
    })?;
    Ok(status)
}

/// Storage I/O of a process, from `/proc/[pid]/io`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcIo {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

pub fn parse_proc_io(content: &str) -> Result<ProcIo, ParseError> {
    const FILE: &str = "io";

    let mut io = ProcIo::default();
    for (key, value) in key_values(content) {
        match key {
            "read_bytes" => io.read_bytes = parse_value(FILE, "read_bytes", Some(value))?,
            "write_bytes" => io.write_bytes = parse_value(FILE, "write_bytes", Some(value))?,
            _ => {}
        }
    }
    Ok(io)
}

/// Boot time in seconds since the epoch, from the `btime` line of `/proc/stat`.
pub fn parse_boot_time(content: &str) -> Result<u64, ParseError> {
    let btime = content
        .lines()
        .find_map(|line| line.strip_prefix("btime"))
        .map(str::trim);
    parse_value("/proc/stat", "btime", btime)
}

/// Splits `/proc/[pid]/cmdline` on NUL.
pub fn parse_cmdline(content: &str) -> Vec<String> {
    content
        .split('\0')
        .filter(|arg| !arg.is_empty())
        .map(str::to_string)
        .collect()
}
