//! Filesystem seam for the process collector.
//!
//! Everything the collector knows about nginx processes comes from
//! `/proc`; reading it through [`FileSystem`] lets tests substitute an
//! in-memory tree ([`crate::collector::MockFs`]).

use std::io;
use std::path::{Path, PathBuf};

/// Read-only view of the proc tree.
pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    fn exists(&self, path: &Path) -> bool;

    /// Full paths of the entries of `path`, in no particular order.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Process ids listed under `proc_root`. Non-numeric entries such as
    /// `self` or `stat` are skipped.
    fn pids(&self, proc_root: &Path) -> io::Result<Vec<u32>> {
        let mut pids: Vec<u32> = self
            .read_dir(proc_root)?
            .iter()
            .filter_map(|entry| entry.file_name()?.to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    /// Number of entries in a directory, e.g. `/proc/[pid]/fd`.
    fn count_entries(&self, path: &Path) -> io::Result<usize> {
        self.read_dir(path).map(|entries| entries.len())
    }
}

/// `std::fs` backed implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }
}
