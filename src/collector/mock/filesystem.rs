//! In-memory proc tree.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::collector::traits::FileSystem;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Dir,
    File(String),
}

/// One `/proc/[pid]` directory.
///
/// Unset files are left out of the tree, which is how the kernel presents
/// an unreadable `io` or a missing `fd` directory.
#[derive(Debug, Clone, Default)]
pub struct MockProcess {
    pub pid: u32,
    pub stat: String,
    pub status: String,
    pub io: Option<String>,
    /// Raw NUL separated argv; empty for kernel threads and zombies.
    pub cmdline: String,
    pub comm: String,
    pub fds: Option<usize>,
}

impl MockProcess {
    pub fn new(pid: u32, comm: &str) -> Self {
        Self {
            pid,
            comm: format!("{}\n", comm),
            ..Self::default()
        }
    }
}

/// Path keyed tree of directories and files.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    nodes: BTreeMap<PathBuf, Node>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a file, creating missing parent directories.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        self.nodes
            .insert(path.to_path_buf(), Node::File(content.into()));
    }

    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        for ancestor in path.as_ref().ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            self.nodes
                .entry(ancestor.to_path_buf())
                .or_insert(Node::Dir);
        }
    }

    /// Deletes `path` and everything below it.
    pub fn remove(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.nodes.retain(|p, _| !p.starts_with(path));
    }

    /// Lays out `/proc/[pid]` for `process`.
    pub fn add_process(&mut self, process: MockProcess) {
        let base = PathBuf::from(format!("/proc/{}", process.pid));
        self.add_file(base.join("stat"), process.stat);
        self.add_file(base.join("status"), process.status);
        self.add_file(base.join("cmdline"), process.cmdline);
        self.add_file(base.join("comm"), process.comm);
        if let Some(io) = process.io {
            self.add_file(base.join("io"), io);
        }
        if let Some(count) = process.fds {
            let fd_dir = base.join("fd");
            self.add_dir(&fd_dir);
            for fd in 0..count {
                // Real entries are symlinks; only their presence matters.
                self.add_file(fd_dir.join(fd.to_string()), "");
            }
        }
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        match self.nodes.get(path) {
            Some(Node::File(content)) => Ok(content.clone()),
            Some(Node::Dir) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{} is a directory", path.display()),
            )),
            None => Err(Self::not_found(path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.nodes.contains_key(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        match self.nodes.get(path) {
            Some(Node::Dir) => Ok(self
                .nodes
                .range(path.to_path_buf()..)
                .skip(1)
                .take_while(|(p, _)| p.starts_with(path))
                .filter(|(p, _)| p.parent() == Some(path))
                .map(|(p, _)| p.clone())
                .collect()),
            Some(Node::File(_)) => Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{} is a file", path.display()),
            )),
            None => Err(Self::not_found(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_create_parents() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "btime 1700000000\n");

        assert!(fs.exists(Path::new("/proc")));
        assert_eq!(
            fs.read_to_string(Path::new("/proc/stat")).unwrap(),
            "btime 1700000000\n"
        );
        assert_eq!(
            fs.read_to_string(Path::new("/proc")).unwrap_err().kind(),
            io::ErrorKind::IsADirectory
        );
    }

    #[test]
    fn test_read_dir_lists_direct_children_only() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/1/stat", "a");
        fs.add_file("/proc/1/status", "b");
        fs.add_file("/proc/12/stat", "c");
        fs.add_file("/proc/stat", "d");

        let mut entries = fs.read_dir(Path::new("/proc")).unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/proc/1"),
                PathBuf::from("/proc/12"),
                PathBuf::from("/proc/stat"),
            ]
        );
        assert_eq!(fs.read_dir(Path::new("/proc/1")).unwrap().len(), 2);
        assert!(fs.read_dir(Path::new("/proc/stat")).is_err());
    }

    #[test]
    fn test_add_process_layout() {
        let mut fs = MockFs::new();
        fs.add_process(MockProcess {
            cmdline: "/usr/sbin/nginx\0".to_string(),
            fds: Some(3),
            ..MockProcess::new(120, "nginx")
        });
        fs.add_process(MockProcess::new(131, "nginx"));

        assert_eq!(fs.pids(Path::new("/proc")).unwrap(), vec![120, 131]);
        assert_eq!(fs.count_entries(Path::new("/proc/120/fd")).unwrap(), 3);
        assert!(!fs.exists(Path::new("/proc/120/io")));
        assert!(!fs.exists(Path::new("/proc/131/fd")));
        assert_eq!(
            fs.read_to_string(Path::new("/proc/131/comm")).unwrap(),
            "nginx\n"
        );
    }

    #[test]
    fn test_remove_subtree() {
        let mut fs = MockFs::new();
        fs.add_process(MockProcess {
            fds: Some(2),
            ..MockProcess::new(120, "nginx")
        });
        fs.add_process(MockProcess::new(130, "nginx"));

        fs.remove("/proc/120");

        assert!(!fs.exists(Path::new("/proc/120")));
        assert!(!fs.exists(Path::new("/proc/120/fd/0")));
        assert!(fs.exists(Path::new("/proc/130/stat")));
        assert_eq!(fs.pids(Path::new("/proc")).unwrap(), vec![130]);
    }
}
