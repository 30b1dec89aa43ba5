//! Pre-built mock filesystem scenarios for testing.
//!
//! These scenarios model the `/proc` tree of an ingress controller pod:
//! an init shim, the controller itself and an nginx master with workers.

use super::filesystem::{MockFs, MockProcess};

/// Boot time written to `/proc/stat` by every scenario.
pub const SCENARIO_BOOT_TIME: u64 = 1_700_000_000;

/// Builds a `/proc/[pid]/stat` line with the fields the collector reads.
#[allow(clippy::too_many_arguments)]
fn stat_line(
    pid: u32,
    comm: &str,
    state: char,
    ppid: u32,
    utime: u64,
    stime: u64,
    starttime: u64,
    vsize: u64,
    rss: u64,
) -> String {
    format!(
        "{pid} ({comm}) {state} {ppid} {pid} {pid} 0 -1 4194560 2500 0 3 0 {utime} {stime} 0 0 20 0 1 0 {starttime} {vsize} {rss} 18446744073709551615 1 1 0 0 0 0 0 4096 134234626 0 0 0 17 2 0 0 0 0 0 0 0 0 0 0 0 0 0"
    )
}

fn status_lines(name: &str, pid: u32, vm_size_kb: u64, vm_rss_kb: u64) -> String {
    format!(
        "Name:\t{name}\nPid:\t{pid}\nVmSize:\t{vm_size_kb:>8} kB\nVmRSS:\t{vm_rss_kb:>8} kB\nThreads:\t1\n"
    )
}

fn io_lines(read_bytes: u64, write_bytes: u64) -> String {
    format!(
        "rchar: {read_bytes}\nwchar: {write_bytes}\nsyscr: 10\nsyscw: 10\nread_bytes: {read_bytes}\nwrite_bytes: {write_bytes}\ncancelled_write_bytes: 0\n"
    )
}

/// `/proc/[pid]` layout shared by every scenario process.
#[allow(clippy::too_many_arguments)]
fn process(
    pid: u32,
    comm: &str,
    state: char,
    ppid: u32,
    cpu: (u64, u64),
    starttime: u64,
    vsize: u64,
    rss_pages: u64,
    vm_rss_kb: u64,
) -> MockProcess {
    let (utime, stime) = cpu;
    MockProcess {
        stat: stat_line(pid, comm, state, ppid, utime, stime, starttime, vsize, rss_pages),
        status: status_lines(comm, pid, vsize / 1024, vm_rss_kb),
        ..MockProcess::new(pid, comm)
    }
}

impl MockFs {
    /// A controller pod without any nginx running yet.
    ///
    /// Includes: dumb-init (PID 1), kthreadd (PID 2), the controller (PID 7).
    pub fn controller_only() -> Self {
        let mut fs = Self::new();

        fs.add_file(
            "/proc/stat",
            format!(
                "cpu  10000 500 3000 80000 1000 200 100 0 0 0\nctxt 500000\nbtime {}\nprocesses 10000\n",
                SCENARIO_BOOT_TIME
            ),
        );

        fs.add_process(MockProcess {
            cmdline: "/usr/bin/dumb-init\0--\0/nginx-ingress-controller\0".to_string(),
            ..process(1, "dumb-init", 'S', 0, (1, 1), 1, 1_200_000, 100, 400)
        });

        // Kernel threads have an empty cmdline.
        fs.add_process(process(2, "kthreadd", 'S', 0, (0, 0), 0, 0, 0, 0));

        fs.add_process(MockProcess {
            cmdline: "/nginx-ingress-controller\0--configmap=ingress/nginx-configuration\0"
                .to_string(),
            io: Some(io_lines(1_000_000, 20_000)),
            fds: Some(40),
            ..process(7, "nginx-ingress-c", 'S', 1, (900, 300), 150, 800_000_000, 12_000, 48_000)
        });

        fs
    }

    /// A controller pod with an nginx master (PID 120), two workers
    /// (PIDs 130, 131) and a zombie nginx child (PID 140).
    ///
    /// Aggregates over the three live nginx processes:
    /// - cpu ticks: 950 (9.5 seconds)
    /// - read_bytes: 4096, write_bytes: 9216 (PID 131 has no readable io)
    /// - VmRSS: 49200 kB, vsize: 560224000 bytes
    /// - open fds: 48
    /// - oldest starttime: 4200 ticks
    pub fn nginx_ingress() -> Self {
        let mut fs = Self::controller_only();

        fs.add_process(MockProcess {
            cmdline: "/usr/sbin/nginx\0-c\0/etc/nginx/nginx.conf\0".to_string(),
            io: Some(io_lines(4096, 8192)),
            fds: Some(10),
            ..process(120, "nginx", 'S', 7, (150, 50), 4200, 180_224_000, 2800, 11_200)
        });

        // Workers rewrite their argv, so only comm identifies them.
        fs.add_process(MockProcess {
            cmdline: "nginx: worker process\0".to_string(),
            io: Some(io_lines(0, 1024)),
            fds: Some(20),
            ..process(130, "nginx", 'S', 120, (300, 100), 4300, 190_000_000, 5000, 20_000)
        });
        fs.add_process(MockProcess {
            cmdline: "nginx: worker process\0".to_string(),
            fds: Some(18),
            ..process(131, "nginx", 'S', 120, (250, 100), 4300, 190_000_000, 4500, 18_000)
        });

        fs.add_process(process(140, "nginx", 'Z', 120, (5, 5), 4400, 0, 0, 0));

        fs
    }
}
