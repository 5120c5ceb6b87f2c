//! Host counters read from procfs
//!
//! Reads:
//! - stat for cumulative CPU time buckets
//! - meminfo for memory and swap
//! - self/mounts and filesystems for the mount list
//!
//! Disk usage comes from statvfs(2) and the process table from sysinfo.

use super::HostCounters;
use crate::error::CollectError;
use crate::models::{CpuBuckets, CpuCounters, MountPoint, ProcessSample, UsageSummary};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::statvfs::statvfs;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use sysinfo::System;
use tokio::fs;

/// Host procfs bind-mounted into the exporter's container
const HOST_PROCFS: &str = "/host/proc";

/// Use the host's procfs when it is mounted, our own otherwise
pub fn default_procfs_root() -> PathBuf {
    if Path::new(HOST_PROCFS).exists() {
        PathBuf::from(HOST_PROCFS)
    } else {
        PathBuf::from("/proc")
    }
}

/// Host counter source backed by procfs
pub struct ProcfsHost {
    root: PathBuf,
    system: System,
    logical_cpus: usize,
}

impl ProcfsHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        let logical_cpus = system.cpus().len().max(1);

        Self {
            root: root.into(),
            system,
            logical_cpus,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read(&self, relative: &str) -> Result<String, CollectError> {
        let path = self.root.join(relative);
        fs::read_to_string(&path)
            .await
            .map_err(|e| CollectError::from_io(path.display().to_string(), e))
    }

    async fn meminfo(&self) -> Result<HashMap<String, u64>, CollectError> {
        Ok(parse_meminfo(&self.read("meminfo").await?))
    }
}

/// Parse the `cpu` lines of `/proc/stat`.
///
/// Total is the sum of every bucket on the line, idle is the fourth bucket.
pub fn parse_cpu_counters(content: &str) -> Result<CpuCounters, CollectError> {
    let mut aggregate = None;
    let mut per_core = Vec::new();

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let Some(label) = parts.next() else {
            continue;
        };
        if !label.starts_with("cpu") {
            continue;
        }

        let buckets = parts
            .map(str::parse::<u64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CollectError::parse(format!("{label} line"), e))?;
        if buckets.len() < 4 {
            return Err(CollectError::parse(
                format!("{label} line"),
                format!("expected at least 4 buckets, got {}", buckets.len()),
            ));
        }

        let counters = CpuBuckets {
            total: buckets.iter().sum(),
            idle: buckets[3],
        };

        if label == "cpu" {
            aggregate = Some(counters);
        } else {
            per_core.push(counters);
        }
    }

    let aggregate = aggregate.ok_or_else(|| CollectError::parse("stat", "no aggregate cpu line"))?;
    Ok(CpuCounters {
        aggregate,
        per_core,
    })
}

/// Parse `/proc/meminfo` into a map of field name to bytes
pub fn parse_meminfo(content: &str) -> HashMap<String, u64> {
    let mut fields = HashMap::new();

    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let mut parts = rest.split_whitespace();
        let Some(Ok(value)) = parts.next().map(str::parse::<u64>) else {
            continue;
        };
        let bytes = match parts.next() {
            Some("kB") => value * 1024,
            _ => value,
        };
        fields.insert(key.trim().to_string(), bytes);
    }

    fields
}

fn meminfo_field(fields: &HashMap<String, u64>, key: &str) -> Result<u64, CollectError> {
    fields
        .get(key)
        .copied()
        .ok_or_else(|| CollectError::parse("meminfo", format!("missing {key}")))
}

fn memory_summary(fields: &HashMap<String, u64>) -> Result<UsageSummary, CollectError> {
    let total = meminfo_field(fields, "MemTotal")?;
    // Kernels before 3.14 have no MemAvailable
    let available = match fields.get("MemAvailable") {
        Some(available) => *available,
        None => {
            meminfo_field(fields, "MemFree")?
                + fields.get("Buffers").copied().unwrap_or(0)
                + fields.get("Cached").copied().unwrap_or(0)
        }
    };

    Ok(UsageSummary::of_total(total.saturating_sub(available), total))
}

fn swap_summary(fields: &HashMap<String, u64>) -> Result<UsageSummary, CollectError> {
    let total = meminfo_field(fields, "SwapTotal")?;
    let free = meminfo_field(fields, "SwapFree")?;
    Ok(UsageSummary::of_total(total.saturating_sub(free), total))
}

/// Filesystem types the kernel marks `nodev` in `/proc/filesystems`
pub fn parse_nodev_filesystems(content: &str) -> HashSet<String> {
    content
        .lines()
        .filter_map(|line| line.strip_prefix("nodev"))
        .map(|fs_type| fs_type.trim().to_string())
        .filter(|fs_type| !fs_type.is_empty())
        .collect()
}

/// Parse a mounts table, dropping pseudo filesystems and repeated mountpoints
pub fn parse_mounts(content: &str, nodev: &HashSet<String>) -> Vec<MountPoint> {
    let mut seen = HashSet::new();
    let mut mounts = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            continue;
        }
        let fs_type = parts[2];
        if nodev.contains(fs_type) {
            continue;
        }

        let mountpoint = unescape_mount_path(parts[1]);
        if !seen.insert(mountpoint.clone()) {
            continue;
        }

        mounts.push(MountPoint {
            device: parts[0].to_string(),
            mountpoint,
            fs_type: fs_type.to_string(),
        });
    }

    mounts
}

/// Undo the octal escaping (`\040` for space) used in mount tables
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let byte = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(byte) = u8::try_from(byte) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn errno_to_error(path: &str, errno: Errno) -> CollectError {
    match errno {
        Errno::EACCES | Errno::EPERM => CollectError::PermissionDenied {
            path: path.to_string(),
        },
        other => CollectError::Io {
            path: path.to_string(),
            source: std::io::Error::from(other),
        },
    }
}

#[async_trait]
impl HostCounters for ProcfsHost {
    async fn read_cpu_buckets(&self) -> Result<CpuCounters, CollectError> {
        parse_cpu_counters(&self.read("stat").await?)
    }

    async fn read_memory(&self) -> Result<UsageSummary, CollectError> {
        memory_summary(&self.meminfo().await?)
    }

    async fn read_swap(&self) -> Result<UsageSummary, CollectError> {
        swap_summary(&self.meminfo().await?)
    }

    async fn list_mounts(&self) -> Result<Vec<MountPoint>, CollectError> {
        let nodev = match self.read("filesystems").await {
            Ok(content) => parse_nodev_filesystems(&content),
            Err(_) => HashSet::new(),
        };
        Ok(parse_mounts(&self.read("self/mounts").await?, &nodev))
    }

    async fn disk_usage(&self, mountpoint: &str) -> Result<UsageSummary, CollectError> {
        let path = mountpoint.to_string();
        let stat = tokio::task::spawn_blocking(move || statvfs(path.as_str()))
            .await
            .map_err(|e| CollectError::unavailable("statvfs", e))?
            .map_err(|errno| errno_to_error(mountpoint, errno))?;

        let fragment = stat.fragment_size() as u64;
        let total = stat.blocks() as u64 * fragment;
        let free = stat.blocks_free() as u64 * fragment;
        let available = stat.blocks_available() as u64 * fragment;
        let used = total.saturating_sub(free);

        // Percentage relative to what unprivileged users can reach, like df
        let reachable = used + available;
        let percent = if reachable == 0 {
            0.0
        } else {
            used as f64 / reachable as f64 * 100.0
        };

        Ok(UsageSummary {
            used,
            total,
            percent,
        })
    }

    async fn list_processes(&mut self) -> Result<Vec<ProcessSample>, CollectError> {
        self.system.refresh_processes();

        let mut samples: Vec<ProcessSample> = self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessSample {
                pid: pid.as_u32(),
                name: process.name().to_string(),
                cpu_percent: process.cpu_usage(),
                resident_bytes: process.memory(),
            })
            .collect();
        samples.sort_by_key(|sample| sample.pid);

        Ok(samples)
    }

    fn logical_cpus(&self) -> usize {
        self.logical_cpus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PROC_STAT: &str = "cpu  100 0 50 800 20 0 5 0 0 0
cpu0 50 0 25 400 10 0 3 0 0 0
cpu1 50 0 25 400 10 0 2 0 0 0
intr 1234 0 0
ctxt 5678
";

    const MEMINFO: &str = "MemTotal:        8000000 kB
MemFree:         1000000 kB
MemAvailable:    6000000 kB
Buffers:          200000 kB
Cached:          3000000 kB
SwapTotal:       2000000 kB
SwapFree:        1500000 kB
";

    #[test]
    fn test_parse_cpu_counters() {
        let counters = parse_cpu_counters(PROC_STAT).unwrap();
        assert_eq!(counters.aggregate, CpuBuckets { total: 975, idle: 800 });
        assert_eq!(counters.per_core.len(), 2);
        assert_eq!(counters.per_core[1], CpuBuckets { total: 487, idle: 400 });
    }

    #[test]
    fn test_parse_cpu_counters_missing_aggregate() {
        let err = parse_cpu_counters("intr 1\n").unwrap_err();
        assert!(matches!(err, CollectError::Parse { .. }));
    }

    #[test]
    fn test_parse_cpu_counters_short_line() {
        assert!(parse_cpu_counters("cpu 1 2 3\n").is_err());
    }

    #[test]
    fn test_memory_and_swap_summary() {
        let fields = parse_meminfo(MEMINFO);

        let memory = memory_summary(&fields).unwrap();
        assert_eq!(memory.total, 8_000_000 * 1024);
        assert_eq!(memory.used, 2_000_000 * 1024);
        assert_eq!(memory.percent, 25.0);

        let swap = swap_summary(&fields).unwrap();
        assert_eq!(swap.used, 500_000 * 1024);
        assert_eq!(swap.percent, 25.0);
    }

    #[test]
    fn test_memory_summary_without_mem_available() {
        let fields = parse_meminfo("MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 100 kB\nCached: 300 kB\n");
        let memory = memory_summary(&fields).unwrap();
        assert_eq!(memory.used, 500 * 1024);
    }

    #[test]
    fn test_parse_mounts_filters_pseudo_filesystems() {
        let nodev = parse_nodev_filesystems("nodev\tsysfs\nnodev\tproc\nnodev\ttmpfs\n\text4\n\txfs\n");
        assert!(nodev.contains("tmpfs"));
        assert!(!nodev.contains("ext4"));

        let mounts = parse_mounts(
            "sysfs /sys sysfs rw 0 0
proc /proc proc rw 0 0
/dev/sda1 / ext4 rw 0 0
/dev/sdb1 /mnt/my\\040data xfs rw 0 0
/dev/sda1 / ext4 rw 0 0
tmpfs /run tmpfs rw 0 0
",
            &nodev,
        );

        let points: Vec<&str> = mounts.iter().map(|m| m.mountpoint.as_str()).collect();
        assert_eq!(points, vec!["/", "/mnt/my data"]);
        assert_eq!(mounts[1].fs_type, "xfs");
    }

    #[tokio::test]
    async fn test_procfs_host_reads_fake_tree() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("stat"), PROC_STAT).await.unwrap();
        fs::write(root.join("meminfo"), MEMINFO).await.unwrap();
        fs::write(root.join("filesystems"), "nodev\tproc\n\text4\n")
            .await
            .unwrap();
        fs::create_dir_all(root.join("self")).await.unwrap();
        fs::write(
            root.join("self/mounts"),
            "proc /proc proc rw 0 0\n/dev/sda1 / ext4 rw 0 0\n",
        )
        .await
        .unwrap();

        let host = ProcfsHost::new(root);
        assert_eq!(host.read_cpu_buckets().await.unwrap().aggregate.idle, 800);
        assert_eq!(host.read_memory().await.unwrap().percent, 25.0);
        assert_eq!(host.read_swap().await.unwrap().total, 2_000_000 * 1024);

        let mounts = host.list_mounts().await.unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mountpoint, "/");
        assert!(host.logical_cpus() >= 1);
    }

    #[tokio::test]
    async fn test_missing_procfs_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let host = ProcfsHost::new(temp_dir.path());

        let err = host.read_cpu_buckets().await.unwrap_err();
        assert!(matches!(err, CollectError::Io { .. }));
    }

    #[tokio::test]
    async fn test_disk_usage_of_existing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let host = ProcfsHost::new("/proc");

        let usage = host
            .disk_usage(temp_dir.path().to_str().unwrap())
            .await
            .unwrap();
        assert!(usage.total > 0);
        assert!((0.0..=100.0).contains(&usage.percent));
    }

    #[tokio::test]
    async fn test_disk_usage_of_missing_path() {
        let host = ProcfsHost::new("/proc");
        let err = host
            .disk_usage("/definitely/not/a/mountpoint")
            .await
            .unwrap_err();
        assert!(!err.is_permission_denied());
    }
}
