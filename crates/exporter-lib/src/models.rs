//! Core data models for the sampling engine

use serde::Deserialize;
use std::collections::HashMap;

/// Label the compose CLI attaches to every container of a project
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Label value used when a container carries no compose project
pub const UNKNOWN_PROJECT: &str = "unknown";

/// Raw CPU time buckets of one `cpu` line in `/proc/stat`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuBuckets {
    pub total: u64,
    pub idle: u64,
}

/// Aggregate and per-core CPU buckets read in one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuCounters {
    pub aggregate: CpuBuckets,
    pub per_core: Vec<CpuBuckets>,
}

/// Used/total/percent triple shared by memory, swap and disk readings
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageSummary {
    pub used: u64,
    pub total: u64,
    pub percent: f64,
}

impl UsageSummary {
    /// Build a summary where the percentage is relative to `total`
    pub fn of_total(used: u64, total: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        Self {
            used,
            total,
            percent,
        }
    }
}

/// A mounted filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub device: String,
    pub mountpoint: String,
    pub fs_type: String,
}

/// One process in the ranking snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub resident_bytes: u64,
}

/// Container as returned by the runtime's listing call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Per-tick identity of a container, resolved fresh from the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerIdentity {
    pub id: String,
    pub name: String,
    pub compose_project: Option<String>,
}

impl ContainerIdentity {
    pub fn resolve(handle: &ContainerHandle, labels: &HashMap<String, String>) -> Self {
        Self {
            id: handle.id.clone(),
            name: handle.name.clone(),
            compose_project: labels.get(COMPOSE_PROJECT_LABEL).cloned(),
        }
    }

    /// Project label value, `"unknown"` when absent
    pub fn project_label(&self) -> &str {
        self.compose_project.as_deref().unwrap_or(UNKNOWN_PROJECT)
    }
}

/// One-shot stats document from `GET /containers/{id}/stats?stream=false`.
///
/// The runtime embeds two consecutive internal samples (`cpu_stats` and
/// `precpu_stats`), so no external counter window is needed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCounterSnapshot {
    #[serde(default)]
    pub cpu_stats: CpuStats,
    #[serde(default)]
    pub precpu_stats: CpuStats,
    #[serde(default)]
    pub memory_stats: MemoryStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    #[serde(default)]
    pub system_cpu_usage: Option<u64>,
    #[serde(default)]
    pub online_cpus: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub total_usage: u64,
    #[serde(default)]
    pub percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl RawCounterSnapshot {
    /// Container CPU time consumed between the two embedded samples
    pub fn cpu_delta(&self) -> f64 {
        self.cpu_stats.cpu_usage.total_usage as f64
            - self.precpu_stats.cpu_usage.total_usage as f64
    }

    /// Host CPU time elapsed between the two embedded samples
    pub fn system_delta(&self) -> f64 {
        self.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
            - self.precpu_stats.system_cpu_usage.unwrap_or(0) as f64
    }

    /// Reported online CPUs, falling back to the per-CPU usage list length.
    /// Zero when neither is present.
    pub fn online_cpus(&self) -> u32 {
        self.cpu_stats.online_cpus.unwrap_or_else(|| {
            self.cpu_stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|per_cpu| per_cpu.len() as u32)
                .unwrap_or(0)
        })
    }

    pub fn memory_usage(&self) -> u64 {
        self.memory_stats.usage.unwrap_or(0)
    }

    pub fn memory_limit(&self) -> u64 {
        self.memory_stats.limit.unwrap_or(0)
    }
}

/// Per-container values computed from one stats snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSample {
    pub identity: ContainerIdentity,
    pub cpu_percent: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATS_JSON: &str = r#"{
        "read": "2024-01-01T00:00:05Z",
        "cpu_stats": {
            "cpu_usage": {"total_usage": 400000000, "percpu_usage": [200000000, 200000000]},
            "system_cpu_usage": 20000000000
        },
        "precpu_stats": {
            "cpu_usage": {"total_usage": 300000000},
            "system_cpu_usage": 19000000000,
            "online_cpus": 2
        },
        "memory_stats": {"usage": 104857600, "limit": 2147483648}
    }"#;

    #[test]
    fn test_snapshot_deserialize() {
        let snapshot: RawCounterSnapshot = serde_json::from_str(STATS_JSON).unwrap();

        assert_eq!(snapshot.cpu_delta(), 100_000_000.0);
        assert_eq!(snapshot.system_delta(), 1_000_000_000.0);
        // online_cpus missing on the current sample, falls back to percpu list
        assert_eq!(snapshot.online_cpus(), 2);
        assert_eq!(snapshot.memory_usage(), 104_857_600);
        assert_eq!(snapshot.memory_limit(), 2_147_483_648);
    }

    #[test]
    fn test_snapshot_of_stopped_container() {
        let snapshot: RawCounterSnapshot =
            serde_json::from_str(r#"{"cpu_stats": {}, "precpu_stats": {}, "memory_stats": {}}"#)
                .unwrap();

        assert_eq!(snapshot.system_delta(), 0.0);
        assert_eq!(snapshot.online_cpus(), 0);
        assert_eq!(snapshot.memory_usage(), 0);
    }

    #[test]
    fn test_identity_project_label() {
        let handle = ContainerHandle::new("abc", "web").with_label(COMPOSE_PROJECT_LABEL, "shop");
        let identity = ContainerIdentity::resolve(&handle, &handle.labels);
        assert_eq!(identity.project_label(), "shop");

        let bare = ContainerHandle::new("def", "adhoc");
        let identity = ContainerIdentity::resolve(&bare, &bare.labels);
        assert_eq!(identity.compose_project, None);
        assert_eq!(identity.project_label(), UNKNOWN_PROJECT);
    }

    #[test]
    fn test_usage_summary_of_total() {
        let summary = UsageSummary::of_total(25, 100);
        assert_eq!(summary.percent, 25.0);
        assert_eq!(UsageSummary::of_total(0, 0).percent, 0.0);
    }
}
