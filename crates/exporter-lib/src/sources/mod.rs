//! Capabilities the samplers read from
//!
//! [`HostCounters`] provides raw host counters and the process table,
//! [`ContainerRuntime`] provides container listings and stats. The
//! production implementations read procfs and talk to the Docker Engine
//! API; tests substitute in-memory fakes.

mod docker;
mod procfs;

pub use docker::{parse_http_response, DockerClient, DEFAULT_DOCKER_SOCKET};
pub use procfs::{
    default_procfs_root, parse_cpu_counters, parse_meminfo, parse_mounts, parse_nodev_filesystems,
    ProcfsHost,
};

use crate::error::CollectError;
use crate::models::{ContainerHandle, CpuCounters, MountPoint, ProcessSample, RawCounterSnapshot, UsageSummary};
use async_trait::async_trait;
use std::collections::HashMap;

/// Source of raw host counters
#[async_trait]
pub trait HostCounters: Send + Sync {
    /// Cumulative CPU time buckets, aggregate and per core
    async fn read_cpu_buckets(&self) -> Result<CpuCounters, CollectError>;

    async fn read_memory(&self) -> Result<UsageSummary, CollectError>;

    async fn read_swap(&self) -> Result<UsageSummary, CollectError>;

    /// Mounted filesystems worth reporting
    async fn list_mounts(&self) -> Result<Vec<MountPoint>, CollectError>;

    async fn disk_usage(&self, mountpoint: &str) -> Result<UsageSummary, CollectError>;

    /// Snapshot of every visible process, in enumeration order
    async fn list_processes(&mut self) -> Result<Vec<ProcessSample>, CollectError>;

    /// Number of logical CPUs on the host
    fn logical_cpus(&self) -> usize;
}

/// Container runtime API
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Lightweight liveness probe
    async fn ping(&self) -> Result<(), CollectError>;

    async fn list_containers(&self, include_stopped: bool)
        -> Result<Vec<ContainerHandle>, CollectError>;

    /// One-shot stats snapshot for a container
    async fn stats(&self, handle: &ContainerHandle) -> Result<RawCounterSnapshot, CollectError>;

    async fn labels(&self, handle: &ContainerHandle)
        -> Result<HashMap<String, String>, CollectError>;

    /// Refresh and return whether the container is running
    async fn running_state(&self, handle: &ContainerHandle) -> Result<bool, CollectError>;
}
