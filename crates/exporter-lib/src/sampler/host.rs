//! Host CPU, memory, swap and disk sampling

use crate::delta::{CounterWindows, StreamId};
use crate::error::{CollectError, SampleOutcome, SampleReport};
use crate::sink::{MetricsSink, Metric, Observation};
use crate::sources::HostCounters;
use tracing::debug;

/// Mountpoints under these prefixes are never reported
pub const PSEUDO_FS_PREFIXES: [&str; 4] = ["/proc", "/sys", "/dev", "/run"];

/// Samples host-level counters every tick
#[derive(Debug, Clone, Default)]
pub struct HostSampler;

impl HostSampler {
    pub fn new() -> Self {
        Self
    }

    /// Sample every category, each failing independently of the others.
    ///
    /// CPU windows are owned by the caller and updated in place. Fails
    /// only when no category could be read at all.
    pub async fn collect(
        &self,
        host: &dyn HostCounters,
        windows: &mut CounterWindows,
        sink: &dyn MetricsSink,
    ) -> SampleOutcome {
        let mut report = SampleReport::default();

        let read = [
            self.collect_cpu(host, windows, sink, &mut report).await,
            self.collect_memory(host, sink, &mut report).await,
            self.collect_swap(host, sink, &mut report).await,
            self.collect_disks(host, sink, &mut report).await,
        ];

        if read.iter().any(|ok| *ok) {
            return SampleOutcome::Collected(report);
        }

        let items: Vec<&str> = report
            .failures
            .iter()
            .map(|failure| failure.item.as_str())
            .collect();
        SampleOutcome::Failed(CollectError::unavailable(
            "host counters",
            format!("no category readable ({})", items.join(", ")),
        ))
    }

    async fn collect_cpu(
        &self,
        host: &dyn HostCounters,
        windows: &mut CounterWindows,
        sink: &dyn MetricsSink,
        report: &mut SampleReport,
    ) -> bool {
        let counters = match host.read_cpu_buckets().await {
            Ok(counters) => counters,
            Err(e) => {
                report.fail("cpu", e);
                return false;
            }
        };

        let aggregate = counters.aggregate;
        if let Some(percent) = windows
            .observe(StreamId::Host, aggregate.total, aggregate.idle)
            .percent()
        {
            sink.set(Observation::new(Metric::SystemCpuUsagePercent, percent));
            report.observations += 1;
        }

        for (core, buckets) in counters.per_core.iter().enumerate() {
            if let Some(percent) = windows
                .observe(StreamId::Core(core), buckets.total, buckets.idle)
                .percent()
            {
                sink.set(Observation::with_labels(
                    Metric::SystemCpuCoreUsagePercent,
                    [core.to_string()],
                    percent,
                ));
                report.observations += 1;
            }
        }
        true
    }

    async fn collect_memory(
        &self,
        host: &dyn HostCounters,
        sink: &dyn MetricsSink,
        report: &mut SampleReport,
    ) -> bool {
        match host.read_memory().await {
            Ok(memory) => {
                sink.set(Observation::new(Metric::SystemRamUsageBytes, memory.used as f64));
                sink.set(Observation::new(Metric::SystemRamTotalBytes, memory.total as f64));
                sink.set(Observation::new(Metric::SystemRamUsagePercent, memory.percent));
                report.observations += 3;
                true
            }
            Err(e) => {
                report.fail("memory", e);
                false
            }
        }
    }

    async fn collect_swap(
        &self,
        host: &dyn HostCounters,
        sink: &dyn MetricsSink,
        report: &mut SampleReport,
    ) -> bool {
        match host.read_swap().await {
            Ok(swap) => {
                sink.set(Observation::new(Metric::SystemSwapUsageBytes, swap.used as f64));
                sink.set(Observation::new(Metric::SystemSwapTotalBytes, swap.total as f64));
                sink.set(Observation::new(Metric::SystemSwapUsagePercent, swap.percent));
                report.observations += 3;
                true
            }
            Err(e) => {
                report.fail("swap", e);
                false
            }
        }
    }

    async fn collect_disks(
        &self,
        host: &dyn HostCounters,
        sink: &dyn MetricsSink,
        report: &mut SampleReport,
    ) -> bool {
        let mounts = match host.list_mounts().await {
            Ok(mounts) => mounts,
            Err(e) => {
                report.fail("mounts", e);
                return false;
            }
        };

        for mount in mounts {
            let mountpoint = mount.mountpoint.as_str();
            if is_pseudo_mount(mountpoint) {
                report.skipped += 1;
                continue;
            }

            match host.disk_usage(mountpoint).await {
                Ok(usage) => {
                    sink.set(Observation::with_labels(
                        Metric::SystemDiskUsageBytes,
                        [mountpoint],
                        usage.used as f64,
                    ));
                    sink.set(Observation::with_labels(
                        Metric::SystemDiskTotalBytes,
                        [mountpoint],
                        usage.total as f64,
                    ));
                    sink.set(Observation::with_labels(
                        Metric::SystemDiskUsagePercent,
                        [mountpoint],
                        usage.percent,
                    ));
                    report.observations += 3;
                    report.items += 1;
                }
                Err(e) if e.is_permission_denied() => {
                    debug!(mountpoint = %mountpoint, "Skipping unreadable mount");
                    report.skipped += 1;
                }
                // Previous values stay in place rather than dropping to zero
                Err(e) => report.fail(format!("disk:{mountpoint}"), e),
            }
        }
        true
    }
}

/// Whether a mountpoint lives under a pseudo filesystem prefix
pub fn is_pseudo_mount(mountpoint: &str) -> bool {
    PSEUDO_FS_PREFIXES
        .iter()
        .any(|prefix| mountpoint.starts_with(prefix))
}
