//! Metrics sink the samplers write observations into
//!
//! Every observation is an idempotent overwrite keyed by metric and label
//! values. [`PrometheusSink`] backs the scrape endpoint; [`MemorySink`]
//! keeps the latest values in a map and is handy for inspection.

use dashmap::DashMap;
use prometheus::{GaugeVec, Opts, Registry};
use std::collections::HashMap;
use tracing::warn;

/// Gauge families exported by the sampling engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    SystemCpuUsagePercent,
    SystemCpuCoreUsagePercent,
    SystemRamUsageBytes,
    SystemRamTotalBytes,
    SystemRamUsagePercent,
    SystemSwapUsageBytes,
    SystemSwapTotalBytes,
    SystemSwapUsagePercent,
    SystemDiskUsageBytes,
    SystemDiskTotalBytes,
    SystemDiskUsagePercent,
    ContainerCpuUsagePercent,
    ContainerMemoryUsageBytes,
    ContainerMemoryLimitBytes,
    ComposeContainerStatus,
    ComposeContainerStatusFlat,
    TopProcessCpuUsagePercent,
    TopProcessMemoryUsageBytes,
}

impl Metric {
    pub const ALL: [Metric; 18] = [
        Metric::SystemCpuUsagePercent,
        Metric::SystemCpuCoreUsagePercent,
        Metric::SystemRamUsageBytes,
        Metric::SystemRamTotalBytes,
        Metric::SystemRamUsagePercent,
        Metric::SystemSwapUsageBytes,
        Metric::SystemSwapTotalBytes,
        Metric::SystemSwapUsagePercent,
        Metric::SystemDiskUsageBytes,
        Metric::SystemDiskTotalBytes,
        Metric::SystemDiskUsagePercent,
        Metric::ContainerCpuUsagePercent,
        Metric::ContainerMemoryUsageBytes,
        Metric::ContainerMemoryLimitBytes,
        Metric::ComposeContainerStatus,
        Metric::ComposeContainerStatusFlat,
        Metric::TopProcessCpuUsagePercent,
        Metric::TopProcessMemoryUsageBytes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::SystemCpuUsagePercent => "system_cpu_usage_percent",
            Metric::SystemCpuCoreUsagePercent => "system_cpu_core_usage_percent",
            Metric::SystemRamUsageBytes => "system_ram_usage_bytes",
            Metric::SystemRamTotalBytes => "system_ram_total_bytes",
            Metric::SystemRamUsagePercent => "system_ram_usage_percent",
            Metric::SystemSwapUsageBytes => "system_swap_usage_bytes",
            Metric::SystemSwapTotalBytes => "system_swap_total_bytes",
            Metric::SystemSwapUsagePercent => "system_swap_usage_percent",
            Metric::SystemDiskUsageBytes => "system_disk_usage_bytes",
            Metric::SystemDiskTotalBytes => "system_disk_total_bytes",
            Metric::SystemDiskUsagePercent => "system_disk_usage_percent",
            Metric::ContainerCpuUsagePercent => "container_cpu_usage_percent",
            Metric::ContainerMemoryUsageBytes => "container_memory_usage_bytes",
            Metric::ContainerMemoryLimitBytes => "container_memory_limit_bytes",
            Metric::ComposeContainerStatus => "docker_compose_container_status",
            Metric::ComposeContainerStatusFlat => "docker_compose_container_status_flat",
            Metric::TopProcessCpuUsagePercent => "top_process_cpu_usage_percent",
            Metric::TopProcessMemoryUsageBytes => "top_process_memory_usage_bytes",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Metric::SystemCpuUsagePercent => "Average CPU usage across all cores",
            Metric::SystemCpuCoreUsagePercent => "CPU usage of a single logical core",
            Metric::SystemRamUsageBytes => "RAM usage in bytes",
            Metric::SystemRamTotalBytes => "Total RAM in bytes",
            Metric::SystemRamUsagePercent => "RAM usage percentage",
            Metric::SystemSwapUsageBytes => "Swap usage in bytes",
            Metric::SystemSwapTotalBytes => "Total swap in bytes",
            Metric::SystemSwapUsagePercent => "Swap usage percentage",
            Metric::SystemDiskUsageBytes => "Disk usage in bytes",
            Metric::SystemDiskTotalBytes => "Total disk space in bytes",
            Metric::SystemDiskUsagePercent => "Disk usage percentage",
            Metric::ContainerCpuUsagePercent => "Container CPU usage percentage",
            Metric::ContainerMemoryUsageBytes => "Container memory usage in bytes",
            Metric::ContainerMemoryLimitBytes => "Container memory limit in bytes",
            Metric::ComposeContainerStatus => {
                "Docker Compose container status: 1=running, 0=stopped"
            }
            Metric::ComposeContainerStatusFlat => {
                "Container status for dashboard status panels (1=running, 0=stopped)"
            }
            Metric::TopProcessCpuUsagePercent => "Top 5 processes by CPU usage",
            Metric::TopProcessMemoryUsageBytes => "Top 5 processes by memory usage",
        }
    }

    /// Ordered label names of the family
    pub fn label_names(self) -> &'static [&'static str] {
        match self {
            Metric::SystemCpuCoreUsagePercent => &["core"],
            Metric::SystemDiskUsageBytes
            | Metric::SystemDiskTotalBytes
            | Metric::SystemDiskUsagePercent => &["mountpoint"],
            Metric::ContainerCpuUsagePercent
            | Metric::ContainerMemoryUsageBytes
            | Metric::ContainerMemoryLimitBytes
            | Metric::ComposeContainerStatus => &["container_name", "project"],
            Metric::ComposeContainerStatusFlat => &["name"],
            Metric::TopProcessCpuUsagePercent | Metric::TopProcessMemoryUsageBytes => {
                &["pid", "name"]
            }
            _ => &[],
        }
    }
}

/// One named, labeled numeric value
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub metric: Metric,
    /// Label values, in the order of [`Metric::label_names`]
    pub labels: Vec<String>,
    pub value: f64,
}

impl Observation {
    pub fn new(metric: Metric, value: f64) -> Self {
        Self {
            metric,
            labels: Vec::new(),
            value,
        }
    }

    pub fn with_labels<I, S>(metric: Metric, labels: I, value: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            metric,
            labels: labels.into_iter().map(Into::into).collect(),
            value,
        }
    }
}

/// Destination for observations. Must accept concurrent writers.
pub trait MetricsSink: Send + Sync {
    /// Upsert the value keyed by metric and label values
    fn set(&self, observation: Observation);
}

/// Sink backed by Prometheus gauge vectors in a dedicated registry
pub struct PrometheusSink {
    registry: Registry,
    gauges: HashMap<Metric, GaugeVec>,
}

impl PrometheusSink {
    /// Create the sink and register every gauge family
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let mut gauges = HashMap::with_capacity(Metric::ALL.len());

        for metric in Metric::ALL {
            let gauge = GaugeVec::new(Opts::new(metric.name(), metric.help()), metric.label_names())?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(metric, gauge);
        }

        Ok(Self { registry, gauges })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl MetricsSink for PrometheusSink {
    fn set(&self, observation: Observation) {
        let Some(gauge) = self.gauges.get(&observation.metric) else {
            return;
        };
        let labels: Vec<&str> = observation.labels.iter().map(String::as_str).collect();

        match gauge.get_metric_with_label_values(&labels) {
            Ok(g) => g.set(observation.value),
            Err(e) => warn!(
                metric = observation.metric.name(),
                error = %e,
                "Dropping observation with mismatched labels"
            ),
        }
    }
}

/// In-memory sink keeping the latest value per key
#[derive(Debug, Default)]
pub struct MemorySink {
    values: DashMap<(Metric, Vec<String>), f64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, metric: Metric, labels: &[&str]) -> Option<f64> {
        let key = (metric, labels.iter().map(|l| l.to_string()).collect());
        self.values.get(&key).map(|v| *v)
    }

    /// Number of distinct label sets recorded for `metric`
    pub fn count(&self, metric: Metric) -> usize {
        self.values.iter().filter(|e| e.key().0 == metric).count()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl MetricsSink for MemorySink {
    fn set(&self, observation: Observation) {
        self.values
            .insert((observation.metric, observation.labels), observation.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_memory_sink_overwrites() {
        let sink = MemorySink::new();
        sink.set(Observation::with_labels(
            Metric::SystemDiskUsageBytes,
            ["/"],
            10.0,
        ));
        sink.set(Observation::with_labels(
            Metric::SystemDiskUsageBytes,
            ["/"],
            20.0,
        ));

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.get(Metric::SystemDiskUsageBytes, &["/"]), Some(20.0));
    }

    #[test]
    fn test_prometheus_sink_encodes_observations() {
        let sink = PrometheusSink::new().unwrap();
        sink.set(Observation::new(Metric::SystemCpuUsagePercent, 42.5));
        sink.set(Observation::with_labels(
            Metric::ComposeContainerStatus,
            ["db", "shop"],
            1.0,
        ));

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&sink.registry().gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains("system_cpu_usage_percent 42.5"));
        assert!(text.contains(
            r#"docker_compose_container_status{container_name="db",project="shop"} 1"#
        ));
    }

    #[test]
    fn test_prometheus_sink_drops_mismatched_labels() {
        let sink = PrometheusSink::new().unwrap();
        sink.set(Observation::with_labels(
            Metric::ContainerMemoryUsageBytes,
            ["only-one"],
            1.0,
        ));

        let families = sink.registry().gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == "container_memory_usage_bytes");
        assert!(family.map(|f| f.get_metric().is_empty()).unwrap_or(true));
    }

    #[test]
    fn test_every_metric_registers() {
        let sink = PrometheusSink::new().unwrap();
        assert_eq!(sink.gauges.len(), Metric::ALL.len());
    }
}
