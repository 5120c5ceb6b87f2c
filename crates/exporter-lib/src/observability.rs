//! Observability infrastructure for the exporter itself
//!
//! Provides:
//! - Prometheus self-metrics (tick latency, fan-out latency, sampler errors, runtime state)
//! - Structured JSON lifecycle logging with tracing

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use tracing::{info, warn};

/// Histogram buckets for tick and fan-out durations (in seconds)
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Exporter self-metrics for Prometheus exposition
///
/// Lives in its own registry so it never collides with the exported gauge
/// families. Clones share the same underlying metrics.
#[derive(Clone)]
pub struct ExporterMetrics {
    registry: Registry,
    tick_duration_seconds: Histogram,
    fanout_duration_seconds: Histogram,
    ticks: IntCounter,
    collection_errors: IntCounterVec,
    containers_collected: IntGauge,
    runtime_up: IntGauge,
}

impl ExporterMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let tick_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "metrics_exporter_tick_duration_seconds",
                "Time spent running every sampler of one tick",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        let fanout_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "metrics_exporter_fanout_duration_seconds",
                "Time spent fetching stats for all running containers",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        let ticks = IntCounter::new(
            "metrics_exporter_ticks_total",
            "Number of scheduler ticks run",
        )?;
        let collection_errors = IntCounterVec::new(
            Opts::new(
                "metrics_exporter_collection_errors_total",
                "Items or samplers that failed to collect",
            ),
            &["sampler"],
        )?;
        let containers_collected = IntGauge::new(
            "metrics_exporter_containers_collected",
            "Containers sampled successfully during the last fan-out",
        )?;
        let runtime_up = IntGauge::new(
            "metrics_exporter_container_runtime_up",
            "Whether the container runtime answered the last ping",
        )?;

        registry.register(Box::new(tick_duration_seconds.clone()))?;
        registry.register(Box::new(fanout_duration_seconds.clone()))?;
        registry.register(Box::new(ticks.clone()))?;
        registry.register(Box::new(collection_errors.clone()))?;
        registry.register(Box::new(containers_collected.clone()))?;
        registry.register(Box::new(runtime_up.clone()))?;

        Ok(Self {
            registry,
            tick_duration_seconds,
            fanout_duration_seconds,
            ticks,
            collection_errors,
            containers_collected,
            runtime_up,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record one finished tick
    pub fn observe_tick(&self, duration_secs: f64) {
        self.ticks.inc();
        self.tick_duration_seconds.observe(duration_secs);
    }

    pub fn observe_fanout_duration(&self, duration_secs: f64) {
        self.fanout_duration_seconds.observe(duration_secs);
    }

    /// Add `count` failures to a sampler's error counter
    pub fn inc_collection_errors(&self, sampler: &str, count: usize) {
        if count > 0 {
            self.collection_errors
                .with_label_values(&[sampler])
                .inc_by(count as u64);
        }
    }

    pub fn set_containers_collected(&self, count: usize) {
        self.containers_collected
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn set_runtime_up(&self, up: bool) {
        self.runtime_up.set(i64::from(up));
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.get()
    }

    pub fn collection_errors(&self, sampler: &str) -> u64 {
        self.collection_errors.with_label_values(&[sampler]).get()
    }
}

/// Structured logger for exporter lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log exporter startup
    pub fn log_startup(&self, version: &str, port: u16, containers_enabled: bool) {
        info!(
            event = "exporter_started",
            instance = %self.instance,
            exporter_version = %version,
            port = port,
            containers_enabled = containers_enabled,
            "Metrics exporter started"
        );
    }

    /// Log exporter shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Metrics exporter shutting down"
        );
    }

    /// Log whether the container runtime answered
    pub fn log_runtime_status(&self, socket: &str, reachable: bool, detail: Option<&str>) {
        if reachable {
            info!(
                event = "runtime_status",
                instance = %self.instance,
                socket = %socket,
                reachable = true,
                "Connected to container runtime"
            );
        } else {
            warn!(
                event = "runtime_status",
                instance = %self.instance,
                socket = %socket,
                reachable = false,
                detail = ?detail,
                "Container runtime unreachable, container metrics will be skipped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_metrics_are_independent() {
        let first = ExporterMetrics::new().unwrap();
        let second = ExporterMetrics::new().unwrap();

        first.observe_tick(0.01);
        first.observe_tick(0.02);
        second.observe_tick(0.03);

        assert_eq!(first.ticks(), 2);
        assert_eq!(second.ticks(), 1);
    }

    #[test]
    fn test_collection_errors_by_sampler() {
        let metrics = ExporterMetrics::new().unwrap();
        metrics.inc_collection_errors("host", 2);
        metrics.inc_collection_errors("host", 0);
        metrics.inc_collection_errors("containers", 1);

        assert_eq!(metrics.collection_errors("host"), 2);
        assert_eq!(metrics.collection_errors("containers"), 1);
    }

    #[test]
    fn test_registry_exposes_self_metrics() {
        let metrics = ExporterMetrics::new().unwrap();
        metrics.set_runtime_up(true);
        metrics.set_containers_collected(7);
        metrics.observe_fanout_duration(0.2);

        let names: Vec<String> = metrics
            .registry()
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();

        assert!(names.contains(&"metrics_exporter_container_runtime_up".to_string()));
        assert!(names.contains(&"metrics_exporter_containers_collected".to_string()));
        assert!(names.contains(&"metrics_exporter_fanout_duration_seconds".to_string()));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-host");
        assert_eq!(logger.instance, "test-host");
    }
}
