//! Sampling scheduler
//!
//! Drives every sampler from a single task on a fixed tick. Host, process
//! and compose status samplers run on every tick; the container stats
//! fan-out only runs on heavy ticks.

use crate::delta::CounterWindows;
use crate::error::SampleOutcome;
use crate::health::{components, HealthRegistry};
use crate::observability::ExporterMetrics;
use crate::sampler::{
    ComposeStatusTracker, FanoutCollector, HostSampler, ProcessRanker, DEFAULT_MAX_IN_FLIGHT,
    DEFAULT_TOP_N,
};
use crate::sink::MetricsSink;
use crate::sources::{ContainerRuntime, HostCounters};
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Tick and heavy interval of the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Period of the light samplers (default: 5 seconds)
    pub tick: Duration,
    /// Period of the container stats fan-out (default: 30 seconds)
    pub heavy_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(5),
            heavy_interval: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    pub fn from_secs(tick: u64, heavy_interval: u64) -> Self {
        Self {
            tick: Duration::from_secs(tick),
            heavy_interval: Duration::from_secs(heavy_interval),
        }
    }

    /// Reject intervals for which heavy ticks would never line up
    pub fn validate(&self) -> Result<()> {
        let tick = self.tick.as_millis();
        let heavy = self.heavy_interval.as_millis();

        if tick == 0 {
            bail!("tick interval must be positive");
        }
        if heavy == 0 {
            bail!("heavy interval must be positive");
        }
        if heavy % tick != 0 {
            bail!(
                "heavy interval ({:?}) must be a multiple of the tick interval ({:?})",
                self.heavy_interval,
                self.tick
            );
        }
        Ok(())
    }
}

/// Decides which ticks are heavy.
///
/// The elapsed counter is advanced by one tick before each tick runs, so
/// with 5s ticks and a 30s heavy interval the 6th, 12th, ... ticks are heavy.
#[derive(Debug, Clone)]
pub struct TickPlan {
    tick: Duration,
    heavy_interval: Duration,
    elapsed: Duration,
}

impl TickPlan {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            tick: config.tick,
            heavy_interval: config.heavy_interval,
            elapsed: Duration::ZERO,
        }
    }

    /// Advance to the next tick, returning whether it is heavy
    pub fn advance(&mut self) -> bool {
        self.elapsed += self.tick;
        let heavy = self.heavy_interval.as_millis();
        heavy != 0 && self.elapsed.as_millis() % heavy == 0
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// What one tick did
#[derive(Debug, Clone, Default)]
pub struct TickSummary {
    /// Elapsed counter value for this tick
    pub elapsed: Duration,
    pub heavy: bool,
    pub observations: usize,
    pub failures: usize,
    /// Containers sampled by the fan-out, `None` when it did not run
    pub containers_collected: Option<usize>,
    pub duration: Duration,
}

/// Owns the counter windows and runs every sampler on schedule
pub struct Scheduler {
    config: SchedulerConfig,
    plan: TickPlan,
    host: Box<dyn HostCounters>,
    windows: CounterWindows,
    host_sampler: HostSampler,
    ranker: ProcessRanker,
    compose: Option<ComposeStatusTracker>,
    fanout: Option<FanoutCollector>,
    sink: Arc<dyn MetricsSink>,
    metrics: ExporterMetrics,
    health: HealthRegistry,
}

impl Scheduler {
    /// Run until a shutdown message arrives.
    ///
    /// Shutdown is only observed between ticks; a tick in progress,
    /// fan-out workers included, always completes.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            tick_secs = self.config.tick.as_secs(),
            heavy_interval_secs = self.config.heavy_interval.as_secs(),
            containers_enabled = self.fanout.is_some(),
            "Starting sampling scheduler"
        );

        let mut ticker = interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.run_tick().await;
                    debug!(
                        elapsed_secs = summary.elapsed.as_secs(),
                        heavy = summary.heavy,
                        observations = summary.observations,
                        failures = summary.failures,
                        containers = ?summary.containers_collected,
                        duration_ms = summary.duration.as_millis(),
                        "Tick complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down sampling scheduler");
                    break;
                }
            }
        }
    }

    /// Run every sampler due on the next tick
    pub async fn run_tick(&mut self) -> TickSummary {
        let heavy = self.plan.advance();
        let start = Instant::now();
        let mut summary = TickSummary {
            elapsed: self.plan.elapsed(),
            heavy,
            ..Default::default()
        };

        let outcome = self
            .host_sampler
            .collect(self.host.as_ref(), &mut self.windows, self.sink.as_ref())
            .await;
        self.record(components::HOST, &outcome, &mut summary).await;

        let outcome = self
            .ranker
            .collect(self.host.as_mut(), self.sink.as_ref())
            .await;
        self.record(components::PROCESSES, &outcome, &mut summary).await;

        if let Some(compose) = &self.compose {
            let outcome = compose.collect().await;
            self.record(components::COMPOSE, &outcome, &mut summary).await;
        }

        if heavy {
            if let Some(fanout) = &self.fanout {
                let started = Instant::now();
                let outcome = fanout.collect().await;
                self.metrics
                    .observe_fanout_duration(started.elapsed().as_secs_f64());

                match &outcome {
                    SampleOutcome::Collected(report) => {
                        self.metrics.set_runtime_up(true);
                        self.metrics.set_containers_collected(report.items);
                        summary.containers_collected = Some(report.items);
                    }
                    SampleOutcome::Skipped { .. } => self.metrics.set_runtime_up(false),
                    SampleOutcome::Failed(_) => {}
                }
                self.record(components::CONTAINERS, &outcome, &mut summary)
                    .await;
            }
        }

        summary.duration = start.elapsed();
        self.metrics.observe_tick(summary.duration.as_secs_f64());
        self.health.set_ready(true).await;

        summary
    }

    async fn record(&self, sampler: &str, outcome: &SampleOutcome, summary: &mut TickSummary) {
        summary.observations += outcome.observations();

        let failures = match outcome {
            SampleOutcome::Collected(report) => {
                for failure in &report.failures {
                    warn!(
                        sampler = sampler,
                        item = %failure.item,
                        error = %failure.error,
                        "Item collection failed, keeping previous values"
                    );
                }
                debug!(
                    sampler = sampler,
                    observations = report.observations,
                    items = report.items,
                    skipped = report.skipped,
                    "Sampler collected"
                );
                report.failures.len()
            }
            SampleOutcome::Skipped { reason } => {
                warn!(sampler = sampler, reason = %reason, "Sampler skipped");
                0
            }
            SampleOutcome::Failed(e) => {
                warn!(sampler = sampler, error = %e, "Sampler failed");
                1
            }
        };

        summary.failures += failures;
        self.metrics.inc_collection_errors(sampler, failures);
        self.health.record_outcome(sampler, outcome).await;
    }

    pub fn containers_enabled(&self) -> bool {
        self.fanout.is_some()
    }
}

/// Builder for the scheduler and its samplers
pub struct SchedulerBuilder {
    host: Option<Box<dyn HostCounters>>,
    sink: Option<Arc<dyn MetricsSink>>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    config: SchedulerConfig,
    project_filter: Option<String>,
    max_in_flight: usize,
    top_n: usize,
    metrics: Option<ExporterMetrics>,
    health: Option<HealthRegistry>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            host: None,
            sink: None,
            runtime: None,
            config: SchedulerConfig::default(),
            project_filter: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            top_n: DEFAULT_TOP_N,
            metrics: None,
            health: None,
        }
    }

    pub fn host(mut self, host: Box<dyn HostCounters>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Enable the container samplers. Without a runtime the scheduler runs host-only.
    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.config.tick = tick;
        self
    }

    pub fn heavy_interval(mut self, heavy_interval: Duration) -> Self {
        self.config.heavy_interval = heavy_interval;
        self
    }

    pub fn project_filter(mut self, project: Option<String>) -> Self {
        self.project_filter = project;
        self
    }

    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn metrics(mut self, metrics: ExporterMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<Scheduler> {
        self.config.validate()?;

        let host = self
            .host
            .ok_or_else(|| anyhow::anyhow!("Host counters are required"))?;
        let sink = self
            .sink
            .ok_or_else(|| anyhow::anyhow!("Metrics sink is required"))?;
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => ExporterMetrics::new()?,
        };

        let (compose, fanout) = match self.runtime {
            Some(runtime) => {
                let mut tracker = ComposeStatusTracker::new(runtime.clone(), sink.clone());
                if let Some(project) = self.project_filter {
                    tracker = tracker.with_project_filter(project);
                }
                let fanout = FanoutCollector::new(runtime, sink.clone(), host.logical_cpus())
                    .with_max_in_flight(self.max_in_flight);
                (Some(tracker), Some(fanout))
            }
            None => (None, None),
        };

        Ok(Scheduler {
            plan: TickPlan::new(&self.config),
            config: self.config,
            host,
            windows: CounterWindows::new(),
            host_sampler: HostSampler::new(),
            ranker: ProcessRanker::new(self.top_n),
            compose,
            fanout,
            sink,
            metrics,
            health: self.health.unwrap_or_default(),
        })
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
