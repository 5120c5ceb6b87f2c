//! Per-container stats and the bounded fan-out over running containers

use crate::delta::container_cpu_percent;
use crate::error::{CollectError, ItemFailure, SampleOutcome, SampleReport};
use crate::models::{ContainerHandle, ContainerIdentity, ContainerSample};
use crate::sink::{MetricsSink, Metric, Observation};
use crate::sources::ContainerRuntime;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

/// Maximum number of stats requests in flight at once
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;

/// Observations written per successfully sampled container
const OBSERVATIONS_PER_CONTAINER: usize = 3;

/// Fetches one container's stats and writes its observations
#[derive(Clone)]
pub struct ContainerStatFetcher {
    runtime: Arc<dyn ContainerRuntime>,
    sink: Arc<dyn MetricsSink>,
    host_cpus: usize,
}

impl ContainerStatFetcher {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        sink: Arc<dyn MetricsSink>,
        host_cpus: usize,
    ) -> Self {
        Self {
            runtime,
            sink,
            host_cpus,
        }
    }

    /// Read stats and labels, compute CPU%, and emit the observation set.
    ///
    /// Nothing is written unless the whole set could be computed, so a
    /// failing container keeps its previous values.
    pub async fn fetch(&self, handle: &ContainerHandle) -> Result<ContainerSample, CollectError> {
        let labels = self.runtime.labels(handle).await?;
        let identity = ContainerIdentity::resolve(handle, &labels);
        let snapshot = self.runtime.stats(handle).await?;

        let sample = ContainerSample {
            cpu_percent: container_cpu_percent(
                snapshot.cpu_delta(),
                snapshot.system_delta(),
                snapshot.online_cpus(),
                self.host_cpus,
            ),
            memory_usage_bytes: snapshot.memory_usage(),
            memory_limit_bytes: snapshot.memory_limit(),
            identity,
        };

        self.emit(&sample);
        Ok(sample)
    }

    fn emit(&self, sample: &ContainerSample) {
        let name = sample.identity.name.as_str();
        let project = sample.identity.project_label();

        self.sink.set(Observation::with_labels(
            Metric::ContainerCpuUsagePercent,
            [name, project],
            sample.cpu_percent,
        ));
        self.sink.set(Observation::with_labels(
            Metric::ContainerMemoryUsageBytes,
            [name, project],
            sample.memory_usage_bytes as f64,
        ));
        self.sink.set(Observation::with_labels(
            Metric::ContainerMemoryLimitBytes,
            [name, project],
            sample.memory_limit_bytes as f64,
        ));
    }
}

/// Collects stats for every running container with bounded parallelism
pub struct FanoutCollector {
    runtime: Arc<dyn ContainerRuntime>,
    fetcher: ContainerStatFetcher,
    max_in_flight: usize,
}

impl FanoutCollector {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        sink: Arc<dyn MetricsSink>,
        host_cpus: usize,
    ) -> Self {
        Self {
            fetcher: ContainerStatFetcher::new(runtime.clone(), sink, host_cpus),
            runtime,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Override the concurrency cap (at least one)
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Run one fan-out cycle.
    ///
    /// Skips the whole cycle when the daemon does not answer the ping.
    /// Per-container failures are collected into the report and never
    /// affect sibling containers.
    pub async fn collect(&self) -> SampleOutcome {
        if let Err(e) = self.runtime.ping().await {
            return SampleOutcome::skipped(format!("container runtime unreachable: {e}"));
        }

        let handles = match self.runtime.list_containers(false).await {
            Ok(handles) => handles,
            Err(e) if e.is_unreachable() => {
                return SampleOutcome::skipped(format!("container runtime unreachable: {e}"))
            }
            Err(e) => return SampleOutcome::Failed(e),
        };

        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut workers = JoinSet::new();

        for handle in handles {
            // Waiting for a permit before spawning keeps at most
            // `max_in_flight` worker tasks alive
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let fetcher = self.fetcher.clone();

            workers.spawn(async move {
                let _permit = permit;
                let result = fetcher.fetch(&handle).await;
                (handle.name, result)
            });
        }

        let mut report = SampleReport::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(sample))) => {
                    debug!(
                        container = %sample.identity.name,
                        cpu_percent = sample.cpu_percent,
                        "Collected container stats"
                    );
                    report.observations += OBSERVATIONS_PER_CONTAINER;
                    report.items += 1;
                }
                Ok((name, Err(e))) => report.failures.push(ItemFailure::new(name, e)),
                Err(e) => report.fail(
                    "container worker",
                    CollectError::unavailable("stats worker", e),
                ),
            }
        }

        SampleOutcome::Collected(report)
    }
}
