//! Running/stopped status of every container, grouped by compose project

use crate::error::{SampleOutcome, SampleReport};
use crate::models::ContainerIdentity;
use crate::sink::{MetricsSink, Metric, Observation};
use crate::sources::ContainerRuntime;
use std::collections::HashMap;
use std::sync::Arc;

/// Emits container status every tick, independent of the stats fan-out
pub struct ComposeStatusTracker {
    runtime: Arc<dyn ContainerRuntime>,
    sink: Arc<dyn MetricsSink>,
    project_filter: Option<String>,
}

impl ComposeStatusTracker {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            runtime,
            sink,
            project_filter: None,
        }
    }

    /// Only report containers of one compose project
    pub fn with_project_filter(mut self, project: impl Into<String>) -> Self {
        self.project_filter = Some(project.into());
        self
    }

    /// List all containers (stopped included) and emit their status.
    ///
    /// A container whose state cannot be refreshed is reported as stopped.
    /// An unreachable daemon skips the tick and leaves previous values.
    pub async fn collect(&self) -> SampleOutcome {
        let handles = match self.runtime.list_containers(true).await {
            Ok(handles) => handles,
            Err(e) if e.is_unreachable() => {
                return SampleOutcome::skipped(format!("container runtime unreachable: {e}"))
            }
            Err(e) => return SampleOutcome::Failed(e),
        };

        let mut report = SampleReport::default();

        for handle in handles {
            let labels = match self.runtime.labels(&handle).await {
                Ok(labels) => labels,
                Err(e) => {
                    report.fail(format!("{}:labels", handle.name), e);
                    HashMap::new()
                }
            };
            let identity = ContainerIdentity::resolve(&handle, &labels);
            let project = identity.project_label();

            if let Some(filter) = &self.project_filter {
                if project != filter.as_str() {
                    report.skipped += 1;
                    continue;
                }
            }

            let status = match self.runtime.running_state(&handle).await {
                Ok(true) => 1.0,
                Ok(false) => 0.0,
                Err(e) => {
                    report.fail(handle.name.clone(), e);
                    0.0
                }
            };

            self.sink.set(Observation::with_labels(
                Metric::ComposeContainerStatus,
                [identity.name.as_str(), project],
                status,
            ));
            self.sink.set(Observation::with_labels(
                Metric::ComposeContainerStatusFlat,
                [identity.name.as_str()],
                status,
            ));
            report.observations += 2;
            report.items += 1;
        }

        SampleOutcome::Collected(report)
    }
}
