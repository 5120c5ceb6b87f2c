//! Sampling engine for the host and container metrics exporter
//!
//! This crate provides:
//! - Counter delta windows for CPU usage
//! - Host, process, compose status and container stats samplers
//! - Procfs and Docker Engine API sources
//! - The tick scheduler, health checks and observability

pub mod delta;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod sampler;
pub mod scheduler;
pub mod sink;
pub mod sources;

pub use error::{CollectError, SampleOutcome, SampleReport};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use observability::{ExporterMetrics, StructuredLogger};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerConfig, TickSummary};
pub use sink::{MemorySink, Metric, MetricsSink, Observation, PrometheusSink};
