//! Samplers run by the scheduler
//!
//! Light samplers (host, processes, compose status) run every tick; the
//! container fan-out only runs on heavy ticks. Each sampler writes straight
//! into the sink and returns a [`SampleOutcome`](crate::error::SampleOutcome).

mod compose;
mod container;
mod host;
mod process;


pub use compose::ComposeStatusTracker;
pub use container::{ContainerStatFetcher, FanoutCollector, DEFAULT_MAX_IN_FLIGHT};
pub use host::{is_pseudo_mount, HostSampler, PSEUDO_FS_PREFIXES};
pub use process::{ProcessRanker, DEFAULT_TOP_N};
