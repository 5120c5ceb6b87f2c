//! Collection errors and sampler outcomes
//!
//! Samplers never abort a tick. Instead each one returns a [`SampleOutcome`]
//! describing what it managed to write, what it skipped, and which individual
//! items failed. The scheduler decides how to log and report each case.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Error raised while reading a single counter source or container
#[derive(Debug, Error)]
pub enum CollectError {
    /// The source could not be reached at all (daemon down, socket missing)
    #[error("{source_name} unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    /// Access to the source was refused by the operating system
    #[error("permission denied reading {path}")]
    PermissionDenied { path: String },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    /// The container runtime answered with a non-success status
    #[error("runtime request {path} returned HTTP {status}: {body}")]
    Runtime {
        path: String,
        status: u16,
        body: String,
    },

    #[error("request {path} timed out after {timeout:?}")]
    Timeout { path: String, timeout: Duration },
}

impl CollectError {
    pub fn unavailable(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Map an I/O error on `path`, keeping permission failures distinguishable
    pub fn from_io(path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::PermissionDenied {
            Self::PermissionDenied { path }
        } else {
            Self::Io { path, source }
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// The source did not answer at all, as opposed to answering badly
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// A single item (mount, container, category) that could not be sampled
#[derive(Debug)]
pub struct ItemFailure {
    pub item: String,
    pub error: CollectError,
}

impl ItemFailure {
    pub fn new(item: impl Into<String>, error: CollectError) -> Self {
        Self {
            item: item.into(),
            error,
        }
    }
}

/// What a sampler accomplished during one tick
#[derive(Debug, Default)]
pub struct SampleReport {
    /// Number of observations written to the sink
    pub observations: usize,
    /// Items sampled successfully (mounts, containers)
    pub items: usize,
    /// Items skipped on purpose (pseudo filesystems, permission-denied mounts)
    pub skipped: usize,
    /// Items whose previous observations were left stale
    pub failures: Vec<ItemFailure>,
}

impl SampleReport {
    pub fn fail(&mut self, item: impl Into<String>, error: CollectError) {
        self.failures.push(ItemFailure::new(item, error));
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of running one sampler for one tick
#[derive(Debug)]
pub enum SampleOutcome {
    /// The sampler ran; some items may still have failed
    Collected(SampleReport),
    /// The sampler deliberately did nothing this tick
    Skipped { reason: String },
    /// The sampler could not run at all
    Failed(CollectError),
}

impl SampleOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// Observations written, zero unless collected
    pub fn observations(&self) -> usize {
        match self {
            Self::Collected(report) => report.observations,
            _ => 0,
        }
    }

    pub fn report(&self) -> Option<&SampleReport> {
        match self {
            Self::Collected(report) => Some(report),
            _ => None,
        }
    }
}
