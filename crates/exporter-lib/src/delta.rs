//! CPU utilization from monotonically increasing counters
//!
//! Host CPU time is reported by the kernel as cumulative jiffies per bucket,
//! so a utilization percentage only exists between two snapshots of the same
//! stream. [`CounterWindows`] keeps the last snapshot per stream; the pure
//! helpers compute the rate.

use std::collections::HashMap;

/// Identity of an independent CPU counter stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamId {
    /// Aggregate `cpu` line of the host
    Host,
    /// A single logical core (`cpuN` line)
    Core(usize),
}

/// Last-seen counter pair for one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterWindow {
    pub previous_total: u64,
    pub previous_idle: u64,
}

/// Result of comparing a counter snapshot against its window
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CpuRate {
    /// First sample of the stream (or a counter reset); nothing to report yet
    Seeded,
    /// The total counter did not advance between samples
    InsufficientDelta,
    /// Utilization in percent, within `[0, 100]`
    Percent(f64),
}

impl CpuRate {
    pub fn percent(self) -> Option<f64> {
        match self {
            CpuRate::Percent(p) => Some(p),
            _ => None,
        }
    }
}

/// Compute `(1 - idle_delta / total_delta) * 100` between two snapshots.
///
/// Callers guarantee `cur_total >= prev_total`.
pub fn rate_percent(prev_total: u64, prev_idle: u64, cur_total: u64, cur_idle: u64) -> CpuRate {
    let total_delta = cur_total.saturating_sub(prev_total);
    if total_delta == 0 {
        return CpuRate::InsufficientDelta;
    }
    let idle_delta = cur_idle.saturating_sub(prev_idle);

    let busy = 1.0 - idle_delta as f64 / total_delta as f64;
    CpuRate::Percent((busy * 100.0).clamp(0.0, 100.0))
}

/// Container CPU usage from the runtime's paired stats samples.
///
/// `online_cpus == 0` falls back to `host_cpus`. A non-positive
/// `system_delta` means no measurable host activity and yields 0.
pub fn container_cpu_percent(
    cpu_delta: f64,
    system_delta: f64,
    online_cpus: u32,
    host_cpus: usize,
) -> f64 {
    if system_delta <= 0.0 || cpu_delta <= 0.0 {
        return 0.0;
    }

    let cpus = if online_cpus == 0 {
        host_cpus as f64
    } else {
        f64::from(online_cpus)
    };

    (cpu_delta / system_delta) * cpus * 100.0
}

/// Owned map of counter windows, one per stream
#[derive(Debug, Default)]
pub struct CounterWindows {
    windows: HashMap<StreamId, CounterWindow>,
}

impl CounterWindows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a new snapshot for `stream` and return the rate since the last one.
    ///
    /// The first snapshot only seeds the window. A counter that moved
    /// backwards re-seeds it as well.
    pub fn observe(&mut self, stream: StreamId, total: u64, idle: u64) -> CpuRate {
        let current = CounterWindow {
            previous_total: total,
            previous_idle: idle,
        };

        let Some(window) = self.windows.get_mut(&stream) else {
            self.windows.insert(stream, current);
            return CpuRate::Seeded;
        };

        if total < window.previous_total || idle < window.previous_idle {
            *window = current;
            return CpuRate::Seeded;
        }

        let rate = rate_percent(window.previous_total, window.previous_idle, total, idle);
        *window = current;
        rate
    }

    pub fn get(&self, stream: StreamId) -> Option<&CounterWindow> {
        self.windows.get(&stream)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
