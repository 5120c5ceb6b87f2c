//! Top-N process ranking by CPU and resident memory

use crate::error::{SampleOutcome, SampleReport};
use crate::models::ProcessSample;
use crate::sink::{MetricsSink, Metric, Observation};
use crate::sources::HostCounters;

/// Number of processes reported per ranking
pub const DEFAULT_TOP_N: usize = 5;

/// Ranks processes once per tick
#[derive(Debug, Clone)]
pub struct ProcessRanker {
    top_n: usize,
}

impl Default for ProcessRanker {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_N)
    }
}

impl ProcessRanker {
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }

    /// Top processes by CPU, descending. Ties keep enumeration order.
    pub fn top_by_cpu<'a>(&self, samples: &'a [ProcessSample]) -> Vec<&'a ProcessSample> {
        let mut ranked: Vec<&ProcessSample> = samples.iter().collect();
        ranked.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
        ranked.truncate(self.top_n);
        ranked
    }

    /// Top processes by resident memory, descending. Ties keep enumeration order.
    pub fn top_by_memory<'a>(&self, samples: &'a [ProcessSample]) -> Vec<&'a ProcessSample> {
        let mut ranked: Vec<&ProcessSample> = samples.iter().collect();
        ranked.sort_by(|a, b| b.resident_bytes.cmp(&a.resident_bytes));
        ranked.truncate(self.top_n);
        ranked
    }

    /// Snapshot the process table and emit both rankings.
    ///
    /// Label sets of processes that drop out of the ranking are left as-is.
    pub async fn collect(
        &self,
        host: &mut dyn HostCounters,
        sink: &dyn MetricsSink,
    ) -> SampleOutcome {
        let samples = match host.list_processes().await {
            Ok(samples) => samples,
            Err(e) => return SampleOutcome::Failed(e),
        };

        let mut report = SampleReport::default();

        for process in self.top_by_cpu(&samples) {
            sink.set(Observation::with_labels(
                Metric::TopProcessCpuUsagePercent,
                [process.pid.to_string(), process.name.clone()],
                f64::from(process.cpu_percent),
            ));
            report.observations += 1;
        }

        for process in self.top_by_memory(&samples) {
            sink.set(Observation::with_labels(
                Metric::TopProcessMemoryUsageBytes,
                [process.pid.to_string(), process.name.clone()],
                process.resident_bytes as f64,
            ));
            report.observations += 1;
        }

        SampleOutcome::Collected(report)
    }
}
