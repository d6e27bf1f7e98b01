//! Latency sample aggregation and benchmark statistics.
//!
//! [`MetricsAggregator`] is a single-owner sample sink: the run loop records
//! [`LatencySample`] values into it and derives a [`BenchmarkResult`] once at
//! the end. Percentiles use sorted-array indexing (`floor((n-1) * p/100)`),
//! and the consistency score is derived from the coefficient of variation of
//! the trimmed sample set.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fault::FaultStats;

/// How a single operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The call returned a result.
    Success,
    /// The call failed organically.
    Failure,
    /// The call failed due to an injected fault.
    Injected,
}

/// One measured operation.
#[derive(Debug, Clone)]
pub struct LatencySample {
    /// Tool name the operation invoked.
    pub operation: String,
    /// Wall-clock duration of the call.
    pub duration: Duration,
    /// How the call ended.
    pub outcome: Outcome,
}

impl LatencySample {
    /// Creates a success sample.
    pub fn success(operation: impl Into<String>, duration: Duration) -> Self {
        Self {
            operation: operation.into(),
            duration,
            outcome: Outcome::Success,
        }
    }

    /// Creates an organic-failure sample.
    pub fn failure(operation: impl Into<String>, duration: Duration) -> Self {
        Self {
            operation: operation.into(),
            duration,
            outcome: Outcome::Failure,
        }
    }

    /// Creates an injected-failure sample.
    pub fn injected(operation: impl Into<String>, duration: Duration) -> Self {
        Self {
            operation: operation.into(),
            duration,
            outcome: Outcome::Injected,
        }
    }
}

/// Latency distribution statistics in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Smallest observed latency.
    pub min_ms: u64,
    /// Largest observed latency.
    pub max_ms: u64,
    /// Arithmetic mean.
    pub mean_ms: f64,
    /// 50th percentile.
    pub p50_ms: u64,
    /// 95th percentile.
    pub p95_ms: u64,
    /// 99th percentile (maximum when 100 or fewer samples exist).
    pub p99_ms: u64,
    /// Sample standard deviation.
    pub stdev_ms: f64,
    /// 0-100 uniformity score from the trimmed coefficient of variation.
    pub consistency: f64,
}

/// Per-operation breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStats {
    /// Operations recorded for this tool.
    pub count: u64,
    /// Successful operations.
    pub successes: u64,
    /// Mean latency in milliseconds.
    pub mean_ms: f64,
    /// Smallest latency in milliseconds.
    pub min_ms: u64,
    /// Largest latency in milliseconds.
    pub max_ms: u64,
}

/// Aggregated view over one benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Workload name.
    pub workload: String,
    /// Execution pattern name.
    pub pattern: String,
    /// When the measured phase started.
    pub started_at: DateTime<Utc>,
    /// Measured-phase duration in seconds.
    pub duration_secs: f64,
    /// Successful operations.
    pub operations_completed: u64,
    /// Organic failures.
    pub failures: u64,
    /// Injected failures.
    pub injected_failures: u64,
    /// Successful operations per second of measured time.
    pub throughput: f64,
    /// Failed operations (organic + injected) over all operations.
    pub error_rate: f64,
    /// Latency distribution over all samples.
    pub latency: LatencyStats,
    /// Per-operation breakdown, keyed by tool name.
    pub per_operation: BTreeMap<String, OperationStats>,
    /// Fired-fault counters from the run's fault scope.
    pub faults: FaultStats,
}

/// Single-owner sink for a run's latency samples.
///
/// Samples are appended during the run and consumed by [`Self::finish`],
/// which derives the [`BenchmarkResult`] and discards the raw samples.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    samples: Vec<LatencySample>,
}

impl MetricsAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one sample.
    pub fn record(&mut self, sample: LatencySample) {
        self.samples.push(sample);
    }

    /// Number of samples recorded so far.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if no samples have been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Derives the aggregated result and consumes the raw samples.
    pub fn finish(
        self,
        workload: impl Into<String>,
        pattern: impl Into<String>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        faults: FaultStats,
    ) -> BenchmarkResult {
        let mut successes = 0u64;
        let mut failures = 0u64;
        let mut injected = 0u64;
        for sample in &self.samples {
            match sample.outcome {
                Outcome::Success => successes += 1,
                Outcome::Failure => failures += 1,
                Outcome::Injected => injected += 1,
            }
        }

        let total = successes + failures + injected;
        let error_rate = if total == 0 {
            0.0
        } else {
            (failures + injected) as f64 / total as f64
        };
        let elapsed_secs = elapsed.as_secs_f64();
        let throughput = if elapsed_secs > 0.0 {
            successes as f64 / elapsed_secs
        } else {
            0.0
        };

        let mut latencies: Vec<u64> = self
            .samples
            .iter()
            .map(|s| s.duration.as_millis() as u64)
            .collect();
        latencies.sort_unstable();
        let latency = latency_stats(&latencies);

        let mut per_operation: BTreeMap<String, OperationStats> = BTreeMap::new();
        for sample in &self.samples {
            let ms = sample.duration.as_millis() as u64;
            let entry = per_operation
                .entry(sample.operation.clone())
                .or_insert(OperationStats {
                    count: 0,
                    successes: 0,
                    mean_ms: 0.0,
                    min_ms: u64::MAX,
                    max_ms: 0,
                });
            // mean_ms accumulates the sum until the final division below.
            entry.count += 1;
            if sample.outcome == Outcome::Success {
                entry.successes += 1;
            }
            entry.mean_ms += ms as f64;
            entry.min_ms = entry.min_ms.min(ms);
            entry.max_ms = entry.max_ms.max(ms);
        }
        for stats in per_operation.values_mut() {
            if stats.count > 0 {
                stats.mean_ms /= stats.count as f64;
            }
        }

        BenchmarkResult {
            workload: workload.into(),
            pattern: pattern.into(),
            started_at,
            duration_secs: elapsed_secs,
            operations_completed: successes,
            failures,
            injected_failures: injected,
            throughput,
            error_rate,
            latency,
            per_operation,
            faults,
        }
    }
}

/// Computes the distribution statistics over an ascending latency vector.
fn latency_stats(sorted: &[u64]) -> LatencyStats {
    if sorted.is_empty() {
        return LatencyStats::default();
    }
    let n = sorted.len();
    let mean = sorted.iter().sum::<u64>() as f64 / n as f64;
    let stdev = sample_stdev(sorted, mean);

    LatencyStats {
        min_ms: sorted[0],
        max_ms: sorted[n - 1],
        mean_ms: mean,
        p50_ms: percentile(sorted, 50.0),
        p95_ms: percentile(sorted, 95.0),
        p99_ms: if n <= 100 {
            sorted[n - 1]
        } else {
            percentile(sorted, 99.0)
        },
        stdev_ms: stdev,
        consistency: consistency_score(sorted),
    }
}

/// Sorted-array percentile: the value at index `floor((n-1) * p/100)`.
pub(crate) fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() - 1) as f64 * p / 100.0).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Uniformity score over the trimmed sample set.
///
/// Trims `max(1, n/10)` samples from each end when enough remain, computes
/// the coefficient of variation over the rest, and maps it to 0-100 (higher
/// is more uniform). Fewer than two usable samples score 100.
pub(crate) fn consistency_score(sorted: &[u64]) -> f64 {
    let n = sorted.len();
    let trim = std::cmp::max(1, n / 10);
    let trimmed: &[u64] = if n > 2 * trim {
        &sorted[trim..n - trim]
    } else {
        sorted
    };
    if trimmed.len() < 2 {
        return 100.0;
    }
    let mean = trimmed.iter().sum::<u64>() as f64 / trimmed.len() as f64;
    if mean <= 0.0 {
        return 100.0;
    }
    let cv = sample_stdev(trimmed, mean) / mean * 100.0;
    (100.0 - cv.min(100.0)).max(0.0)
}

fn sample_stdev(values: &[u64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}
