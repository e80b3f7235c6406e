//! Latency history of a variant.

use std::time::Duration;

use sloserve_kernel::config::LatencyStatistic;

/// Append-only record of observed execution latencies plus a cached summary.
///
/// Before the first observation the summary is the seeded latency.
#[derive(Debug, Clone)]
pub struct LatencyHistory {
    samples: Vec<Duration>,
    summary: Duration,
    statistic: LatencyStatistic,
}

impl LatencyHistory {
    pub fn new(statistic: LatencyStatistic, seed: Duration) -> Self {
        Self {
            samples: Vec::new(),
            summary: seed,
            statistic,
        }
    }

    /// Append a sample and recompute the summary.
    pub fn record(&mut self, sample: Duration) {
        self.samples.push(sample);
        self.summary = summarize(&self.samples, self.statistic);
    }

    pub fn summary(&self) -> Duration {
        self.summary
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }
}

/// Mean, or `sorted[floor(p * n)]` for a percentile `p` in `(0, 1)`.
///
/// A percentile outside that range falls back to the mean.
fn summarize(samples: &[Duration], statistic: LatencyStatistic) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    match statistic {
        LatencyStatistic::Percentile(p) if p > 0.0 && p < 1.0 => {
            let mut sorted = samples.to_vec();
            sorted.sort_unstable();
            let idx = ((p * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
            sorted[idx]
        }
        _ => {
            let total: Duration = samples.iter().sum();
            total / samples.len() as u32
        }
    }
}
