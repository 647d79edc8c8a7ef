//! Latency / jitter statistics over a window of samples (seconds)

use serde::{Deserialize, Serialize};

/// Percentile with linear interpolation between closest ranks
///
/// `sorted` must be ascending; `pct` is in `0.0..=100.0`.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (sorted.len() - 1) as f64 * (pct.clamp(0.0, 100.0) / 100.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Full-window latency distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub mean_latency: f64,
    pub median_latency: f64,
    pub p50_latency: f64,
    pub p90_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub p99_9_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub std_latency: f64,
    pub sample_count: usize,
}

impl LatencyStats {
    pub fn compute(latencies: &[f64]) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }
        let sorted = sorted_copy(latencies);
        let median = percentile(&sorted, 50.0);

        Some(Self {
            mean_latency: mean(latencies),
            median_latency: median,
            p50_latency: median,
            p90_latency: percentile(&sorted, 90.0),
            p95_latency: percentile(&sorted, 95.0),
            p99_latency: percentile(&sorted, 99.0),
            p99_9_latency: percentile(&sorted, 99.9),
            min_latency: sorted[0],
            max_latency: sorted[sorted.len() - 1],
            std_latency: std_dev(latencies),
            sample_count: latencies.len(),
        })
    }
}

/// Deadline misses against the target latency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineStats {
    pub deadline_seconds: f64,
    pub deadline_miss_rate: f64,
    pub missed_frames: usize,
    pub total_frames: usize,
}

impl DeadlineStats {
    /// A sample misses when it is strictly above `deadline`
    pub fn compute(latencies: &[f64], deadline: f64) -> Self {
        let missed = latencies.iter().filter(|&&l| l > deadline).count();
        let rate = if latencies.is_empty() {
            0.0
        } else {
            missed as f64 / latencies.len() as f64
        };
        Self {
            deadline_seconds: deadline,
            deadline_miss_rate: rate,
            missed_frames: missed,
            total_frames: latencies.len(),
        }
    }
}

/// First-order jitter: |l[i+1] - l[i]| over consecutive samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JitterStats {
    pub mean_jitter: f64,
    pub std_jitter: f64,
    pub max_jitter: f64,
    pub min_jitter: f64,
    pub p50_jitter: f64,
    pub p90_jitter: f64,
    pub p95_jitter: f64,
    pub p99_jitter: f64,
    #[serde(rename = "p99.9_jitter")]
    pub p99_9_jitter: f64,
    pub jitter_variance: f64,
}

impl JitterStats {
    /// Needs at least two samples
    pub fn compute(latencies: &[f64]) -> Option<Self> {
        if latencies.len() < 2 {
            return None;
        }
        let jitter: Vec<f64> = latencies.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
        let sorted = sorted_copy(&jitter);

        Some(Self {
            mean_jitter: mean(&jitter),
            std_jitter: std_dev(&jitter),
            max_jitter: sorted[sorted.len() - 1],
            min_jitter: sorted[0],
            p50_jitter: percentile(&sorted, 50.0),
            p90_jitter: percentile(&sorted, 90.0),
            p95_jitter: percentile(&sorted, 95.0),
            p99_jitter: percentile(&sorted, 99.0),
            p99_9_jitter: percentile(&sorted, 99.9),
            jitter_variance: variance(&jitter),
        })
    }
}

/// Tail view repeated in the statistics document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailLatency {
    pub p90_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub p99_9_latency: f64,
    pub max_latency: f64,
    pub mean_latency: f64,
    pub median_latency: f64,
}

impl From<&LatencyStats> for TailLatency {
    fn from(stats: &LatencyStats) -> Self {
        Self {
            p90_latency: stats.p90_latency,
            p95_latency: stats.p95_latency,
            p99_latency: stats.p99_latency,
            p99_9_latency: stats.p99_9_latency,
            max_latency: stats.max_latency,
            mean_latency: stats.mean_latency,
            median_latency: stats.median_latency,
        }
    }
}

/// On-demand rolling view served by `GET /api/metrics/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingStats {
    pub mean_latency: f64,
    pub median_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub std_latency: f64,
    pub sample_count: usize,
    /// Dispatched inputs still waiting for a completed frame
    pub remaining_frames: usize,
    pub batch_count: u64,
}

impl RollingStats {
    pub fn compute(window: &[f64], remaining_frames: usize, batch_count: u64) -> Option<Self> {
        let stats = LatencyStats::compute(window)?;
        Some(Self {
            mean_latency: stats.mean_latency,
            median_latency: stats.median_latency,
            p95_latency: stats.p95_latency,
            p99_latency: stats.p99_latency,
            min_latency: stats.min_latency,
            max_latency: stats.max_latency,
            std_latency: stats.std_latency,
            sample_count: stats.sample_count,
            remaining_frames,
            batch_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_deadline_miss_rate() {
        let stats = DeadlineStats::compute(&[0.1, 0.2, 0.35, 0.5], 0.3);
        assert_eq!(stats.missed_frames, 2);
        assert_eq!(stats.total_frames, 4);
        assert!(approx(stats.deadline_miss_rate, 0.5));
    }

    #[test]
    fn test_deadline_on_boundary_is_not_a_miss() {
        let stats = DeadlineStats::compute(&[0.3, 0.3], 0.3);
        assert_eq!(stats.missed_frames, 0);
        assert!(approx(DeadlineStats::compute(&[], 0.3).deadline_miss_rate, 0.0));
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert!(approx(percentile(&sorted, 50.0), 2.5));
        assert!(approx(percentile(&sorted, 0.0), 1.0));
        assert!(approx(percentile(&sorted, 100.0), 4.0));
        assert!(approx(percentile(&sorted, 90.0), 3.7));
    }

    #[test]
    fn test_latency_stats() {
        let stats = LatencyStats::compute(&[0.4, 0.1, 0.3, 0.2]).unwrap();
        assert!(approx(stats.mean_latency, 0.25));
        assert!(approx(stats.median_latency, 0.25));
        assert!(approx(stats.min_latency, 0.1));
        assert!(approx(stats.max_latency, 0.4));
        assert!(approx(stats.std_latency, 0.0125f64.sqrt()));
        assert_eq!(stats.sample_count, 4);
        assert!(LatencyStats::compute(&[]).is_none());
    }

    #[test]
    fn test_jitter_uses_consecutive_differences() {
        let stats = JitterStats::compute(&[0.1, 0.3, 0.2, 0.2]).unwrap();
        // |0.2|, |0.1|, |0.0|
        assert!(approx(stats.max_jitter, 0.2));
        assert!(approx(stats.min_jitter, 0.0));
        assert!(approx(stats.mean_jitter, 0.1));
        assert!(JitterStats::compute(&[0.1]).is_none());
    }

    #[test]
    fn test_jitter_serializes_dotted_percentile_key() {
        let stats = JitterStats::compute(&[0.1, 0.2]).unwrap();
        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("p99.9_jitter").is_some());
    }
}
