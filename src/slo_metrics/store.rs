//! JSON persistence for flushed SLO windows
//!
//! Layout: `<root>/<YYYYMMDD_HHMM>_step<step>_gpu<ids>/{raw_data,statistics}_<session>.json`

use super::stats::{DeadlineStats, JitterStats, LatencyStats, TailLatency};
use super::types::{FlushReport, RawBatch};
use crate::error::Result;
use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct RawDataDocument<'a> {
    user_id: Uuid,
    timestamp: &'a str,
    target_latency: f64,
    batches: &'a [RawBatch],
}

#[derive(Debug, Serialize)]
struct StatisticsDocument<'a> {
    user_id: Uuid,
    timestamp: &'a str,
    target_latency: f64,
    batch_count: u64,
    total_frames: usize,
    latency_stats: &'a LatencyStats,
    deadline_miss_rate: DeadlineStats,
    #[serde(serialize_with = "jitter_or_empty")]
    jitter_distribution: Option<JitterStats>,
    tail_latency: TailLatency,
}

/// Fewer than two samples have no jitter; written as `{}`
fn jitter_or_empty<S: Serializer>(
    jitter: &Option<JitterStats>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match jitter {
        Some(stats) => stats.serialize(serializer),
        None => serde_json::Map::new().serialize(serializer),
    }
}

/// Writes flush windows under a run directory tagged with step / GPU topology
#[derive(Debug, Clone)]
pub struct MetricsStore {
    root: PathBuf,
    step: u32,
    gpu_ids: String,
}

impl MetricsStore {
    pub fn new(root: impl Into<PathBuf>, step: u32, gpu_ids: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            step,
            gpu_ids: gpu_ids.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run directory name, e.g. `20260101_0930_step2_gpu0_1`
    pub fn run_dir_name(&self, at: &DateTime<Local>) -> String {
        format!(
            "{}_step{}_gpu{}",
            at.format("%Y%m%d_%H%M"),
            self.step,
            self.gpu_ids.replace(',', "_")
        )
    }

    /// Persist `report`, returning the run directory written to
    pub async fn persist(&self, report: &FlushReport) -> Result<PathBuf> {
        let now = Local::now();
        let timestamp = now.format("%Y%m%d_%H%M").to_string();
        let run_dir = self.root.join(self.run_dir_name(&now));
        fs::create_dir_all(&run_dir).await?;

        let raw = RawDataDocument {
            user_id: report.session_id,
            timestamp: &timestamp,
            target_latency: report.target_latency,
            batches: &report.batches,
        };
        let raw_path = run_dir.join(format!("raw_data_{}.json", report.session_id));
        fs::write(&raw_path, serde_json::to_string_pretty(&raw)?).await?;

        if let Some(latency_stats) = LatencyStats::compute(&report.latencies) {
            let statistics = StatisticsDocument {
                user_id: report.session_id,
                timestamp: &timestamp,
                target_latency: report.target_latency,
                batch_count: report.batch_count,
                total_frames: report.latencies.len(),
                latency_stats: &latency_stats,
                deadline_miss_rate: DeadlineStats::compute(
                    &report.latencies,
                    report.target_latency,
                ),
                jitter_distribution: JitterStats::compute(&report.latencies),
                tail_latency: TailLatency::from(&latency_stats),
            };
            let stats_path = run_dir.join(format!("statistics_{}.json", report.session_id));
            fs::write(&stats_path, serde_json::to_string_pretty(&statistics)?).await?;
        }

        Ok(run_dir)
    }
}
