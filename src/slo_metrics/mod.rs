//! SloMetricsCollector - Per-session latency SLO tracking
//!
//! ## Responsibilities
//!
//! - Timestamp dispatched inputs (DispatchLoop side)
//! - Pair completions with inputs in FIFO order (DrainWorker side)
//! - Rolling statistics for the admin endpoint
//! - Periodic / on-demand flush of a full window to JSON files
//!
//! The collector holds no per-session data itself; each `Session` owns its
//! `MetricsState`, so removing a session drops its accounting with it.

pub mod stats;
mod store;
mod types;

pub use stats::{DeadlineStats, JitterStats, LatencyStats, RollingStats, TailLatency};
pub use store::MetricsStore;
pub use types::{FlushReport, MetricsState, RawBatch, MAX_PENDING_INPUTS};

use crate::error::{Error, Result};
use crate::session_registry::Session;
use std::path::PathBuf;
use std::time::Instant;

/// Default rolling window for `GET /api/metrics/{id}`
pub const DEFAULT_ROLLING_WINDOW: usize = 100;

/// Collector configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Deadline in seconds
    pub target_latency: f64,
    /// Completion batches per persisted window
    pub flush_batches: u64,
    pub output_dir: PathBuf,
    pub step: u32,
    pub gpu_ids: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_latency: 0.3,
            flush_batches: 1000,
            output_dir: PathBuf::from("./slo_metrics"),
            step: 1,
            gpu_ids: "0".to_string(),
        }
    }
}

pub struct SloMetricsCollector {
    enabled: bool,
    target_latency: f64,
    flush_batches: u64,
    store: MetricsStore,
}

impl SloMetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            enabled: config.enabled,
            target_latency: config.target_latency,
            flush_batches: config.flush_batches.max(1),
            store: MetricsStore::new(config.output_dir, config.step, config.gpu_ids),
        }
    }

    /// Collector that records nothing
    pub fn disabled() -> Self {
        Self::new(MetricsConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn target_latency(&self) -> f64 {
        self.target_latency
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    /// Timestamp an input handed to the engine
    pub fn record_dispatch(&self, session: &Session, at: Instant) {
        if self.enabled {
            session.metrics().lock().record_dispatch(at);
        }
    }

    /// Forget the newest timestamp after the engine refused the input
    pub fn discard_last_dispatch(&self, session: &Session) {
        if self.enabled {
            session.metrics().lock().discard_last_dispatch();
        }
    }

    /// Account for `count` frames completed at `at`
    ///
    /// Returns a report once the window reaches the flush threshold; the
    /// caller persists it off the hot path.
    pub fn record_completions(
        &self,
        session: &Session,
        count: usize,
        at: Instant,
    ) -> Option<FlushReport> {
        if !self.enabled || count == 0 {
            return None;
        }

        let mut state = session.metrics().lock();
        let batch = state.record_completions(count, at)?;

        tracing::trace!(
            session_id = %session.id(),
            batch_num = batch.batch_num,
            frames = batch.current_frames,
            avg_latency = batch.avg_latency,
            remaining = batch.remaining,
            "Completion batch"
        );

        if state.batch_count() < self.flush_batches {
            return None;
        }
        Some(self.report_from(session, &mut state))
    }

    /// Rolling statistics over the last `window` latencies
    pub fn rolling_stats(&self, session: &Session, window: usize) -> Result<RollingStats> {
        if !self.enabled {
            return Err(Error::MetricsDisabled);
        }

        let state = session.metrics().lock();
        let history = state.history();
        let start = history.len().saturating_sub(window.max(1));
        RollingStats::compute(&history[start..], state.pending_len(), state.batch_count())
            .ok_or(Error::NoMetrics(session.id()))
    }

    /// Close the current window now (on-demand flush)
    pub fn take_report(&self, session: &Session) -> Result<FlushReport> {
        if !self.enabled {
            return Err(Error::MetricsDisabled);
        }

        let mut state = session.metrics().lock();
        if state.history().is_empty() {
            return Err(Error::NoMetrics(session.id()));
        }
        Ok(self.report_from(session, &mut state))
    }

    fn report_from(&self, session: &Session, state: &mut MetricsState) -> FlushReport {
        let (latencies, batches, batch_count) = state.take_window();
        FlushReport {
            session_id: session.id(),
            target_latency: self.target_latency,
            batch_count,
            latencies,
            batches,
        }
    }

    /// Write a report to disk
    pub async fn persist(&self, report: &FlushReport) -> Result<PathBuf> {
        let run_dir = self.store.persist(report).await?;

        if let Some(stats) = LatencyStats::compute(&report.latencies) {
            let deadline = DeadlineStats::compute(&report.latencies, report.target_latency);
            tracing::info!(
                session_id = %report.session_id,
                batches = report.batch_count,
                frames = stats.sample_count,
                mean_latency = stats.mean_latency,
                p95_latency = stats.p95_latency,
                miss_rate = deadline.deadline_miss_rate,
                path = %run_dir.display(),
                "SLO window persisted"
            );
        }

        Ok(run_dir)
    }
}
