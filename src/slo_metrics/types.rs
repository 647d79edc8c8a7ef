//! Per-session SLO accounting state

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use uuid::Uuid;

/// Pending input timestamps kept per session before the oldest are shed
pub const MAX_PENDING_INPUTS: usize = 4096;

/// Summary of one completion batch (one drain cycle's frames for a session)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBatch {
    pub batch_num: u64,
    pub current_frames: usize,
    pub avg_latency: f64,
    pub remaining: usize,
    pub data_count: usize,
}

/// Latency window handed to persistence
#[derive(Debug, Clone)]
pub struct FlushReport {
    pub session_id: Uuid,
    pub target_latency: f64,
    pub batch_count: u64,
    pub latencies: Vec<f64>,
    pub batches: Vec<RawBatch>,
}

/// FIFO latency bookkeeping for one session
///
/// Input timestamps are pushed in dispatch order and popped one per
/// completed frame, so the i-th completion pairs with the i-th dispatch.
#[derive(Debug, Default)]
pub struct MetricsState {
    pending: VecDeque<Instant>,
    history: Vec<f64>,
    batch_count: u64,
    raw_batches: Vec<RawBatch>,
}

impl MetricsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatch(&mut self, at: Instant) {
        if self.pending.len() >= MAX_PENDING_INPUTS {
            self.pending.pop_front();
        }
        self.pending.push_back(at);
    }

    /// Undo the newest dispatch (the engine refused it)
    pub fn discard_last_dispatch(&mut self) {
        self.pending.pop_back();
    }

    /// Pair `count` completions at `at` with the oldest pending inputs
    ///
    /// Returns the batch summary, or `None` if no pending input matched.
    pub fn record_completions(&mut self, count: usize, at: Instant) -> Option<RawBatch> {
        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(input) = self.pending.pop_front() else {
                break;
            };
            let latency = at.saturating_duration_since(input).as_secs_f64();
            batch.push(latency);
            self.history.push(latency);
        }

        if batch.is_empty() {
            return None;
        }

        self.batch_count += 1;
        let raw = RawBatch {
            batch_num: self.batch_count,
            current_frames: batch.len(),
            avg_latency: batch.iter().sum::<f64>() / batch.len() as f64,
            remaining: self.pending.len(),
            data_count: self.history.len(),
        };
        self.raw_batches.push(raw.clone());
        Some(raw)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn batch_count(&self) -> u64 {
        self.batch_count
    }

    /// Take the current window and start a new one
    ///
    /// Pending inputs stay: their frames are still in flight.
    pub fn take_window(&mut self) -> (Vec<f64>, Vec<RawBatch>, u64) {
        let batch_count = std::mem::take(&mut self.batch_count);
        (
            std::mem::take(&mut self.history),
            std::mem::take(&mut self.raw_batches),
            batch_count,
        )
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
