//! Fixed-rate frame gate
//!
//! Shared by ingest (drop frames that arrive too fast) and by upload-mode
//! dispatch (wait until the next slot). Each decision is timed against the
//! previous accepted frame, not against a wall-clock grid.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FrameRateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl FrameRateLimiter {
    /// Limiter for `fps` frames per second
    ///
    /// `fps <= 0`, or a rate too small to express as an interval, disables
    /// limiting.
    pub fn from_fps(fps: f64) -> Self {
        let interval = if fps > 0.0 {
            Duration::try_from_secs_f64(1.0 / fps).unwrap_or_else(|e| {
                tracing::warn!(fps, error = %e, "Frame rate out of range, limiter disabled");
                Duration::ZERO
            })
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Accept a frame arriving at `now`, or reject it as too early
    pub fn admit(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last = Some(now);
        true
    }

    /// How long to wait at `now` before the next frame is due
    pub fn wait_time(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => self
                .interval
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// Record an emission at `now` without checking
    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}
