//! StreamPacer - Adaptive output frame pacing
//!
//! ## Responsibilities
//!
//! - Estimate the engine's production interval from output queue growth
//! - Smooth it (EMA) and clamp it to the configured frame-rate band
//! - Drive the outbound frame stream of one session
//!
//! The engine produces in bursts; emitting at the smoothed production
//! interval keeps playback even instead of flushing each burst at once.

use crate::models::Frame;
use crate::session_registry::Session;
use futures::Stream;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Weight of the previous estimate in the EMA
pub const SMOOTHING: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct PacerConfig {
    pub min_fps: f64,
    pub max_fps: f64,
    /// Delay used before the first burst is observed
    pub initial_interval: Duration,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            min_fps: 5.0,
            max_fps: 30.0,
            initial_interval: Duration::from_secs_f64(1.0 / 20.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamPacer {
    min_interval: f64,
    max_interval: f64,
    /// Smoothed production interval, seconds
    estimate: f64,
    delay: Duration,
    last_burst: Instant,
    last_queue_size: usize,
}

impl StreamPacer {
    pub fn new(config: &PacerConfig, now: Instant) -> Self {
        let min_interval = 1.0 / config.max_fps.max(f64::EPSILON);
        let max_interval = 1.0 / config.min_fps.max(f64::EPSILON);
        Self {
            min_interval,
            max_interval: max_interval.max(min_interval),
            estimate: config.initial_interval.as_secs_f64(),
            delay: config.initial_interval,
            last_burst: now,
            last_queue_size: 0,
        }
    }

    /// Feed the current output queue length; returns the delay to use
    ///
    /// Only growth counts as a burst: the time since the previous burst is
    /// spread over the frames now queued.
    pub fn observe(&mut self, queue_size: usize, now: Instant) -> Duration {
        if queue_size > self.last_queue_size {
            let elapsed = now.saturating_duration_since(self.last_burst).as_secs_f64();
            if elapsed > 0.0 {
                let raw = elapsed / queue_size as f64;
                self.estimate = SMOOTHING * self.estimate + (1.0 - SMOOTHING) * raw;
                self.delay = self.clamp(self.estimate);
            }
            self.last_burst = now;
        }
        self.last_queue_size = queue_size;
        self.delay
    }

    /// Clamp an interval (seconds) to `[1/max_fps, 1/min_fps]`
    pub fn clamp(&self, interval: f64) -> Duration {
        Duration::from_secs_f64(interval.clamp(self.min_interval, self.max_interval))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn estimate(&self) -> f64 {
        self.estimate
    }
}

/// Paced stream of a session's output frames
///
/// Each step waits out the previous delay, samples the queue, then pops.
/// Ends when the output queue is closed or the session is cancelled.
pub fn paced_frames(
    session: Arc<Session>,
    pacer: StreamPacer,
) -> impl Stream<Item = Frame> + Send + 'static {
    futures::stream::unfold(
        (session, pacer, None::<Duration>),
        |(session, mut pacer, pending)| async move {
            let cancel = session.cancel_token().clone();
            if let Some(delay) = pending {
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let delay = pacer.observe(session.output().len(), Instant::now());
            let popped = tokio::select! {
                _ = cancel.cancelled() => None,
                frame = session.output().pop() => frame,
            };
            let frame = popped?;

            Some((frame, (session, pacer, Some(delay))))
        },
    )
}
