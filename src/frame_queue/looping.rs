//! Upload clip queue with infinite in-order replay

use axum::body::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Default)]
struct LoopState {
    /// Frames waiting to be dispatched
    pending: VecDeque<Bytes>,
    /// Every frame captured during ingest, in arrival order
    captured: Vec<Bytes>,
    /// Frames handed out since the last refill
    cursor: usize,
    /// Completed refills
    loops: u64,
}

/// Snapshot of the replay position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopStatus {
    pub total_frames: usize,
    pub current_index: usize,
    pub queue_size: usize,
    pub loops: u64,
}

/// FIFO seeded by ingest that refills itself from the captured clip
pub struct LoopingFrameQueue {
    state: Mutex<LoopState>,
}

impl LoopingFrameQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoopState::default()),
        }
    }

    /// Capture an ingested frame (queued for dispatch and retained for replay)
    pub fn append(&self, frame: Bytes) {
        let mut state = self.state.lock();
        state.captured.push(frame.clone());
        state.pending.push_back(frame);
    }

    /// Next frame to dispatch
    ///
    /// An exhausted queue is refilled with the whole captured clip in its
    /// original order. `None` only if nothing was ever captured.
    pub fn next(&self) -> Option<Bytes> {
        let mut state = self.state.lock();
        if state.pending.is_empty() && !state.captured.is_empty() {
            let clip = state.captured.clone();
            state.pending.extend(clip);
            state.cursor = 0;
            state.loops += 1;
            tracing::trace!(total_frames = state.captured.len(), "Refilled upload loop");
        }

        let frame = state.pending.pop_front()?;
        state.cursor += 1;
        Some(frame)
    }

    /// Forget the captured clip and replay position
    pub fn reset(&self) {
        *self.state.lock() = LoopState::default();
    }

    pub fn total_frames(&self) -> usize {
        self.state.lock().captured.len()
    }

    pub fn status(&self) -> LoopStatus {
        let state = self.state.lock();
        LoopStatus {
            total_frames: state.captured.len(),
            current_index: state.cursor,
            queue_size: state.pending.len(),
            loops: state.loops,
        }
    }
}

impl Default for LoopingFrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: &'static str) -> Bytes {
        Bytes::from_static(tag.as_bytes())
    }

    #[test]
    fn test_replays_clip_in_original_order() {
        let queue = LoopingFrameQueue::new();
        for tag in ["f0", "f1", "f2"] {
            queue.append(frame(tag));
        }

        let played: Vec<_> = (0..6).map(|_| queue.next().unwrap()).collect();
        let expected: Vec<_> = ["f0", "f1", "f2", "f0", "f1", "f2"]
            .into_iter()
            .map(frame)
            .collect();
        assert_eq!(played, expected);
        assert_eq!(queue.status().loops, 1);
    }

    #[test]
    fn test_empty_clip_yields_nothing() {
        let queue = LoopingFrameQueue::new();
        assert!(queue.next().is_none());
        assert_eq!(queue.status().total_frames, 0);
    }

    #[test]
    fn test_status_tracks_cursor_and_reset_clears() {
        let queue = LoopingFrameQueue::new();
        queue.append(frame("a"));
        queue.append(frame("b"));
        queue.next();

        let status = queue.status();
        assert_eq!(status.total_frames, 2);
        assert_eq!(status.current_index, 1);
        assert_eq!(status.queue_size, 1);

        queue.reset();
        assert!(queue.next().is_none());
    }
}
