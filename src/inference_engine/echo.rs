//! Loopback engine: every accepted image comes straight back as a frame

use super::InferenceEngine;
use crate::error::{Error, Result};
use crate::models::{Frame, InputMode, ParamSet};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use uuid::Uuid;

pub struct EchoEngine {
    input_mode: InputMode,
    completed: Mutex<VecDeque<Frame>>,
    seq: AtomicU64,
    closes: AtomicUsize,
}

impl EchoEngine {
    pub fn new(input_mode: InputMode) -> Self {
        Self {
            input_mode,
            completed: Mutex::new(VecDeque::new()),
            seq: AtomicU64::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Number of times `close` reached the engine
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }
}

impl InferenceEngine for EchoEngine {
    fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    fn accept(&self, session_id: Uuid, params: ParamSet) -> Result<()> {
        // Parameter-only updates (pause marker, text prompts) produce nothing
        let Some(image) = params.image else {
            return Ok(());
        };
        if image.is_empty() {
            return Err(Error::Engine("empty image payload".to_string()));
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.completed
            .lock()
            .push_back(Frame::new(session_id, image).with_seq(seq));
        Ok(())
    }

    fn produce_completed(&self) -> Result<Vec<Frame>> {
        Ok(self.completed.lock().drain(..).collect())
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::AcqRel);
        self.completed.lock().clear();
        Ok(())
    }
}
