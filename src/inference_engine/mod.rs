//! InferenceEngine - Boundary to the frame generator
//!
//! ## Responsibilities
//!
//! - `InferenceEngine` trait: what the relay needs from a generator
//! - `EngineHandle`: shared handle that releases the engine exactly once
//!
//! The engine is shared by every session and synchronizes itself. Calls are
//! non-blocking; `produce_completed` returns whatever is ready right now.

mod echo;

pub use echo::EchoEngine;

use crate::error::{Error, Result};
use crate::models::{Frame, InputMode, ParamSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Generator consumed by the relay
pub trait InferenceEngine: Send + Sync {
    /// Whether clients must follow `next_frame` with an image payload
    fn input_mode(&self) -> InputMode;

    /// Enqueue the latest parameters for `session_id`
    fn accept(&self, session_id: Uuid, params: ParamSet) -> Result<()>;

    /// Frames completed since the last poll, each tagged with its session
    ///
    /// Frames for one session must come back in the order their inputs
    /// were accepted.
    fn produce_completed(&self) -> Result<Vec<Frame>>;

    /// Release engine resources
    fn close(&self) -> Result<()>;
}

/// Cloneable engine handle
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<dyn InferenceEngine>,
    closed: Arc<AtomicBool>,
}

impl EngineHandle {
    pub fn new(engine: impl InferenceEngine + 'static) -> Self {
        Self::from_arc(Arc::new(engine))
    }

    pub fn from_arc(engine: Arc<dyn InferenceEngine>) -> Self {
        Self {
            engine,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn input_mode(&self) -> InputMode {
        self.engine.input_mode()
    }

    pub fn accept(&self, session_id: Uuid, params: ParamSet) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Engine("engine closed".to_string()));
        }
        self.engine.accept(session_id, params)
    }

    /// Empty once the engine is closed
    pub fn produce_completed(&self) -> Result<Vec<Frame>> {
        if self.is_closed() {
            return Ok(Vec::new());
        }
        self.engine.produce_completed()
    }

    /// Close the engine; later calls return `false` and do nothing
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.engine.close() {
            Ok(()) => tracing::info!("Inference engine closed"),
            Err(e) => tracing::warn!(error = %e, "Inference engine close failed"),
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("input_mode", &self.input_mode())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;

    #[test]
    fn test_close_runs_once() {
        let echo = Arc::new(EchoEngine::new(InputMode::Image));
        let handle = EngineHandle::from_arc(echo.clone());

        assert!(handle.close());
        assert!(!handle.clone().close());
        assert_eq!(echo.close_count(), 1);
    }

    #[test]
    fn test_closed_handle_rejects_and_yields_nothing() {
        let handle = EngineHandle::new(EchoEngine::new(InputMode::Image));
        let id = Uuid::new_v4();
        let mut params = ParamSet::default();
        params.image = Some(Bytes::from_static(b"x"));

        handle.accept(id, params.clone()).unwrap();
        handle.close();

        assert!(matches!(handle.accept(id, params), Err(Error::Engine(_))));
        assert!(handle.produce_completed().unwrap().is_empty());
    }
}
