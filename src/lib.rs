//! v2v-relay Library
//!
//! Session orchestration and live media delivery for a real-time
//! video-to-video generation service.
//!
//! ## Architecture (Components)
//!
//! 1. FrameQueue - latest-value slot, drop-oldest queue, looping clip queue
//! 2. SessionRegistry - admission and ownership of client sessions
//! 3. ControlPlaneLoop - per-connection control protocol
//! 4. DispatchLoop - per-session input feed into the engine
//! 5. DrainWorker - engine output fan-out (blocking thread)
//! 6. StreamPacer - adaptive output pacing
//! 7. SloMetricsCollector - latency SLO statistics and persistence
//! 8. LifecycleController - start and graceful shutdown
//! 9. WebAPI - WebSocket, multipart stream and admin endpoints
//!
//! The inference engine sits behind the `InferenceEngine` trait.

pub mod control_plane;
pub mod dispatch_loop;
pub mod drain_worker;
pub mod error;
pub mod frame_queue;
pub mod inference_engine;
pub mod lifecycle;
pub mod models;
pub mod rate_limit;
pub mod session_registry;
pub mod slo_metrics;
pub mod state;
pub mod stream_pacer;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
