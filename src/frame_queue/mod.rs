//! FrameQueue - Per-session queue disciplines
//!
//! ## Responsibilities
//!
//! - `LatestValueSlot`: newest client parameters only, older unread values are discarded
//! - `BoundedDropOldestQueue`: engine output buffer, full queue evicts its head
//! - `LoopingFrameQueue`: captured upload clip, replayed in order once exhausted
//!
//! All three are lock-protected so the DrainWorker thread can write into them
//! while async tasks read. Waiting readers are woken through `tokio::sync::Notify`
//! and see `None` once the owning session closes the queue.

mod drop_oldest;
mod latest_slot;
mod looping;

pub use drop_oldest::BoundedDropOldestQueue;
pub use latest_slot::LatestValueSlot;
pub use looping::{LoopStatus, LoopingFrameQueue};
