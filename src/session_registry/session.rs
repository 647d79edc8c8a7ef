//! Session - one client's queues, flags and tasks

use super::client::ClientHandle;
use crate::frame_queue::{BoundedDropOldestQueue, LatestValueSlot, LoopingFrameQueue};
use crate::models::{Frame, ParamSet, ServerMessage};
use crate::slo_metrics::MetricsState;
use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Upload / loop status (`GET /api/upload/{id}`)
#[derive(Debug, Clone, Serialize)]
pub struct UploadStatus {
    pub upload_mode: bool,
    pub upload_completed: bool,
    pub total_frames: usize,
    pub current_index: usize,
    pub queue_size: usize,
}

/// Per-client state shared by the control plane, dispatch, drain and pacer
pub struct Session {
    id: Uuid,
    client: ClientHandle,
    params: LatestValueSlot<ParamSet>,
    output: BoundedDropOldestQueue<Frame>,
    upload: LoopingFrameQueue,
    upload_mode: AtomicBool,
    upload_completed: AtomicBool,
    streaming: AtomicBool,
    metrics: Mutex<MetricsState>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    connected_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: Uuid,
        client: ClientHandle,
        output_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            client,
            params: LatestValueSlot::new(),
            output: BoundedDropOldestQueue::new(output_capacity),
            upload: LoopingFrameQueue::new(),
            upload_mode: AtomicBool::new(false),
            upload_completed: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            metrics: Mutex::new(MetricsState::new()),
            cancel,
            tasks: Mutex::new(Vec::new()),
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    /// Shorthand for `client().send(..)`
    pub fn notify(&self, message: ServerMessage) -> Result<()> {
        self.client.send(message)
    }

    pub fn params(&self) -> &LatestValueSlot<ParamSet> {
        &self.params
    }

    pub fn output(&self) -> &BoundedDropOldestQueue<Frame> {
        &self.output
    }

    pub fn upload_queue(&self) -> &LoopingFrameQueue {
        &self.upload
    }

    pub fn metrics(&self) -> &Mutex<MetricsState> {
        &self.metrics
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    // ========================================
    // Upload mode
    // ========================================

    pub fn is_upload_mode(&self) -> bool {
        self.upload_mode.load(Ordering::Acquire)
    }

    /// Switch upload mode; returns true when upload mode was just entered
    ///
    /// Entering upload mode forgets any previously captured clip.
    pub fn set_upload_mode(&self, enabled: bool) -> bool {
        let was = self.upload_mode.swap(enabled, Ordering::AcqRel);
        let entered = enabled && !was;
        if entered {
            self.upload.reset();
            self.upload_completed.store(false, Ordering::Release);
            tracing::info!(session_id = %self.id, "Upload mode entered");
        }
        entered
    }

    pub fn is_upload_completed(&self) -> bool {
        self.upload_completed.load(Ordering::Acquire)
    }

    pub fn mark_upload_completed(&self) {
        self.upload_completed.store(true, Ordering::Release);
        tracing::info!(
            session_id = %self.id,
            total_frames = self.upload.total_frames(),
            "Upload completed"
        );
    }

    pub fn upload_status(&self) -> UploadStatus {
        let loop_status = self.upload.status();
        UploadStatus {
            upload_mode: self.is_upload_mode(),
            upload_completed: self.is_upload_completed(),
            total_frames: loop_status.total_frames,
            current_index: loop_status.current_index,
            queue_size: loop_status.queue_size,
        }
    }

    // ========================================
    // Media stream / tasks
    // ========================================

    /// Claim the session's single outbound media stream
    pub fn try_begin_stream(&self) -> bool {
        !self.streaming.swap(true, Ordering::AcqRel)
    }

    /// Release the media stream claim
    pub fn end_stream(&self) {
        self.streaming.store(false, Ordering::Release);
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Spawn a task that is joined (or aborted) when the session is torn down
    pub fn spawn_task<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Cancel tasks, release queue readers and discard all buffered data
    ///
    /// Tasks get `join_timeout` each to finish before they are aborted.
    pub async fn shutdown(&self, join_timeout: Duration) {
        self.cancel.cancel();
        self.params.close();
        let discarded = self.output.close();
        self.upload.reset();
        self.metrics.lock().clear();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for mut task in tasks {
            if tokio::time::timeout(join_timeout, &mut task).await.is_err() {
                tracing::warn!(session_id = %self.id, "Session task did not stop in time, aborting");
                task.abort();
            }
        }

        tracing::debug!(
            session_id = %self.id,
            discarded_frames = discarded,
            "Session queues drained"
        );
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("upload_mode", &self.is_upload_mode())
            .field("output_len", &self.output.len())
            .finish()
    }
}
