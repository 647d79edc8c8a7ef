//! LifecycleController - Service start / graceful shutdown
//!
//! ## Responsibilities
//!
//! - Start the shared DrainWorker
//! - Shutdown: cancel everything, join the worker with a deadline,
//!   disconnect every session, release the engine once

use crate::drain_worker::DrainWorker;
use crate::error::{Error, Result};
use crate::inference_engine::EngineHandle;
use crate::session_registry::SessionRegistry;
use crate::slo_metrics::SloMetricsCollector;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// DrainWorker sleep after an empty poll
    pub poll_interval: Duration,
    /// Deadline for joining the DrainWorker
    pub join_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(8),
            join_timeout: Duration::from_secs(5),
        }
    }
}

pub struct LifecycleController {
    registry: Arc<SessionRegistry>,
    engine: EngineHandle,
    metrics: Arc<SloMetricsCollector>,
    config: LifecycleConfig,
    /// Root token; session tokens descend from it
    cancel: CancellationToken,
    drain: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl LifecycleController {
    pub fn new(
        registry: Arc<SessionRegistry>,
        engine: EngineHandle,
        metrics: Arc<SloMetricsCollector>,
        config: LifecycleConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            engine,
            metrics,
            config,
            cancel,
            drain: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Start the DrainWorker; a second call is a no-op
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| Error::Internal(e.to_string()))?;

        let mut drain = self.drain.lock();
        if drain.is_some() {
            return Ok(());
        }
        if self.is_stopped() {
            return Err(Error::Internal("service already shut down".to_string()));
        }

        let worker = DrainWorker::new(
            self.engine.clone(),
            self.registry.clone(),
            self.metrics.clone(),
            self.config.poll_interval,
            runtime,
        );
        *drain = Some(worker.spawn(self.cancel.child_token()));
        Ok(())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop the service; later calls return immediately
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(
            active_sessions = self.registry.count(),
            "Shutting down relay"
        );

        self.cancel.cancel();

        let drain = self.drain.lock().take();
        if let Some(handle) = drain {
            match tokio::time::timeout(self.config.join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Drain worker panicked"),
                Err(_) => tracing::warn!(
                    timeout_ms = self.config.join_timeout.as_millis() as u64,
                    "Drain worker did not stop in time"
                ),
            }
        }

        self.registry.disconnect_all(&self.engine).await;
        tracing::info!("Relay shutdown complete");
    }
}
