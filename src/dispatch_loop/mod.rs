//! DispatchLoop - Feeds one session's input to the inference engine
//!
//! ## Responsibilities
//!
//! - Camera mode: forward each new parameter value from the slot
//! - Upload mode: replay the captured clip at the ingest rate, carrying the
//!   latest generation controls forward onto every frame
//! - Skip values equal to the last one dispatched
//! - Timestamp each dispatch for SLO accounting

use crate::error::Result;
use crate::inference_engine::EngineHandle;
use crate::models::{ParamSet, ServerMessage};
use crate::rate_limit::FrameRateLimiter;
use crate::session_registry::Session;
use crate::slo_metrics::SloMetricsCollector;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upload replay rate
    pub ingest_fps: f64,
    /// Wait when the upload clip has no frames yet
    pub empty_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            ingest_fps: 16.0,
            empty_backoff: Duration::from_millis(50),
        }
    }
}

pub struct DispatchLoop {
    session: Arc<Session>,
    engine: EngineHandle,
    metrics: Arc<SloMetricsCollector>,
    config: DispatchConfig,
    limiter: FrameRateLimiter,
    /// Last value the engine accepted
    last: Option<ParamSet>,
    /// Latest client parameters, source of carried-forward fields
    known: ParamSet,
    /// A pause arrived in upload mode; tag the next replayed frame
    restart_pending: bool,
    cancel: CancellationToken,
}

impl DispatchLoop {
    pub fn new(
        session: Arc<Session>,
        engine: EngineHandle,
        metrics: Arc<SloMetricsCollector>,
        config: DispatchConfig,
    ) -> Self {
        let limiter = FrameRateLimiter::from_fps(config.ingest_fps);
        let cancel = session.cancel_token().clone();
        Self {
            session,
            engine,
            metrics,
            config,
            limiter,
            last: None,
            known: ParamSet::default(),
            restart_pending: false,
            cancel,
        }
    }

    /// Stop on `cancel` instead of the session token
    ///
    /// Use a child of the session token so teardown still stops the loop.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(mut self) {
        let id = self.session.id();
        let cancel = self.cancel.clone();
        tracing::debug!(session_id = %id, "Dispatch loop started");

        loop {
            let step = async {
                if self.session.is_upload_mode() {
                    self.upload_step().await
                } else {
                    self.camera_step().await
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = step => outcome,
            };

            match outcome {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Dispatch loop lost client");
                    self.session.client().close();
                    break;
                }
            }
        }

        tracing::debug!(session_id = %id, "Dispatch loop stopped");
    }

    /// Returns `Ok(false)` once the parameter slot is closed
    async fn camera_step(&mut self) -> Result<bool> {
        let Some(params) = self.session.params().get().await else {
            return Ok(false);
        };

        // Switched to upload mode while waiting: keep the controls only
        if self.session.is_upload_mode() {
            self.remember(params);
            self.session.notify(ServerMessage::SendFrame)?;
            return Ok(true);
        }

        if !params.fields.is_empty() {
            self.known = params.clone();
        }
        if !params.is_empty() {
            self.forward(params);
        }
        self.session.notify(ServerMessage::SendFrame)?;
        Ok(true)
    }

    /// Fold a slot value into the carried-forward controls
    ///
    /// A value without fields (the pause marker) never replaces them.
    fn remember(&mut self, params: ParamSet) {
        if params.fields.is_empty() {
            self.restart_pending |= params.restart;
        } else {
            self.known = params;
        }
    }

    async fn upload_step(&mut self) -> Result<bool> {
        let wait = self.limiter.wait_time(Instant::now());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        if let Some(params) = self.session.params().try_get() {
            self.remember(params);
            self.session.notify(ServerMessage::SendFrame)?;
        }

        match self.session.upload_queue().next() {
            Some(image) => {
                self.limiter.mark(Instant::now());
                let mut params = self.known.carry_forward(image);
                params.restart = std::mem::take(&mut self.restart_pending);
                self.forward(params);
                tokio::task::yield_now().await;
            }
            None => tokio::time::sleep(self.config.empty_backoff).await,
        }
        Ok(true)
    }

    fn forward(&mut self, params: ParamSet) {
        if self.last.as_ref() == Some(&params) {
            return;
        }

        let session = &self.session;
        self.metrics.record_dispatch(session, Instant::now());
        match self.engine.accept(session.id(), params.clone()) {
            Ok(()) => self.last = Some(params),
            Err(e) => {
                self.metrics.discard_last_dispatch(session);
                tracing::warn!(session_id = %session.id(), error = %e, "Engine refused input");
            }
        }
    }
}
