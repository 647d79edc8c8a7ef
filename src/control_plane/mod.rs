//! ControlPlaneLoop - Per-connection control message handling
//!
//! ## Responsibilities
//!
//! - Interpret `pause` / `resume` / `upload_done` / `next_frame`
//! - Ingest-side frame rate limiting
//! - Upload clip capture
//! - Idle timeout watchdog
//!
//! The loop owns the inbound half of the connection. When it ends for any
//! reason other than cancellation it tears its own session down through the
//! registry.

use crate::error::{Error, Result};
use crate::models::{ControlCommand, InputMode, ParamSet, ServerMessage};
use crate::rate_limit::FrameRateLimiter;
use crate::session_registry::{Session, SessionRegistry};
use axum::body::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Back-off after a message that carries no command
const UNKNOWN_MESSAGE_BACKOFF: Duration = Duration::from_millis(8);

/// One inbound control-socket message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Json(Value),
    Binary(Bytes),
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlExit {
    /// Client closed the connection
    ClientClosed,
    IdleTimeout,
    TransportError,
    /// Session was torn down from elsewhere
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    /// `None` disables the watchdog
    pub idle_timeout: Option<Duration>,
    pub ingest_fps: f64,
    pub input_mode: InputMode,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            ingest_fps: 16.0,
            input_mode: InputMode::Image,
        }
    }
}

pub struct ControlPlaneLoop<S> {
    session: Arc<Session>,
    registry: Arc<SessionRegistry>,
    inbound: S,
    config: ControlPlaneConfig,
    limiter: FrameRateLimiter,
}

impl<S> ControlPlaneLoop<S>
where
    S: Stream<Item = Result<Inbound>> + Unpin,
{
    pub fn new(
        session: Arc<Session>,
        registry: Arc<SessionRegistry>,
        inbound: S,
        config: ControlPlaneConfig,
    ) -> Self {
        let limiter = FrameRateLimiter::from_fps(config.ingest_fps);
        Self {
            session,
            registry,
            inbound,
            config,
            limiter,
        }
    }

    /// Run until the client leaves, times out or the session is cancelled
    pub async fn run(mut self) -> ControlExit {
        let id = self.session.id();
        let exit = self.receive_loop().await;

        match exit {
            ControlExit::Cancelled => {
                tracing::debug!(session_id = %id, "Control plane cancelled");
                return exit;
            }
            ControlExit::IdleTimeout => {
                tracing::info!(session_id = %id, "Session idle timeout");
                let _ = self.session.notify(ServerMessage::timeout());
            }
            ControlExit::ClientClosed => {
                tracing::info!(session_id = %id, "Client closed control connection");
            }
            ControlExit::TransportError => {}
        }

        self.registry.disconnect(id).await;
        exit
    }

    async fn receive_loop(&mut self) -> ControlExit {
        loop {
            let message = match self.recv().await {
                Ok(message) => message,
                Err(exit) => return exit,
            };

            if let Err(e) = self.handle(message).await {
                return match e {
                    Fatal::Exit(exit) => exit,
                    Fatal::Error(e) => {
                        tracing::warn!(session_id = %self.session.id(), error = %e, "Control plane transport error");
                        ControlExit::TransportError
                    }
                };
            }
        }
    }

    /// Next message, subject to the idle timeout and cancellation
    async fn recv(&mut self) -> std::result::Result<Inbound, ControlExit> {
        let cancel = self.session.cancel_token().clone();
        let idle_timeout = self.config.idle_timeout;
        let inbound = &mut self.inbound;

        let next = async move {
            match idle_timeout {
                Some(limit) => tokio::time::timeout(limit, inbound.next())
                    .await
                    .map_err(|_| ControlExit::IdleTimeout),
                None => Ok(inbound.next().await),
            }
        };

        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ControlExit::Cancelled),
            received = next => received?,
        };

        match received {
            None => Err(ControlExit::ClientClosed),
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => {
                tracing::warn!(session_id = %self.session.id(), error = %e, "Control socket read failed");
                Err(ControlExit::TransportError)
            }
        }
    }

    async fn handle(&mut self, message: Inbound) -> std::result::Result<(), Fatal> {
        let doc = match message {
            Inbound::Json(doc) => doc,
            Inbound::Binary(data) => {
                tracing::debug!(
                    session_id = %self.session.id(),
                    bytes = data.len(),
                    "Ignoring unexpected binary message"
                );
                return Ok(());
            }
        };

        match ControlCommand::from_document(&doc) {
            ControlCommand::Pause => {
                self.session.params().set(ParamSet::restart_marker());
            }
            ControlCommand::Resume => {
                self.session.notify(ServerMessage::SendFrame)?;
            }
            ControlCommand::UploadDone => {
                self.session.mark_upload_completed();
                self.session.notify(ServerMessage::UploadDoneAck)?;
            }
            ControlCommand::NextFrame => self.next_frame().await?,
            ControlCommand::Other => {
                tokio::time::sleep(UNKNOWN_MESSAGE_BACKOFF).await;
            }
        }
        Ok(())
    }

    /// `next_frame`: parameter document, then (maybe) an image payload
    async fn next_frame(&mut self) -> std::result::Result<(), Fatal> {
        let id = self.session.id();

        let mut params = match self.recv().await.map_err(Fatal::Exit)? {
            Inbound::Json(doc) => match ParamSet::from_document(doc) {
                Ok(params) => params,
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Invalid parameter document");
                    self.session.notify(ServerMessage::SendFrame)?;
                    return Ok(());
                }
            },
            Inbound::Binary(_) => {
                tracing::warn!(session_id = %id, "Expected parameter document, got binary");
                self.session.notify(ServerMessage::SendFrame)?;
                return Ok(());
            }
        };

        let upload_mode = params.upload_mode;
        self.session.set_upload_mode(upload_mode);
        let upload_completed = self.session.is_upload_completed();

        let wants_image = self.config.input_mode == InputMode::Image
            && (!upload_mode || !upload_completed);
        if wants_image {
            let image = match self.recv().await.map_err(Fatal::Exit)? {
                Inbound::Binary(image) => image,
                Inbound::Json(_) => {
                    tracing::warn!(session_id = %id, "Expected image payload, got JSON");
                    self.session.notify(ServerMessage::SendFrame)?;
                    return Ok(());
                }
            };

            if image.is_empty() {
                self.session.notify(ServerMessage::SendFrame)?;
                return Ok(());
            }

            if !self.limiter.admit(Instant::now()) {
                self.session.notify(ServerMessage::SendFrame)?;
                return Ok(());
            }

            if upload_mode {
                self.session.upload_queue().append(image);
            } else {
                params.image = Some(image);
            }
        }

        self.session.params().set(params);
        self.session.notify(ServerMessage::Wait)?;
        Ok(())
    }
}

/// Internal stop reason for message handlers
enum Fatal {
    Exit(ControlExit),
    Error(Error),
}

impl From<Error> for Fatal {
    fn from(e: Error) -> Self {
        Fatal::Error(e)
    }
}
