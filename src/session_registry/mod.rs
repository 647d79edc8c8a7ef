//! SessionRegistry - Connected client sessions
//!
//! ## Responsibilities
//!
//! - Admission under the configured session limit
//! - Single owner of the id -> Session map
//! - Teardown: cancel tasks, join with a deadline, drain queues
//!
//! Insert and remove happen under one write lock, so concurrent connects
//! can never push the map past its limit.

mod client;
mod session;

pub use client::{ClientHandle, Outbound};
pub use session::{Session, UploadStatus};

use crate::error::{Error, Result};
use crate::inference_engine::EngineHandle;
use crate::models::ServerMessage;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// 0 = unbounded
    pub max_sessions: usize,
    /// Output frames buffered per session before the oldest are dropped
    pub output_capacity: usize,
    /// Per-task join deadline on teardown
    pub join_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sessions: 0,
            output_capacity: 64,
            join_timeout: Duration::from_secs(5),
        }
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    config: RegistryConfig,
    /// Parent of every session token
    cancel: CancellationToken,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig, cancel: CancellationToken) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            cancel,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Admit a client and send the connect handshake
    ///
    /// On rejection the client is told why and its transport is closed.
    pub async fn connect(&self, id: Uuid, client: ClientHandle) -> Result<Arc<Session>> {
        let admitted = {
            let mut sessions = self.sessions.write();
            let max = self.config.max_sessions;
            if max > 0 && sessions.len() >= max {
                Err(Error::CapacityExceeded(max))
            } else if sessions.contains_key(&id) {
                Err(Error::Conflict(format!("session {} already connected", id)))
            } else {
                let session = Arc::new(Session::new(
                    id,
                    client.clone(),
                    self.config.output_capacity,
                    self.cancel.child_token(),
                ));
                sessions.insert(id, session.clone());
                Ok(session)
            }
        };

        let session = match admitted {
            Ok(session) => session,
            Err(e) => {
                let message = match &e {
                    Error::CapacityExceeded(_) => "Server is full".to_string(),
                    other => other.to_string(),
                };
                tracing::warn!(session_id = %id, error = %e, "Connection rejected");
                let _ = client.send(ServerMessage::error(message));
                client.close();
                return Err(e);
            }
        };

        let handshake = [
            ServerMessage::connected(),
            ServerMessage::Wait,
            ServerMessage::SendFrame,
        ];
        for message in handshake {
            if let Err(e) = session.notify(message) {
                self.disconnect(id).await;
                return Err(e);
            }
        }

        tracing::info!(
            session_id = %id,
            active_sessions = self.count(),
            "Session connected"
        );
        Ok(session)
    }

    /// Close the transport and drop the session; `false` if it was not registered
    pub async fn disconnect(&self, id: Uuid) -> bool {
        let Some(session) = self.sessions.write().remove(&id) else {
            return false;
        };

        session.client().close();
        session.shutdown(self.config.join_timeout).await;

        tracing::info!(
            session_id = %id,
            active_sessions = self.count(),
            "Session disconnected"
        );
        true
    }

    /// Disconnect everyone, then release the engine
    pub async fn disconnect_all(&self, engine: &EngineHandle) {
        let ids = self.ids();
        tracing::info!(sessions = ids.len(), "Disconnecting all sessions");
        for id in ids {
            self.disconnect(id).await;
        }
        engine.close();
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Like `get`, but a missing id is an error
    pub fn require(&self, id: &Uuid) -> Result<Arc<Session>> {
        self.get(id).ok_or(Error::SessionNotFound(*id))
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.sessions.read().keys().copied().collect()
    }
}
