//! Outbound half of a client connection
//!
//! The socket writer lives in its own task and drains an unbounded channel,
//! so any loop (or the drain thread) can notify the client without touching
//! the socket directly.

use crate::error::{Error, Result};
use crate::models::ServerMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Command for the socket writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Close,
}

/// Cloneable sender for one client's control socket
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<Outbound>,
    closed: Arc<AtomicBool>,
}

impl ClientHandle {
    /// Create a handle and the receiver the writer task drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Queue a status message for the client
    pub fn send(&self, message: ServerMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Transport("connection closed".to_string()));
        }
        self.tx
            .send(Outbound::Message(message))
            .map_err(|_| Error::Transport("socket writer gone".to_string()))
    }

    /// Ask the writer to close the socket; repeated calls are no-ops
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Writer already gone means the socket is already closed
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_is_idempotent() {
        let (client, mut rx) = ClientHandle::channel();
        client.send(ServerMessage::Wait).unwrap();
        client.close();
        client.close();

        assert_eq!(rx.try_recv().unwrap(), Outbound::Message(ServerMessage::Wait));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(rx.try_recv().is_err());
        assert!(client.send(ServerMessage::Wait).is_err());
    }

    #[test]
    fn test_send_fails_when_writer_dropped() {
        let (client, rx) = ClientHandle::channel();
        drop(rx);
        assert!(matches!(client.send(ServerMessage::Wait), Err(Error::Transport(_))));
        client.close();
    }
}
