//! Fire-and-forget delivery of messages to client connections.

use crate::protocol::ServerMessage;
use crate::types::ConnectionId;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{trace, warn};

/// A client connection as seen by the engine.
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Whether the connection can currently accept a message.
    fn is_open(&self) -> bool;

    /// Queue one text frame. Must not block.
    fn send(&self, text: String);
}

/// Encodes messages and writes them to open connections.
///
/// Closed connections are skipped silently; the transport's close event is
/// responsible for tearing their subscriptions down.
#[derive(Debug, Default)]
pub struct DeliveryChannel {
    delivered: u64,
    dropped: u64,
}

impl DeliveryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `message` if the connection is open. Returns whether it was written.
    pub fn send(&mut self, connection: &dyn Connection, message: &ServerMessage) -> bool {
        if !connection.is_open() {
            self.dropped += 1;
            trace!(connection = ?connection.id(), "dropping message for closed connection");
            return false;
        }

        match message.to_json() {
            Ok(text) => {
                connection.send(text);
                self.delivered += 1;
                true
            }
            Err(e) => {
                self.dropped += 1;
                warn!(connection = ?connection.id(), error = %e, "failed to encode message");
                false
            }
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// An in-process connection that buffers everything sent to it.
///
/// Useful for embedding the engine without a network transport and in tests.
pub struct MemoryConnection {
    id: ConnectionId,
    open: AtomicBool,
    sender: Sender<String>,
    receiver: Receiver<String>,
}

impl MemoryConnection {
    pub fn new(id: u64) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            id: ConnectionId(id),
            open: AtomicBool::new(true),
            sender,
            receiver,
        }
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Take every message received so far, decoded as JSON.
    pub fn drain(&self) -> Vec<Value> {
        self.receiver
            .try_iter()
            .filter_map(|text| serde_json::from_str(&text).ok())
            .collect()
    }

    /// Wait for the next message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Value> {
        match self.receiver.recv_timeout(timeout) {
            Ok(text) => serde_json::from_str(&text).ok(),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, text: String) {
        let _ = self.sender.send(text);
    }
}
