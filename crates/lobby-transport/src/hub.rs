//! Outbound fan-out hub.
//!
//! Every live session attaches an unbounded queue here. The router
//! delivers into those queues while holding its state lock, and each
//! session task drains its own queue onto the socket.

use dashmap::DashMap;
use lobby_core::{ConnectionId, DeliveryError, EventSink};
use lobby_protocol::ServerEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Receiving half handed to a session when it attaches.
pub type Outbox = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

/// Per-connection outbound queues.
#[derive(Debug, Default)]
pub struct ConnectionHub {
    senders: DashMap<ConnectionId, mpsc::UnboundedSender<Arc<ServerEvent>>>,
}

impl ConnectionHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection, returning the queue its session drains.
    ///
    /// Re-attaching an id replaces the previous queue, which then closes.
    pub fn attach(&self, connection_id: ConnectionId) -> Outbox {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.senders.insert(connection_id.clone(), tx).is_some() {
            debug!(connection = %connection_id, "Replaced outbound queue");
        }
        rx
    }

    /// Detach a connection. Returns `true` if it was attached.
    pub fn detach(&self, connection_id: &ConnectionId) -> bool {
        self.senders.remove(connection_id).is_some()
    }

    /// Drop every queue so that all sessions observe closure.
    pub fn close_all(&self) -> usize {
        let count = self.senders.len();
        self.senders.clear();
        info!(connections = count, "Closed all outbound queues");
        count
    }

    /// Check whether a connection is attached.
    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.senders.contains_key(connection_id)
    }

    /// Number of attached connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

impl EventSink for ConnectionHub {
    fn deliver(
        &self,
        connection_id: &ConnectionId,
        event: Arc<ServerEvent>,
    ) -> Result<(), DeliveryError> {
        let sender = self
            .senders
            .get(connection_id)
            .ok_or_else(|| DeliveryError::Closed(connection_id.clone()))?;

        sender
            .send(event)
            .map_err(|_| DeliveryError::Closed(connection_id.clone()))
    }
}
