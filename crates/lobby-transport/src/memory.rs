//! In-process transport.
//!
//! A [`MemoryConnection`] and its [`MemoryClient`] are joined by a pair of
//! channels. Sessions driven this way behave exactly like socket sessions,
//! minus the encoding step.

use async_trait::async_trait;
use lobby_core::ConnectionId;
use lobby_protocol::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;

use crate::traits::{Connection, TransportError};

/// Create a connected server/client pair.
#[must_use]
pub fn pair(id: impl Into<ConnectionId>) -> (MemoryConnection, MemoryClient) {
    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let (server_tx, server_rx) = mpsc::unbounded_channel();

    let connection = MemoryConnection {
        id: id.into(),
        inbound: client_rx,
        outbound: Some(server_tx),
    };
    let client = MemoryClient {
        outbound: Some(client_tx),
        inbound: server_rx,
    };
    (connection, client)
}

/// Server side of an in-process connection.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: mpsc::UnboundedReceiver<ClientEvent>,
    outbound: Option<mpsc::UnboundedSender<ServerEvent>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<ClientEvent>, TransportError> {
        if self.outbound.is_none() {
            return Ok(None);
        }
        Ok(self.inbound.recv().await)
    }

    async fn send(&mut self, event: &ServerEvent) -> Result<(), TransportError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        outbound
            .send(event.clone())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        self.inbound.close();
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn is_open(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Client side of an in-process connection.
pub struct MemoryClient {
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

impl MemoryClient {
    /// Send an event to the server.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` once either side has closed.
    pub fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        self.outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(event)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Wait for the next event from the server.
    ///
    /// Returns `None` once the server side is closed and drained.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.inbound.recv().await
    }

    /// Take an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.inbound.try_recv().ok()
    }

    /// Hang up. The server side sees end of stream.
    pub fn close(&mut self) {
        self.outbound = None;
    }
}
