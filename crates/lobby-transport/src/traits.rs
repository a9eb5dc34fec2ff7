//! Transport abstraction traits for Lobby.
//!
//! These traits define the interface that all transport implementations must provide,
//! allowing the session loop to be transport-agnostic.

use async_trait::async_trait;
use lobby_core::ConnectionId;
use lobby_protocol::{ClientEvent, ServerEvent};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Inbound message exceeded the size limit.
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] lobby_protocol::ProtocolError),
}

impl TransportError {
    /// Whether the session can keep reading after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::Protocol(_) | TransportError::MessageTooLarge { .. }
        )
    }
}

/// An active connection over a transport.
///
/// Connections carry the bidirectional flow of events between the server
/// and a single client.
#[async_trait]
pub trait Connection: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Receive the next event from the connection.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<ClientEvent>, TransportError>;

    /// Send an event to the connection.
    async fn send(&mut self, event: &ServerEvent) -> Result<(), TransportError>;

    /// Send a keepalive probe.
    async fn ping(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}
