//! WebSocket transport implementation.
//!
//! This module adapts an upgraded axum [`WebSocket`] to the [`Connection`]
//! trait. Text frames carry JSON, binary frames carry length-prefixed
//! MessagePack; replies follow whichever encoding the client used last.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use lobby_core::ConnectionId;
use lobby_protocol::{codec, ClientEvent, Encoding, ProtocolError, ServerEvent};
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

use crate::traits::{Connection, TransportError};

/// Default maximum inbound message size (64 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// A WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    is_open: bool,
    encoding: Encoding,
    read_buffer: BytesMut,
    max_message_size: usize,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(
        socket: WebSocket,
        id: ConnectionId,
        remote_addr: Option<SocketAddr>,
        max_message_size: usize,
    ) -> Self {
        Self {
            id,
            socket,
            remote_addr,
            is_open: true,
            encoding: Encoding::default(),
            read_buffer: BytesMut::with_capacity(4096),
            max_message_size,
        }
    }

    /// Encoding used for outbound events.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn check_size(&self, size: usize) -> Result<(), TransportError> {
        if size > self.max_message_size {
            warn!(
                connection = %self.id,
                size,
                max = self.max_message_size,
                "Inbound message too large"
            );
            return Err(TransportError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }

    /// Pop the next buffered binary event. A bad frame discards the
    /// whole buffer so the next call reads from the socket again.
    fn decode_buffered(&mut self) -> Result<Option<ClientEvent>, TransportError> {
        codec::decode_from(&mut self.read_buffer).map_err(|e| {
            self.read_buffer.clear();
            e.into()
        })
    }

    fn mark_closed(&mut self) {
        self.is_open = false;
        self.read_buffer.clear();
    }
}

/// Encode an event as a WebSocket message in the given encoding.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_message(event: &ServerEvent, encoding: Encoding) -> Result<Message, ProtocolError> {
    Ok(match encoding {
        Encoding::Text => Message::Text(codec::encode_text(event)?),
        Encoding::Binary => Message::Binary(codec::encode(event)?.to_vec()),
    })
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<ClientEvent>, TransportError> {
        // Binary messages may pack several events
        if let Some(event) = self.decode_buffered()? {
            return Ok(Some(event));
        }

        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.check_size(text.len())?;
                    self.encoding = Encoding::Text;
                    return Ok(Some(codec::decode_text(&text)?));
                }
                Some(Ok(Message::Binary(data))) => {
                    self.check_size(data.len())?;
                    self.encoding = Encoding::Binary;
                    self.read_buffer.extend_from_slice(&data);

                    // Need more data if nothing decoded
                    if let Some(event) = self.decode_buffered()? {
                        return Ok(Some(event));
                    }
                }
                // The socket queues the pong and flushes it on the next read
                Some(Ok(Message::Ping(_))) => {
                    trace!(connection = %self.id, "Ping received");
                }
                Some(Ok(Message::Pong(_))) => {
                    trace!(connection = %self.id, "Pong received");
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    self.mark_closed();
                    return Ok(None);
                }
                Some(Err(e)) => {
                    debug!(connection = %self.id, error = %e, "WebSocket error");
                    self.mark_closed();
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.mark_closed();
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, event: &ServerEvent) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = encode_message(event, self.encoding)?;
        self.socket
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        self.socket
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(()); // Already closed
        }
        self.mark_closed();

        SinkExt::close(&mut self.socket)
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {e}")))
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobby_protocol::UserRef;

    #[test]
    fn test_text_encoding_is_json() {
        let event = ServerEvent::UserJoined(UserRef::new("alice"));
        let Message::Text(text) = encode_message(&event, Encoding::Text).unwrap() else {
            panic!("expected text message");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "userJoined");
        assert_eq!(value["data"]["username"], "alice");
    }

    #[test]
    fn test_binary_encoding_is_length_prefixed() {
        let event = ServerEvent::error("nope");
        let Message::Binary(data) = encode_message(&event, Encoding::Binary).unwrap() else {
            panic!("expected binary message");
        };
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        assert_eq!(len + 4, data.len());

        let decoded: ServerEvent = codec::decode(&data).unwrap();
        assert_eq!(decoded, event);
    }
}
