//! Chat messages.
//!
//! Messages are never stored; one is built per `sendMessage`, fanned out,
//! and dropped.

use crate::catalog::RoomId;
use crate::identity::Identity;
use chrono::{DateTime, SecondsFormat, Utc};
use lobby_protocol::{MessagePayload, ServerEvent};
use std::sync::atomic::{AtomicU64, Ordering};

/// A unique message identifier.
pub type MessageId = u64;

/// Atomic counter for ensuring unique IDs even within the same millisecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique, roughly time-ordered message ID.
#[must_use]
pub fn generate_message_id(now: DateTime<Utc>) -> MessageId {
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or_default();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    // Upper bits for time, lower 16 bits for the counter
    (millis << 16) | (counter & 0xFFFF)
}

/// A message in flight to a room.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub room: RoomId,
}

impl Message {
    /// Build a message with a server-assigned id and timestamp.
    #[must_use]
    pub fn new(author: &Identity, room: impl Into<RoomId>, text: impl Into<String>) -> Self {
        let timestamp = Utc::now();
        Self {
            id: generate_message_id(timestamp),
            username: author.username.clone(),
            text: text.into(),
            timestamp,
            room: room.into(),
        }
    }

    /// Convert to the `newMessage` event delivered to the room.
    #[must_use]
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::NewMessage(MessagePayload {
            id: self.id.to_string(),
            username: self.username.clone(),
            text: self.text.clone(),
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            room: self.room.clone(),
        })
    }
}
