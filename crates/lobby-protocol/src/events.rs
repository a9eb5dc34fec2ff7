//! Event types for the Lobby protocol.
//!
//! Every event travels as an adjacently tagged object:
//! `{"event": "<name>", "data": <payload>}`. Events without a payload
//! omit `data` entirely.

use crate::version::Version;
use serde::{Deserialize, Serialize};

/// Event kind identifiers, used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Authenticate,
    JoinRoom,
    SendMessage,
    Typing,
    StopTyping,
    Connected,
    Rooms,
    RoomUsers,
    NewMessage,
    UserJoined,
    UserLeft,
    UserTyping,
    UserStoppedTyping,
    Error,
}

impl EventKind {
    /// Wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Authenticate => "authenticate",
            EventKind::JoinRoom => "joinRoom",
            EventKind::SendMessage => "sendMessage",
            EventKind::Typing => "typing",
            EventKind::StopTyping => "stopTyping",
            EventKind::Connected => "connected",
            EventKind::Rooms => "rooms",
            EventKind::RoomUsers => "roomUsers",
            EventKind::NewMessage => "newMessage",
            EventKind::UserJoined => "userJoined",
            EventKind::UserLeft => "userLeft",
            EventKind::UserTyping => "userTyping",
            EventKind::UserStoppedTyping => "userStoppedTyping",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A room descriptor as published in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Stable room identifier used by `joinRoom`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Short description.
    pub description: String,
}

impl Room {
    /// Create a new room descriptor.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A user as seen by other members of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub username: String,
}

impl UserRef {
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// A chat message as delivered to room members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Server-assigned message identifier, as a decimal string.
    pub id: String,
    /// Author's display name.
    pub username: String,
    /// Message body.
    pub text: String,
    /// RFC 3339 UTC timestamp assigned by the server.
    pub timestamp: String,
    /// Room the message was sent to.
    pub room: String,
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Bind an identity to the connection.
    Authenticate {
        /// Bearer token issued by the auth service.
        token: String,
    },

    /// Enter a room, leaving the current one first.
    JoinRoom(String),

    /// Post a message to the current room.
    SendMessage {
        /// Message body.
        text: String,
    },

    /// The user started typing.
    Typing,

    /// The user stopped typing.
    StopTyping,
}

impl ClientEvent {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Authenticate { .. } => EventKind::Authenticate,
            ClientEvent::JoinRoom(_) => EventKind::JoinRoom,
            ClientEvent::SendMessage { .. } => EventKind::SendMessage,
            ClientEvent::Typing => EventKind::Typing,
            ClientEvent::StopTyping => EventKind::StopTyping,
        }
    }

    /// Create an Authenticate event.
    #[must_use]
    pub fn authenticate(token: impl Into<String>) -> Self {
        ClientEvent::Authenticate {
            token: token.into(),
        }
    }

    /// Create a JoinRoom event.
    #[must_use]
    pub fn join_room(room: impl Into<String>) -> Self {
        ClientEvent::JoinRoom(room.into())
    }

    /// Create a SendMessage event.
    #[must_use]
    pub fn send_message(text: impl Into<String>) -> Self {
        ClientEvent::SendMessage { text: text.into() }
    }
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Handshake, sent once when the connection is established.
    #[serde(rename_all = "camelCase")]
    Connected {
        /// Opaque connection identifier.
        connection_id: String,
        /// Server protocol version.
        version: Version,
    },

    /// Room catalog, sent after successful authentication.
    Rooms(Vec<Room>),

    /// Current members of the room just joined.
    RoomUsers(Vec<UserRef>),

    /// A message posted to the room.
    NewMessage(MessagePayload),

    /// Another user entered the room.
    UserJoined(UserRef),

    /// Another user left the room.
    UserLeft(UserRef),

    /// Another user started typing.
    UserTyping(UserRef),

    /// Another user stopped typing.
    UserStoppedTyping(UserRef),

    /// A request from this connection failed.
    Error(String),
}

impl ServerEvent {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Connected { .. } => EventKind::Connected,
            ServerEvent::Rooms(_) => EventKind::Rooms,
            ServerEvent::RoomUsers(_) => EventKind::RoomUsers,
            ServerEvent::NewMessage(_) => EventKind::NewMessage,
            ServerEvent::UserJoined(_) => EventKind::UserJoined,
            ServerEvent::UserLeft(_) => EventKind::UserLeft,
            ServerEvent::UserTyping(_) => EventKind::UserTyping,
            ServerEvent::UserStoppedTyping(_) => EventKind::UserStoppedTyping,
            ServerEvent::Error(_) => EventKind::Error,
        }
    }

    /// Create a Connected handshake event for the current protocol version.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>) -> Self {
        ServerEvent::Connected {
            connection_id: connection_id.into(),
            version: crate::PROTOCOL_VERSION,
        }
    }

    /// Create an Error event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(message.into())
    }

    /// Whether this event reports presence rather than content.
    #[must_use]
    pub fn is_presence(&self) -> bool {
        matches!(
            self,
            ServerEvent::UserJoined(_)
                | ServerEvent::UserLeft(_)
                | ServerEvent::UserTyping(_)
                | ServerEvent::UserStoppedTyping(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_wire_names() {
        let join: ClientEvent =
            serde_json::from_value(json!({"event": "joinRoom", "data": "general"})).unwrap();
        assert_eq!(join, ClientEvent::join_room("general"));

        let send: ClientEvent =
            serde_json::from_value(json!({"event": "sendMessage", "data": {"text": "hi"}}))
                .unwrap();
        assert_eq!(send.kind(), EventKind::SendMessage);

        let auth: ClientEvent =
            serde_json::from_value(json!({"event": "authenticate", "data": {"token": "t"}}))
                .unwrap();
        assert_eq!(auth, ClientEvent::authenticate("t"));
    }

    #[test]
    fn test_unit_events_without_data() {
        let typing: ClientEvent = serde_json::from_value(json!({"event": "typing"})).unwrap();
        assert_eq!(typing, ClientEvent::Typing);

        let stop: ClientEvent = serde_json::from_value(json!({"event": "stopTyping"})).unwrap();
        assert_eq!(stop, ClientEvent::StopTyping);
    }

    #[test]
    fn test_unknown_event_rejected() {
        let result: Result<ClientEvent, _> =
            serde_json::from_value(json!({"event": "leaveRoom", "data": "general"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_server_event_shapes() {
        let joined = serde_json::to_value(ServerEvent::UserJoined(UserRef::new("alice"))).unwrap();
        assert_eq!(
            joined,
            json!({"event": "userJoined", "data": {"username": "alice"}})
        );

        let error = serde_json::to_value(ServerEvent::error("Room not found: x")).unwrap();
        assert_eq!(error, json!({"event": "error", "data": "Room not found: x"}));

        let hello = serde_json::to_value(ServerEvent::connected("c-1")).unwrap();
        assert_eq!(hello["data"]["connectionId"], "c-1");
        assert_eq!(hello["data"]["version"]["major"], 1);
    }

    #[test]
    fn test_presence_classification() {
        assert!(ServerEvent::UserTyping(UserRef::new("a")).is_presence());
        assert!(!ServerEvent::error("x").is_presence());
        assert!(!ServerEvent::RoomUsers(vec![]).is_presence());
    }
}
