//! Error taxonomy for the presence engine.
//!
//! - [`AuthError`] and [`RoutingError`] are reported back to the
//!   originating connection as an `error` event; the connection stays open.
//! - [`InvariantViolation`] should be unreachable. When it fires the
//!   offending connection is forcibly disconnected.

use crate::catalog::RoomId;
use crate::registry::ConnectionId;
use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The token was rejected by the verifier.
    #[error("Invalid token")]
    InvalidToken,

    /// The connection already has an identity bound.
    #[error("Already authenticated")]
    AlreadyAuthenticated,
}

/// Room routing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The requested room is not in the catalog.
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// The connection is not in any room.
    #[error("Not in a room")]
    NotInRoom,

    /// The connection has no identity bound yet.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The connection is not registered (already disconnected).
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The message body exceeds the configured limit.
    #[error("Message too long: {len} characters (max {max})")]
    MessageTooLong { len: usize, max: usize },
}

/// Internal consistency failures between the registry and the rosters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// A connection id was registered twice.
    #[error("Connection registered twice: {0}")]
    DuplicateConnection(ConnectionId),

    /// The registry and the rosters disagree about a connection's room.
    #[error("Roster mismatch for {connection}: registry says {expected:?}, rosters say {actual:?}")]
    RosterMismatch {
        connection: ConnectionId,
        expected: Option<RoomId>,
        actual: Vec<RoomId>,
    },

    /// A roster holds the same connection twice.
    #[error("Duplicate roster entry for {connection} in {room}")]
    DuplicateMember {
        connection: ConnectionId,
        room: RoomId,
    },

    /// A roster holds a connection without an identity.
    #[error("Unauthenticated connection {connection} present in {room}")]
    UnauthenticatedMember {
        connection: ConnectionId,
        room: RoomId,
    },
}

/// Any error produced while handling a connection event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("Invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl RouterError {
    /// Whether this error should be reported to the client as an `error` event.
    #[must_use]
    pub fn is_surfaced(&self) -> bool {
        match self {
            RouterError::Auth(_) => true,
            RouterError::Routing(RoutingError::RoomNotFound(_))
            | RouterError::Routing(RoutingError::MessageTooLong { .. }) => true,
            RouterError::Routing(RoutingError::NotInRoom)
            | RouterError::Routing(RoutingError::NotAuthenticated)
            | RouterError::Routing(RoutingError::UnknownConnection(_)) => false,
            RouterError::Invariant(_) => false,
        }
    }

    /// Whether this error ends the connection's session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, RouterError::Invariant(_))
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            RouterError::Auth(AuthError::InvalidToken) => "invalid_token",
            RouterError::Auth(AuthError::AlreadyAuthenticated) => "already_authenticated",
            RouterError::Routing(RoutingError::RoomNotFound(_)) => "room_not_found",
            RouterError::Routing(RoutingError::NotInRoom) => "not_in_room",
            RouterError::Routing(RoutingError::NotAuthenticated) => "not_authenticated",
            RouterError::Routing(RoutingError::UnknownConnection(_)) => "unknown_connection",
            RouterError::Routing(RoutingError::MessageTooLong { .. }) => "message_too_long",
            RouterError::Invariant(_) => "invariant_violation",
        }
    }
}
