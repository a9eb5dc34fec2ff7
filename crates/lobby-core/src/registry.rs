//! Registry of live connections.
//!
//! Tracks, for every live connection, the identity bound to it (if any)
//! and the room it currently occupies (if any). Keeping the rosters in
//! step with these assignments is the router's job.

use crate::catalog::RoomId;
use crate::error::{AuthError, InvariantViolation, RouterError, RoutingError};
use crate::identity::Identity;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Transport is up, no identity bound.
    Connected,
    /// Identity bound, not in a room.
    Authenticated,
    /// Identity bound and present in a room.
    InRoom(RoomId),
}

/// A live connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    identity: Option<Identity>,
    current_room: Option<RoomId>,
    connected_at: DateTime<Utc>,
}

impl Connection {
    fn new(id: ConnectionId) -> Self {
        Self {
            id,
            identity: None,
            current_room: None,
            connected_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The bound identity, if authenticated.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// The room this connection occupies, if any.
    #[must_use]
    pub fn current_room(&self) -> Option<&RoomId> {
        self.current_room.as_ref()
    }

    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Derive the lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match (&self.identity, &self.current_room) {
            (None, _) => SessionState::Connected,
            (Some(_), None) => SessionState::Authenticated,
            (Some(_), Some(room)) => SessionState::InRoom(room.clone()),
        }
    }
}

/// All live connections, keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, unauthenticated connection.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if the id is already registered.
    pub fn register(&mut self, id: ConnectionId) -> Result<&Connection, InvariantViolation> {
        if self.connections.contains_key(&id) {
            return Err(InvariantViolation::DuplicateConnection(id));
        }
        debug!(connection = %id, "Registered connection");
        Ok(self
            .connections
            .entry(id.clone())
            .or_insert_with(|| Connection::new(id)))
    }

    /// Bind a verified identity to a connection.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyAuthenticated` if an identity is already bound, or
    /// `UnknownConnection` if the connection is gone.
    pub fn bind_identity(
        &mut self,
        id: &ConnectionId,
        identity: Identity,
    ) -> Result<&Identity, RouterError> {
        let conn = self
            .connections
            .get_mut(id)
            .ok_or_else(|| RoutingError::UnknownConnection(id.clone()))?;

        if conn.identity.is_some() {
            return Err(AuthError::AlreadyAuthenticated.into());
        }

        debug!(connection = %id, user = %identity.username, "Bound identity");
        Ok(conn.identity.insert(identity))
    }

    /// Look up a connection.
    ///
    /// # Errors
    ///
    /// Returns `UnknownConnection` if the id is not registered.
    pub fn get(&self, id: &ConnectionId) -> Result<&Connection, RoutingError> {
        self.connections
            .get(id)
            .ok_or_else(|| RoutingError::UnknownConnection(id.clone()))
    }

    /// Record the room a connection now occupies, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns `UnknownConnection` if the id is not registered.
    pub fn set_room(
        &mut self,
        id: &ConnectionId,
        room: Option<RoomId>,
    ) -> Result<Option<RoomId>, RoutingError> {
        let conn = self
            .connections
            .get_mut(id)
            .ok_or_else(|| RoutingError::UnknownConnection(id.clone()))?;
        Ok(std::mem::replace(&mut conn.current_room, room))
    }

    /// Remove a connection, returning its final state.
    ///
    /// The caller uses the returned room assignment to clean up rosters.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(id);
        if removed.is_some() {
            debug!(connection = %id, "Removed connection");
        }
        removed
    }

    /// Remove every connection, returning their ids.
    pub fn drain(&mut self) -> Vec<ConnectionId> {
        self.connections.drain().map(|(id, _)| id).collect()
    }

    /// Iterate over all live connections.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
