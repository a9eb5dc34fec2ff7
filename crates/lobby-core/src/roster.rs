//! Room rosters.
//!
//! A roster is the live membership of one room, kept in join order so
//! that member lists render deterministically. The roster does not know
//! about the one-room-per-connection rule; the router enforces that.

use crate::catalog::RoomId;
use crate::identity::Identity;
use crate::registry::ConnectionId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

/// A connection present in a room.
#[derive(Debug, Clone)]
pub struct Member {
    pub connection_id: ConnectionId,
    pub identity: Identity,
    pub joined_at: DateTime<Utc>,
}

/// Result of [`RoomRoster::join`].
#[derive(Debug)]
pub enum JoinOutcome<'a> {
    /// The connection was added.
    Joined(&'a [Member]),
    /// The connection was already present; nothing changed.
    AlreadyPresent(&'a [Member]),
}

impl<'a> JoinOutcome<'a> {
    /// The room's members after the join.
    #[must_use]
    pub fn members(&self) -> &'a [Member] {
        match self {
            JoinOutcome::Joined(m) | JoinOutcome::AlreadyPresent(m) => m,
        }
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        matches!(self, JoinOutcome::Joined(_))
    }
}

/// Membership of every occupied room.
#[derive(Debug, Default)]
pub struct RoomRoster {
    rooms: HashMap<RoomId, Vec<Member>>,
}

impl RoomRoster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room.
    ///
    /// Joining a room the connection is already in leaves the roster unchanged.
    pub fn join(
        &mut self,
        room: &str,
        connection_id: &ConnectionId,
        identity: Identity,
    ) -> JoinOutcome<'_> {
        let members = self.rooms.entry(room.to_string()).or_default();

        if members.iter().any(|m| &m.connection_id == connection_id) {
            return JoinOutcome::AlreadyPresent(members);
        }

        debug!(room = %room, connection = %connection_id, user = %identity.username, "Roster: member joined");
        members.push(Member {
            connection_id: connection_id.clone(),
            identity,
            joined_at: Utc::now(),
        });
        JoinOutcome::Joined(members)
    }

    /// Remove a connection from a room.
    ///
    /// Returns `false` if it was not there. Empty rooms are dropped.
    pub fn leave(&mut self, room: &str, connection_id: &ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };

        let before = members.len();
        members.retain(|m| &m.connection_id != connection_id);
        let removed = members.len() < before;

        if members.is_empty() {
            self.rooms.remove(room);
        }
        if removed {
            debug!(room = %room, connection = %connection_id, "Roster: member left");
        }
        removed
    }

    /// Remove a connection from every room it appears in.
    ///
    /// Returns the rooms it was removed from along with the removed entries.
    pub fn purge(&mut self, connection_id: &ConnectionId) -> Vec<(RoomId, Member)> {
        let mut removed = Vec::new();
        for (room, members) in &mut self.rooms {
            if let Some(pos) = members.iter().position(|m| &m.connection_id == connection_id) {
                removed.push((room.clone(), members.remove(pos)));
            }
        }
        self.rooms.retain(|_, members| !members.is_empty());
        removed
    }

    /// Identities present in a room, in join order.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<Identity> {
        self.entries(room).iter().map(|m| m.identity.clone()).collect()
    }

    /// Raw roster entries for a room, in join order.
    #[must_use]
    pub fn entries(&self, room: &str) -> &[Member] {
        self.rooms.get(room).map(Vec::as_slice).unwrap_or_default()
    }

    /// Connections present in a room.
    #[must_use]
    pub fn connection_ids(&self, room: &str) -> Vec<ConnectionId> {
        self.entries(room)
            .iter()
            .map(|m| m.connection_id.clone())
            .collect()
    }

    /// Number of connections present in a room.
    #[must_use]
    pub fn count(&self, room: &str) -> usize {
        self.entries(room).len()
    }

    /// Check whether a connection is present in a room.
    #[must_use]
    pub fn contains(&self, room: &str, connection_id: &ConnectionId) -> bool {
        self.entries(room)
            .iter()
            .any(|m| &m.connection_id == connection_id)
    }

    /// Rooms that currently contain a connection.
    #[must_use]
    pub fn rooms_of(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        self.rooms
            .iter()
            .filter(|(_, members)| members.iter().any(|m| &m.connection_id == connection_id))
            .map(|(room, _)| room.clone())
            .collect()
    }

    /// Iterate over occupied rooms and their members.
    pub fn iter(&self) -> impl Iterator<Item = (&RoomId, &[Member])> {
        self.rooms.iter().map(|(room, members)| (room, members.as_slice()))
    }

    /// Number of rooms with at least one member.
    #[must_use]
    pub fn occupied_rooms(&self) -> usize {
        self.rooms.len()
    }

    /// Total roster entries across all rooms.
    #[must_use]
    pub fn total_members(&self) -> usize {
        self.rooms.values().map(Vec::len).sum()
    }

    /// Drop every room.
    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    fn usernames(roster: &RoomRoster, room: &str) -> Vec<String> {
        roster.members(room).into_iter().map(|i| i.username).collect()
    }

    #[test]
    fn test_join_preserves_order() {
        let mut roster = RoomRoster::new();
        roster.join("general", &conn("c1"), Identity::new("1", "alice"));
        roster.join("general", &conn("c2"), Identity::new("2", "bob"));
        roster.join("general", &conn("c3"), Identity::new("3", "carol"));

        assert_eq!(usernames(&roster, "general"), ["alice", "bob", "carol"]);
        assert_eq!(roster.count("general"), 3);
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut roster = RoomRoster::new();
        assert!(roster
            .join("general", &conn("c1"), Identity::new("1", "alice"))
            .is_new());

        let again = roster.join("general", &conn("c1"), Identity::new("1", "alice"));
        assert!(!again.is_new());
        assert_eq!(again.members().len(), 1);
    }

    #[test]
    fn test_leave_tolerates_absence() {
        let mut roster = RoomRoster::new();
        roster.join("general", &conn("c1"), Identity::new("1", "alice"));
        roster.join("general", &conn("c2"), Identity::new("2", "bob"));

        assert!(roster.leave("general", &conn("c1")));
        assert!(!roster.leave("general", &conn("c1")));
        assert!(!roster.leave("nowhere", &conn("c1")));

        // Other members untouched
        assert_eq!(usernames(&roster, "general"), ["bob"]);
    }

    #[test]
    fn test_empty_rooms_are_dropped() {
        let mut roster = RoomRoster::new();
        roster.join("tech", &conn("c1"), Identity::new("1", "alice"));
        assert_eq!(roster.occupied_rooms(), 1);

        roster.leave("tech", &conn("c1"));
        assert_eq!(roster.occupied_rooms(), 0);
        assert!(roster.members("tech").is_empty());
        assert_eq!(roster.count("tech"), 0);
    }

    #[test]
    fn test_purge_removes_everywhere() {
        let mut roster = RoomRoster::new();
        roster.join("general", &conn("c1"), Identity::new("1", "alice"));
        roster.join("tech", &conn("c1"), Identity::new("1", "alice"));
        roster.join("tech", &conn("c2"), Identity::new("2", "bob"));

        let mut removed: Vec<_> = roster
            .purge(&conn("c1"))
            .into_iter()
            .map(|(room, _)| room)
            .collect();
        removed.sort();

        assert_eq!(removed, ["general", "tech"]);
        assert!(roster.rooms_of(&conn("c1")).is_empty());
        assert_eq!(usernames(&roster, "tech"), ["bob"]);
        assert_eq!(roster.total_members(), 1);
    }
}
