//! Outbound event delivery.
//!
//! [`EventSink`] is implemented by the transport layer and knows how to
//! reach a single connection. [`Broadcaster`] builds the three audiences
//! the router needs on top of it, resolving room membership from the
//! roster at the moment of sending.

use crate::registry::ConnectionId;
use crate::roster::RoomRoster;
use lobby_protocol::ServerEvent;
use std::sync::Arc;
use thiserror::Error;
use tracing::{trace, warn};

/// Delivery errors.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The connection's outbound queue is closed or was never attached.
    #[error("Connection closed: {0}")]
    Closed(ConnectionId),
}

/// Delivers events to individual connections.
///
/// Implementations must not block; the router calls this while holding
/// its state lock.
pub trait EventSink: Send + Sync {
    /// Queue an event for one connection.
    fn deliver(
        &self,
        connection_id: &ConnectionId,
        event: Arc<ServerEvent>,
    ) -> Result<(), DeliveryError>;
}

/// Fans events out to a connection, a room, or a room minus its sender.
#[derive(Clone)]
pub struct Broadcaster {
    sink: Arc<dyn EventSink>,
}

impl Broadcaster {
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Send an event to a single connection.
    ///
    /// Returns `true` if it was queued.
    pub fn to_connection(&self, connection_id: &ConnectionId, event: ServerEvent) -> bool {
        self.send(connection_id, Arc::new(event))
    }

    /// Send an event to every member of a room.
    ///
    /// Returns the number of connections it was queued for.
    pub fn to_room(&self, roster: &RoomRoster, room: &str, event: ServerEvent) -> usize {
        self.fan_out(roster, room, None, event)
    }

    /// Send an event to every member of a room except `sender`.
    ///
    /// Returns the number of connections it was queued for.
    pub fn to_room_except(
        &self,
        roster: &RoomRoster,
        room: &str,
        sender: &ConnectionId,
        event: ServerEvent,
    ) -> usize {
        self.fan_out(roster, room, Some(sender), event)
    }

    fn fan_out(
        &self,
        roster: &RoomRoster,
        room: &str,
        skip: Option<&ConnectionId>,
        event: ServerEvent,
    ) -> usize {
        let kind = event.kind();
        let event = Arc::new(event);

        let delivered = roster
            .entries(room)
            .iter()
            .filter(|m| Some(&m.connection_id) != skip)
            .filter(|m| self.send(&m.connection_id, Arc::clone(&event)))
            .count();

        trace!(room = %room, event = %kind, recipients = delivered, "Fanned out event");
        delivered
    }

    fn send(&self, connection_id: &ConnectionId, event: Arc<ServerEvent>) -> bool {
        let kind = event.kind();
        match self.sink.deliver(connection_id, event) {
            Ok(()) => true,
            Err(e) => {
                warn!(connection = %connection_id, event = %kind, error = %e, "Failed to deliver event");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use lobby_protocol::UserRef;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        delivered: Mutex<Vec<(ConnectionId, Arc<ServerEvent>)>>,
        closed: Vec<ConnectionId>,
    }

    impl EventSink for Recorder {
        fn deliver(
            &self,
            connection_id: &ConnectionId,
            event: Arc<ServerEvent>,
        ) -> Result<(), DeliveryError> {
            if self.closed.contains(connection_id) {
                return Err(DeliveryError::Closed(connection_id.clone()));
            }
            self.delivered
                .lock()
                .unwrap()
                .push((connection_id.clone(), event));
            Ok(())
        }
    }

    fn roster_of(ids: &[&str]) -> RoomRoster {
        let mut roster = RoomRoster::new();
        for id in ids {
            roster.join("general", &ConnectionId::new(*id), Identity::new(*id, *id));
        }
        roster
    }

    #[test]
    fn test_to_room_except_skips_sender() {
        let recorder = Arc::new(Recorder::default());
        let broadcaster = Broadcaster::new(recorder.clone());
        let roster = roster_of(&["a", "b", "c"]);

        let count = broadcaster.to_room_except(
            &roster,
            "general",
            &ConnectionId::new("b"),
            ServerEvent::UserTyping(UserRef::new("b")),
        );
        assert_eq!(count, 2);

        let targets: Vec<_> = recorder
            .delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(targets, ["a", "c"]);
    }

    #[test]
    fn test_to_room_counts_only_successful_deliveries() {
        let recorder = Arc::new(Recorder {
            closed: vec![ConnectionId::new("b")],
            ..Default::default()
        });
        let broadcaster = Broadcaster::new(recorder.clone());
        let roster = roster_of(&["a", "b"]);

        let count = broadcaster.to_room(&roster, "general", ServerEvent::error("x"));
        assert_eq!(count, 1);
        assert_eq!(broadcaster.to_room(&roster, "empty", ServerEvent::error("x")), 0);
    }

    #[test]
    fn test_to_connection() {
        let recorder = Arc::new(Recorder::default());
        let broadcaster = Broadcaster::new(recorder.clone());

        assert!(broadcaster.to_connection(&ConnectionId::new("a"), ServerEvent::error("x")));
        assert_eq!(recorder.delivered.lock().unwrap().len(), 1);
    }
}
