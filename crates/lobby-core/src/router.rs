//! Presence router.
//!
//! The router owns the connection registry and the room rosters, applies
//! every inbound connection event to them, and fans the resulting
//! notifications out through a [`Broadcaster`].
//!
//! Registry and rosters sit behind one lock, so a room switch
//! (leave-then-join) and a disconnect cleanup are each atomic with
//! respect to every other event. Token verification is the only await
//! point and runs outside the lock.

use crate::catalog::{RoomCatalog, RoomId};
use crate::error::{AuthError, InvariantViolation, RouterError, RoutingError};
use crate::identity::{Identity, TokenVerifier};
use crate::message::{Message, MessageId};
use crate::registry::{Connection, ConnectionId, ConnectionRegistry};
use crate::roster::RoomRoster;
use crate::sink::{Broadcaster, EventSink};
use lobby_protocol::{ClientEvent, ServerEvent, UserRef};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum message length in characters.
    pub max_message_length: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_message_length: 2000,
        }
    }
}

/// Shared mutable state, always locked as a pair.
#[derive(Debug, Default)]
struct RouterState {
    registry: ConnectionRegistry,
    roster: RoomRoster,
}

/// Routes connection events to rooms.
pub struct PresenceRouter {
    state: Mutex<RouterState>,
    catalog: Arc<dyn RoomCatalog>,
    verifier: Arc<dyn TokenVerifier>,
    broadcaster: Broadcaster,
    config: RouterConfig,
}

impl PresenceRouter {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn RoomCatalog>,
        verifier: Arc<dyn TokenVerifier>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_config(catalog, verifier, sink, RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(
        catalog: Arc<dyn RoomCatalog>,
        verifier: Arc<dyn TokenVerifier>,
        sink: Arc<dyn EventSink>,
        config: RouterConfig,
    ) -> Self {
        info!("Creating presence router with config: {:?}", config);
        Self {
            state: Mutex::new(RouterState::default()),
            catalog,
            verifier,
            broadcaster: Broadcaster::new(sink),
            config,
        }
    }

    /// The room catalog this router validates joins against.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn RoomCatalog> {
        &self.catalog
    }

    /// Register a newly established connection.
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if the id is already registered.
    pub async fn connect(&self, connection_id: ConnectionId) -> Result<(), RouterError> {
        let mut state = self.state.lock().await;
        state.registry.register(connection_id)?;
        Ok(())
    }

    /// Apply one inbound event.
    ///
    /// Auth and routing failures are reported to the connection as an
    /// `error` event and returned. Presence and message events from a
    /// connection outside any room are dropped and return `Ok`. An
    /// invariant violation disconnects the connection before returning.
    ///
    /// # Errors
    ///
    /// Returns the error that was reported, or the invariant violation.
    pub async fn handle(
        &self,
        connection_id: &ConnectionId,
        event: ClientEvent,
    ) -> Result<(), RouterError> {
        let kind = event.kind();
        trace!(connection = %connection_id, event = %kind, "Handling event");

        let result = match event {
            ClientEvent::Authenticate { token } => {
                self.authenticate(connection_id, &token).await.map(|_| ())
            }
            ClientEvent::JoinRoom(room) => self.join_room(connection_id, &room).await,
            ClientEvent::SendMessage { text } => {
                self.send_message(connection_id, &text).await.map(|_| ())
            }
            ClientEvent::Typing => self.typing(connection_id).await,
            ClientEvent::StopTyping => self.stop_typing(connection_id).await,
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                error!(connection = %connection_id, event = %kind, error = %e, "Dropping connection");
                self.disconnect(connection_id).await;
                Err(e)
            }
            Err(e) if e.is_surfaced() => {
                debug!(connection = %connection_id, event = %kind, error = %e, "Request rejected");
                self.broadcaster
                    .to_connection(connection_id, ServerEvent::error(e.to_string()));
                Err(e)
            }
            Err(e) => {
                debug!(connection = %connection_id, event = %kind, reason = %e, "Event dropped");
                Ok(())
            }
        }
    }

    /// Verify a token and bind the resulting identity to the connection.
    ///
    /// On success the connection receives the room catalog.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyAuthenticated` if an identity is bound, or
    /// `InvalidToken` if verification fails; the connection then stays
    /// unauthenticated and may retry.
    pub async fn authenticate(
        &self,
        connection_id: &ConnectionId,
        token: &str,
    ) -> Result<Identity, RouterError> {
        {
            let state = self.state.lock().await;
            if state.registry.get(connection_id)?.identity().is_some() {
                return Err(AuthError::AlreadyAuthenticated.into());
            }
        }

        let identity = self.verifier.verify(token).await.map_err(|e| {
            debug!(connection = %connection_id, error = %e, "Token rejected");
            AuthError::InvalidToken
        })?;

        // Re-checked under the lock: the connection may have authenticated
        // or gone away while the verifier was running.
        let identity = {
            let mut state = self.state.lock().await;
            state.registry.bind_identity(connection_id, identity)?.clone()
        };

        info!(connection = %connection_id, user = %identity.username, "Authenticated");
        self.broadcaster
            .to_connection(connection_id, ServerEvent::Rooms(self.catalog.list_rooms()));
        Ok(identity)
    }

    /// Move the connection into `room`, leaving its current room first.
    ///
    /// # Errors
    ///
    /// Returns `RoomNotFound` for rooms outside the catalog (state is
    /// unchanged), `NotAuthenticated` before authentication, or an
    /// invariant violation if registry and rosters disagree.
    pub async fn join_room(&self, connection_id: &ConnectionId, room: &str) -> Result<(), RouterError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let conn = state.registry.get(connection_id)?;
        let identity = conn
            .identity()
            .cloned()
            .ok_or(RoutingError::NotAuthenticated)?;
        if !self.catalog.contains(room) {
            return Err(RoutingError::RoomNotFound(room.to_string()).into());
        }
        let previous = conn.current_room().cloned();
        let user = identity.to_user_ref();

        if previous.as_deref() == Some(room) {
            debug!(connection = %connection_id, room = %room, "Already in room");
            let users = user_refs(&state.roster, room);
            self.broadcaster
                .to_connection(connection_id, ServerEvent::RoomUsers(users));
            return Ok(());
        }

        if let Some(old) = &previous {
            if !state.roster.leave(old, connection_id) {
                return Err(InvariantViolation::RosterMismatch {
                    connection: connection_id.clone(),
                    expected: previous.clone(),
                    actual: state.roster.rooms_of(connection_id),
                }
                .into());
            }
            self.broadcaster.to_room_except(
                &state.roster,
                old,
                connection_id,
                ServerEvent::UserLeft(user.clone()),
            );
        }

        let outcome = state.roster.join(room, connection_id, identity);
        let joined = outcome.is_new();
        let users: Vec<UserRef> = outcome
            .members()
            .iter()
            .map(|m| m.identity.to_user_ref())
            .collect();

        if !joined {
            return Err(InvariantViolation::RosterMismatch {
                connection: connection_id.clone(),
                expected: previous,
                actual: state.roster.rooms_of(connection_id),
            }
            .into());
        }

        state
            .registry
            .set_room(connection_id, Some(room.to_string()))?;

        self.broadcaster.to_room_except(
            &state.roster,
            room,
            connection_id,
            ServerEvent::UserJoined(user),
        );
        self.broadcaster
            .to_connection(connection_id, ServerEvent::RoomUsers(users));

        debug!(
            connection = %connection_id,
            room = %room,
            from = ?previous,
            members = state.roster.count(room),
            "Joined room"
        );
        Ok(())
    }

    /// Post a message to the connection's room, echoing it to the sender.
    ///
    /// Returns the message id, or `None` if the text was blank.
    ///
    /// # Errors
    ///
    /// Returns `NotInRoom` outside a room, or `MessageTooLong`.
    pub async fn send_message(
        &self,
        connection_id: &ConnectionId,
        text: &str,
    ) -> Result<Option<MessageId>, RouterError> {
        let state = self.state.lock().await;
        let (identity, room) = occupancy(&state.registry, connection_id)?;

        if text.trim().is_empty() {
            debug!(connection = %connection_id, "Ignoring blank message");
            return Ok(None);
        }

        let len = text.chars().count();
        if len > self.config.max_message_length {
            return Err(RoutingError::MessageTooLong {
                len,
                max: self.config.max_message_length,
            }
            .into());
        }

        let message = Message::new(&identity, room, text);
        let recipients = self
            .broadcaster
            .to_room(&state.roster, &message.room, message.to_event());

        debug!(
            connection = %connection_id,
            room = %message.room,
            message = message.id,
            recipients,
            "Message sent"
        );
        Ok(Some(message.id))
    }

    /// Tell the rest of the room the connection started typing.
    ///
    /// # Errors
    ///
    /// Returns `NotInRoom` outside a room.
    pub async fn typing(&self, connection_id: &ConnectionId) -> Result<(), RouterError> {
        self.presence_signal(connection_id, ServerEvent::UserTyping)
            .await
    }

    /// Tell the rest of the room the connection stopped typing.
    ///
    /// # Errors
    ///
    /// Returns `NotInRoom` outside a room.
    pub async fn stop_typing(&self, connection_id: &ConnectionId) -> Result<(), RouterError> {
        self.presence_signal(connection_id, ServerEvent::UserStoppedTyping)
            .await
    }

    async fn presence_signal(
        &self,
        connection_id: &ConnectionId,
        event: fn(UserRef) -> ServerEvent,
    ) -> Result<(), RouterError> {
        let state = self.state.lock().await;
        let (identity, room) = occupancy(&state.registry, connection_id)?;
        self.broadcaster.to_room_except(
            &state.roster,
            &room,
            connection_id,
            event(identity.to_user_ref()),
        );
        Ok(())
    }

    /// Remove a connection and tell its room it left.
    ///
    /// Safe to call repeatedly. The connection is removed from every
    /// roster that holds it, whatever the registry recorded.
    ///
    /// Returns `true` if the connection was registered.
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let removed = state.registry.remove(connection_id);
        let purged = state.roster.purge(connection_id);

        let expected = removed.as_ref().and_then(|c| c.current_room().cloned());
        let actual: Vec<RoomId> = purged.iter().map(|(room, _)| room.clone()).collect();
        if actual.len() > 1 || actual.first() != expected.as_ref() {
            warn!(
                connection = %connection_id,
                expected = ?expected,
                actual = ?actual,
                "Roster disagreed with registry on disconnect"
            );
        }

        for (room, member) in &purged {
            self.broadcaster.to_room(
                &state.roster,
                room,
                ServerEvent::UserLeft(member.identity.to_user_ref()),
            );
        }

        if removed.is_some() {
            debug!(connection = %connection_id, rooms = purged.len(), "Disconnected");
        }
        removed.is_some()
    }

    /// Identities present in a room, in join order.
    pub async fn members(&self, room: &str) -> Vec<Identity> {
        self.state.lock().await.roster.members(room)
    }

    /// Number of connections present in a room.
    pub async fn count(&self, room: &str) -> usize {
        self.state.lock().await.roster.count(room)
    }

    /// Snapshot of a connection's state.
    pub async fn connection(&self, connection_id: &ConnectionId) -> Option<Connection> {
        self.state
            .lock()
            .await
            .registry
            .get(connection_id)
            .ok()
            .cloned()
    }

    /// Get router statistics.
    pub async fn stats(&self) -> RouterStats {
        let state = self.state.lock().await;
        RouterStats {
            connection_count: state.registry.len(),
            authenticated_count: state
                .registry
                .iter()
                .filter(|c| c.identity().is_some())
                .count(),
            occupied_rooms: state.roster.occupied_rooms(),
            total_members: state.roster.total_members(),
        }
    }

    /// Check registry/roster consistency across the whole state.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub async fn audit(&self) -> Result<(), InvariantViolation> {
        let state = self.state.lock().await;

        for (room, members) in state.roster.iter() {
            let mut seen = HashSet::new();
            for member in members {
                let connection = member.connection_id.clone();
                if !seen.insert(&member.connection_id) {
                    return Err(InvariantViolation::DuplicateMember {
                        connection,
                        room: room.clone(),
                    });
                }
                match state.registry.get(&member.connection_id) {
                    Ok(conn) if conn.identity().is_none() => {
                        return Err(InvariantViolation::UnauthenticatedMember {
                            connection,
                            room: room.clone(),
                        });
                    }
                    Ok(conn) if conn.current_room() == Some(room) => {}
                    other => {
                        return Err(InvariantViolation::RosterMismatch {
                            expected: other.ok().and_then(|c| c.current_room().cloned()),
                            actual: state.roster.rooms_of(&connection),
                            connection,
                        });
                    }
                }
            }
        }

        for conn in state.registry.iter() {
            if let Some(room) = conn.current_room() {
                if !state.roster.contains(room, conn.id()) {
                    return Err(InvariantViolation::RosterMismatch {
                        connection: conn.id().clone(),
                        expected: Some(room.clone()),
                        actual: state.roster.rooms_of(conn.id()),
                    });
                }
            }
        }

        Ok(())
    }

    /// Drop all connections and rosters.
    ///
    /// Returns the connections that were live so the caller can close them.
    pub async fn shutdown(&self) -> Vec<ConnectionId> {
        let mut state = self.state.lock().await;
        state.roster.clear();
        let drained = state.registry.drain();
        info!(connections = drained.len(), "Presence router shut down");
        drained
    }
}

/// Router statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStats {
    /// Live connections.
    pub connection_count: usize,
    /// Connections with an identity bound.
    pub authenticated_count: usize,
    /// Rooms with at least one member.
    pub occupied_rooms: usize,
    /// Roster entries across all rooms.
    pub total_members: usize,
}

/// The identity and room of a connection that is in a room.
fn occupancy(
    registry: &ConnectionRegistry,
    connection_id: &ConnectionId,
) -> Result<(Identity, RoomId), RoutingError> {
    let conn = registry.get(connection_id)?;
    match (conn.identity(), conn.current_room()) {
        (Some(identity), Some(room)) => Ok((identity.clone(), room.clone())),
        _ => Err(RoutingError::NotInRoom),
    }
}

fn user_refs(roster: &RoomRoster, room: &str) -> Vec<UserRef> {
    roster
        .entries(room)
        .iter()
        .map(|m| m.identity.to_user_ref())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::identity::VerifyError;
    use crate::sink::DeliveryError;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Accepts tokens of the form `token-<name>`.
    struct NamedTokens;

    #[async_trait]
    impl TokenVerifier for NamedTokens {
        async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
            token
                .strip_prefix("token-")
                .map(|name| Identity::new(format!("id-{name}"), name))
                .ok_or_else(|| VerifyError::Invalid(token.to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: std::sync::Mutex<HashMap<ConnectionId, Vec<ServerEvent>>>,
    }

    impl EventSink for RecordingSink {
        fn deliver(
            &self,
            connection_id: &ConnectionId,
            event: Arc<ServerEvent>,
        ) -> Result<(), DeliveryError> {
            self.events
                .lock()
                .unwrap()
                .entry(connection_id.clone())
                .or_default()
                .push((*event).clone());
            Ok(())
        }
    }

    impl RecordingSink {
        fn take(&self, id: &ConnectionId) -> Vec<ServerEvent> {
            self.events.lock().unwrap().remove(id).unwrap_or_default()
        }

        fn clear(&self) {
            self.events.lock().unwrap().clear();
        }
    }

    fn setup() -> (PresenceRouter, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let router = PresenceRouter::new(
            Arc::new(StaticCatalog::default()),
            Arc::new(NamedTokens),
            sink.clone(),
        );
        (router, sink)
    }

    async fn login(router: &PresenceRouter, name: &str) -> ConnectionId {
        let id = ConnectionId::new(format!("conn-{name}"));
        router.connect(id.clone()).await.unwrap();
        router
            .authenticate(&id, &format!("token-{name}"))
            .await
            .unwrap();
        id
    }

    fn names(identities: Vec<Identity>) -> Vec<String> {
        identities.into_iter().map(|i| i.username).collect()
    }

    fn user(name: &str) -> UserRef {
        UserRef::new(name)
    }

    #[tokio::test]
    async fn test_join_order_and_disconnect() {
        let (router, sink) = setup();
        let x = login(&router, "x").await;
        let y = login(&router, "y").await;

        router.join_room(&x, "general").await.unwrap();
        router.join_room(&y, "general").await.unwrap();
        assert_eq!(names(router.members("general").await), ["x", "y"]);

        sink.clear();
        assert!(router.disconnect(&x).await);

        assert_eq!(names(router.members("general").await), ["y"]);
        assert_eq!(sink.take(&y), [ServerEvent::UserLeft(user("x"))]);
        assert!(sink.take(&x).is_empty());
        router.audit().await.unwrap();
    }

    #[tokio::test]
    async fn test_authenticate_sends_catalog() {
        let (router, sink) = setup();
        let x = login(&router, "x").await;

        let events = sink.take(&x);
        assert_eq!(events.len(), 1);
        let ServerEvent::Rooms(rooms) = &events[0] else {
            panic!("expected rooms, got {:?}", events[0]);
        };
        assert_eq!(rooms.len(), 3);
    }

    #[tokio::test]
    async fn test_join_sends_roster_and_notifies_others() {
        let (router, sink) = setup();
        let x = login(&router, "x").await;
        let y = login(&router, "y").await;
        router.join_room(&x, "general").await.unwrap();
        sink.clear();

        router.join_room(&y, "general").await.unwrap();

        assert_eq!(sink.take(&x), [ServerEvent::UserJoined(user("y"))]);
        assert_eq!(
            sink.take(&y),
            [ServerEvent::RoomUsers(vec![user("x"), user("y")])]
        );
    }

    #[tokio::test]
    async fn test_room_switch() {
        let (router, sink) = setup();
        let x = login(&router, "x").await;
        let g = login(&router, "g").await;
        let t = login(&router, "t").await;
        router.join_room(&g, "general").await.unwrap();
        router.join_room(&t, "tech").await.unwrap();
        router.join_room(&x, "general").await.unwrap();
        sink.clear();

        router.join_room(&x, "tech").await.unwrap();

        assert_eq!(names(router.members("general").await), ["g"]);
        assert_eq!(names(router.members("tech").await), ["t", "x"]);
        assert_eq!(sink.take(&g), [ServerEvent::UserLeft(user("x"))]);
        assert_eq!(sink.take(&t), [ServerEvent::UserJoined(user("x"))]);
        // Only the roster snapshot reaches the switcher
        assert_eq!(
            sink.take(&x),
            [ServerEvent::RoomUsers(vec![user("t"), user("x")])]
        );

        let conn = router.connection(&x).await.unwrap();
        assert_eq!(conn.current_room().map(String::as_str), Some("tech"));
        router.audit().await.unwrap();
    }

    #[tokio::test]
    async fn test_switch_empties_previous_room() {
        let (router, _sink) = setup();
        let x = login(&router, "x").await;

        router.join_room(&x, "general").await.unwrap();
        router.join_room(&x, "tech").await.unwrap();

        assert!(router.members("general").await.is_empty());
        assert_eq!(names(router.members("tech").await), ["x"]);
    }

    #[tokio::test]
    async fn test_unknown_room_keeps_state() {
        let (router, sink) = setup();
        let x = login(&router, "x").await;
        router.join_room(&x, "general").await.unwrap();
        sink.clear();

        let result = router
            .handle(&x, ClientEvent::join_room("nonexistent"))
            .await;

        assert_eq!(
            result,
            Err(RoutingError::RoomNotFound("nonexistent".into()).into())
        );
        assert_eq!(
            sink.take(&x),
            [ServerEvent::error("Room not found: nonexistent")]
        );
        assert_eq!(names(router.members("general").await), ["x"]);
        assert_eq!(
            router.connection(&x).await.unwrap().current_room().map(String::as_str),
            Some("general")
        );
    }

    #[tokio::test]
    async fn test_events_outside_room_are_dropped() {
        let (router, sink) = setup();
        let x = login(&router, "x").await;
        let y = login(&router, "y").await;
        router.join_room(&y, "general").await.unwrap();
        sink.clear();

        for event in [
            ClientEvent::send_message("hi"),
            ClientEvent::Typing,
            ClientEvent::StopTyping,
        ] {
            assert_eq!(router.handle(&x, event).await, Ok(()));
        }

        assert!(sink.take(&x).is_empty());
        assert!(sink.take(&y).is_empty());
        assert_eq!(router.connection(&x).await.unwrap().current_room(), None);
    }

    #[tokio::test]
    async fn test_invalid_token_then_retry() {
        let (router, sink) = setup();
        let x = ConnectionId::new("conn-x");
        router.connect(x.clone()).await.unwrap();

        let result = router.handle(&x, ClientEvent::authenticate("garbage")).await;
        assert_eq!(result, Err(AuthError::InvalidToken.into()));
        assert_eq!(sink.take(&x), [ServerEvent::error("Invalid token")]);
        assert!(router.connection(&x).await.unwrap().identity().is_none());

        router
            .handle(&x, ClientEvent::authenticate("token-x"))
            .await
            .unwrap();
        assert_eq!(
            router.connection(&x).await.unwrap().identity().unwrap().username,
            "x"
        );
    }

    #[tokio::test]
    async fn test_reauthentication_rejected() {
        let (router, sink) = setup();
        let x = login(&router, "x").await;
        sink.clear();

        let result = router.handle(&x, ClientEvent::authenticate("token-other")).await;
        assert_eq!(result, Err(AuthError::AlreadyAuthenticated.into()));
        assert_eq!(sink.take(&x), [ServerEvent::error("Already authenticated")]);
        assert_eq!(
            router.connection(&x).await.unwrap().identity().unwrap().username,
            "x"
        );
    }

    #[tokio::test]
    async fn test_unauthenticated_join_is_ignored() {
        let (router, sink) = setup();
        let x = ConnectionId::new("conn-x");
        router.connect(x.clone()).await.unwrap();

        assert_eq!(router.handle(&x, ClientEvent::join_room("general")).await, Ok(()));
        assert_eq!(router.handle(&x, ClientEvent::join_room("nonexistent")).await, Ok(()));
        assert!(matches!(
            router.join_room(&x, "nonexistent").await,
            Err(RouterError::Routing(RoutingError::NotAuthenticated))
        ));
        assert!(router.members("general").await.is_empty());
        assert!(sink.take(&x).is_empty());
        router.audit().await.unwrap();
    }

    #[tokio::test]
    async fn test_message_echoes_to_whole_room_once() {
        let (router, sink) = setup();
        let x = login(&router, "x").await;
        let y = login(&router, "y").await;
        let z = login(&router, "z").await;
        let outsider = login(&router, "o").await;
        for id in [&x, &y, &z] {
            router.join_room(id, "general").await.unwrap();
        }
        router.join_room(&outsider, "tech").await.unwrap();
        sink.clear();

        let id = router.send_message(&x, "hi").await.unwrap().unwrap();

        for member in [&x, &y, &z] {
            let events = sink.take(member);
            assert_eq!(events.len(), 1, "{member} should get exactly one event");
            let ServerEvent::NewMessage(payload) = &events[0] else {
                panic!("expected newMessage, got {:?}", events[0]);
            };
            assert_eq!(payload.id, id.to_string());
            assert_eq!(payload.username, "x");
            assert_eq!(payload.text, "hi");
            assert_eq!(payload.room, "general");
        }
        assert!(sink.take(&outsider).is_empty());
    }

    #[tokio::test]
    async fn test_blank_and_oversized_messages() {
        let (router, sink) = setup();
        let x = login(&router, "x").await;
        router.join_room(&x, "general").await.unwrap();
        sink.clear();

        assert_eq!(router.send_message(&x, "   \n").await, Ok(None));
        assert!(sink.take(&x).is_empty());

        let long = "a".repeat(2001);
        let result = router.handle(&x, ClientEvent::send_message(long)).await;
        assert!(matches!(
            result,
            Err(RouterError::Routing(RoutingError::MessageTooLong { len: 2001, max: 2000 }))
        ));
        assert_eq!(sink.take(&x).len(), 1);
    }

    #[tokio::test]
    async fn test_typing_excludes_sender() {
        let (router, sink) = setup();
        let x = login(&router, "x").await;
        let y = login(&router, "y").await;
        router.join_room(&x, "general").await.unwrap();
        router.join_room(&y, "general").await.unwrap();
        sink.clear();

        router.handle(&x, ClientEvent::Typing).await.unwrap();
        router.handle(&x, ClientEvent::StopTyping).await.unwrap();

        assert!(sink.take(&x).is_empty());
        assert_eq!(
            sink.take(&y),
            [
                ServerEvent::UserTyping(user("x")),
                ServerEvent::UserStoppedTyping(user("x")),
            ]
        );
    }

    #[tokio::test]
    async fn test_rejoining_current_room_is_quiet() {
        let (router, sink) = setup();
        let x = login(&router, "x").await;
        let y = login(&router, "y").await;
        router.join_room(&x, "general").await.unwrap();
        router.join_room(&y, "general").await.unwrap();
        sink.clear();

        router.join_room(&x, "general").await.unwrap();

        assert!(sink.take(&y).is_empty());
        assert_eq!(
            sink.take(&x),
            [ServerEvent::RoomUsers(vec![user("x"), user("y")])]
        );
        assert_eq!(router.count("general").await, 2);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (router, sink) = setup();
        let x = login(&router, "x").await;
        let y = login(&router, "y").await;
        router.join_room(&x, "general").await.unwrap();
        router.join_room(&y, "general").await.unwrap();
        sink.clear();

        assert!(router.disconnect(&x).await);
        assert!(!router.disconnect(&x).await);

        assert_eq!(sink.take(&y), [ServerEvent::UserLeft(user("x"))]);
        assert_eq!(names(router.members("general").await), ["y"]);
        router.audit().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_connect_is_invariant_violation() {
        let (router, _sink) = setup();
        let x = ConnectionId::new("conn-x");
        router.connect(x.clone()).await.unwrap();

        assert!(matches!(
            router.connect(x).await,
            Err(RouterError::Invariant(InvariantViolation::DuplicateConnection(_)))
        ));
    }

    #[tokio::test]
    async fn test_corrupted_roster_forces_disconnect() {
        let (router, sink) = setup();
        let x = login(&router, "x").await;
        let y = login(&router, "y").await;
        router.join_room(&x, "general").await.unwrap();
        router.join_room(&y, "general").await.unwrap();

        // Drop x from the roster behind the registry's back
        router.state.lock().await.roster.leave("general", &x);
        assert!(router.audit().await.is_err());
        sink.clear();

        let result = router.handle(&x, ClientEvent::join_room("tech")).await;

        assert!(matches!(result, Err(RouterError::Invariant(_))));
        assert!(router.connection(&x).await.is_none());
        assert!(sink.take(&x).is_empty());
        router.audit().await.unwrap();
    }

    #[tokio::test]
    async fn test_stats_and_shutdown() {
        let (router, _sink) = setup();
        let x = login(&router, "x").await;
        login(&router, "y").await;
        router.connect(ConnectionId::new("anon")).await.unwrap();
        router.join_room(&x, "general").await.unwrap();

        assert_eq!(
            router.stats().await,
            RouterStats {
                connection_count: 3,
                authenticated_count: 2,
                occupied_rooms: 1,
                total_members: 1,
            }
        );

        let mut drained = router.shutdown().await;
        drained.sort();
        assert_eq!(drained.len(), 3);
        assert_eq!(router.stats().await.connection_count, 0);
        assert!(router.members("general").await.is_empty());

        // Late disconnects from closing sessions are harmless
        assert!(!router.disconnect(&x).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_switching_keeps_single_room() {
        let (router, _sink) = setup();
        let router = Arc::new(router);
        let rooms = ["general", "tech", "random"];

        let mut handles = Vec::new();
        for n in 0..16 {
            let router = Arc::clone(&router);
            handles.push(tokio::spawn(async move {
                let id = login(&router, &format!("user{n}")).await;
                for step in 0..30 {
                    let room = rooms[(n + step) % rooms.len()];
                    router.join_room(&id, room).await.unwrap();
                    router.typing(&id).await.unwrap();
                    if step % 7 == 0 {
                        router.send_message(&id, "ping").await.unwrap();
                    }
                }
                if n % 2 == 0 {
                    router.disconnect(&id).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        router.audit().await.unwrap();
        let stats = router.stats().await;
        assert_eq!(stats.connection_count, 8);
        assert_eq!(stats.total_members, 8);
    }
}
