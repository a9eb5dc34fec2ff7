//! Shared fixtures for the Lobby benchmarks.

use async_trait::async_trait;
use lobby_core::{
    ConnectionId, DeliveryError, EventSink, Identity, PresenceRouter, StaticCatalog,
    TokenVerifier, VerifyError,
};
use lobby_protocol::ServerEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counts deliveries and drops them.
#[derive(Debug, Default)]
pub struct CountingSink {
    delivered: AtomicU64,
}

impl CountingSink {
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl EventSink for CountingSink {
    fn deliver(
        &self,
        _connection_id: &ConnectionId,
        _event: Arc<ServerEvent>,
    ) -> Result<(), DeliveryError> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Treats every token as the username.
pub struct TrustingVerifier;

#[async_trait]
impl TokenVerifier for TrustingVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        Ok(Identity::new(token, token))
    }
}

/// A router over the built-in rooms delivering into `sink`.
#[must_use]
pub fn router_with(sink: Arc<dyn EventSink>) -> PresenceRouter {
    PresenceRouter::new(
        Arc::new(StaticCatalog::default()),
        Arc::new(TrustingVerifier),
        sink,
    )
}

/// Connect, authenticate and seat `count` users in `room`.
///
/// Returns their connection ids in join order.
pub async fn seat_users(router: &PresenceRouter, room: &str, count: usize) -> Vec<ConnectionId> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let id = ConnectionId::new(format!("{room}-conn-{i}"));
        let name = format!("{room}-user-{i}");
        if router.connect(id.clone()).await.is_err()
            || router.authenticate(&id, &name).await.is_err()
            || router.join_room(&id, room).await.is_err()
        {
            continue;
        }
        ids.push(id);
    }
    ids
}
