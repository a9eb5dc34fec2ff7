//! Connection handlers for the Lobby server.
//!
//! This module handles the HTTP routes, the connection lifecycle and the
//! per-connection session loop.

use crate::auth::JwtVerifier;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use lobby_core::{
    ConnectionId, PresenceRouter, RoomCatalog, RouterConfig, StaticCatalog, TokenVerifier,
};
use lobby_protocol::{ServerEvent, UserRef};
use lobby_transport::{Connection, ConnectionHub, WebSocketConnection};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The presence router.
    pub router: PresenceRouter,
    /// Outbound queues of live sessions.
    pub hub: Arc<ConnectionHub>,
    /// Server configuration.
    pub config: Config,
    active: Arc<AtomicUsize>,
}

impl AppState {
    /// Create app state around the given collaborators.
    #[must_use]
    pub fn new(
        config: Config,
        catalog: Arc<dyn RoomCatalog>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        let hub = Arc::new(ConnectionHub::new());
        let router_config = RouterConfig {
            max_message_length: config.limits.max_message_length,
        };

        Self {
            router: PresenceRouter::with_config(catalog, verifier, hub.clone(), router_config),
            hub,
            config,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build app state from configuration alone.
    ///
    /// # Errors
    ///
    /// Returns an error if no JWT secret is configured or the room
    /// catalog file cannot be loaded.
    pub fn from_config(config: Config) -> Result<Self> {
        let catalog = match &config.rooms.catalog_path {
            Some(path) => StaticCatalog::from_json_file(path)
                .with_context(|| format!("Failed to load room catalog: {}", path.display()))?,
            None => StaticCatalog::default(),
        };
        info!("Room catalog has {} rooms", catalog.len());

        let secret = config
            .auth
            .jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .context("auth.jwt_secret is not set (LOBBY_AUTH__JWT_SECRET)")?;
        let verifier = JwtVerifier::new(secret);

        Ok(Self::new(config, Arc::new(catalog), Arc::new(verifier)))
    }

    /// Claim a session slot, or `None` at the connection limit.
    pub fn try_acquire(&self) -> Option<SessionSlot> {
        let previous = self.active.fetch_add(1, Ordering::SeqCst);
        if previous >= self.config.limits.max_connections {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(SessionSlot(Arc::clone(&self.active)))
    }

    /// Number of sessions holding a slot.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Drop all presence state and close every session's queue.
    pub async fn shutdown(&self) {
        let connections = self.router.shutdown().await;
        let closed = self.hub.close_all();
        info!(
            connections = connections.len(),
            queues = closed,
            active = self.active_sessions(),
            "Sessions released"
        );
    }
}

/// A claimed connection slot, released on drop.
pub struct SessionSlot(Arc<AtomicUsize>);

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/rooms", get(rooms_handler))
        .route("/api/rooms/:id/users", get(room_users_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::from_config(config)?);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Lobby server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    serve(listener, state, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let shutdown_state = Arc::clone(&state);
    let shutdown = async move {
        shutdown.await;
        shutdown_state.shutdown().await;
    };

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("Server error")?;

    info!("Lobby server stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received SIGINT, shutting down..."),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        },
        () = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Room catalog handler.
async fn rooms_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.router.catalog().list_rooms())
}

/// Current occupants of a room.
async fn room_users_handler(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
) -> Response {
    if !state.router.catalog().contains(&room) {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("Room not found: {room}") })),
        )
            .into_response();
    }

    let users: Vec<UserRef> = state
        .router
        .members(&room)
        .await
        .iter()
        .map(|identity| identity.to_user_ref())
        .collect();
    Json(users).into_response()
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(slot) = state.try_acquire() else {
        warn!(remote = %addr, "Connection limit reached, refusing upgrade");
        metrics::record_rejection();
        return (StatusCode::SERVICE_UNAVAILABLE, "Server at capacity").into_response();
    };

    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            let id = ConnectionId::new(uuid::Uuid::new_v4().to_string());
            let conn = WebSocketConnection::new(socket, id, Some(addr), max_message_size);
            serve_connection(conn, state).await;
        })
}

/// Run one session to completion.
///
/// Inbound events are handed to the router one at a time; deliveries
/// queued in the hub are written out between them. Whatever ends the
/// session, the connection is disconnected from the router and detached
/// from the hub before returning.
pub async fn serve_connection<C: Connection>(mut conn: C, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();
    let id = conn.id().clone();

    if let Err(e) = state.router.connect(id.clone()).await {
        error!(connection = %id, error = %e, "Failed to register connection");
        metrics::record_router_error(&e);
        if let Err(e) = conn.close().await {
            debug!(connection = %id, error = %e, "Close failed");
        }
        return;
    }
    let mut outbox = state.hub.attach(id.clone());

    debug!(connection = %id, remote = ?conn.remote_addr(), "Session started");

    let connected = ServerEvent::connected(id.as_str());
    if conn.send(&connected).await.is_ok() {
        metrics::record_outbound(connected.kind());
        run_session(&mut conn, &mut outbox, &state).await;
    } else {
        warn!(connection = %id, "Failed to send connected event");
    }

    // Cleanup
    state.router.disconnect(&id).await;
    state.hub.detach(&id);
    if let Err(e) = conn.close().await {
        debug!(connection = %id, error = %e, "Close failed");
    }
    metrics::record_room_stats(&state.router.stats().await);

    debug!(connection = %id, "Session ended");
}

async fn run_session<C: Connection>(
    conn: &mut C,
    outbox: &mut lobby_transport::Outbox,
    state: &AppState,
) {
    let id = conn.id().clone();
    let mut heartbeat = heartbeat_timer(state.config.heartbeat.interval_ms);

    loop {
        tokio::select! {
            biased;

            delivery = outbox.recv() => {
                let Some(event) = delivery else {
                    debug!(connection = %id, "Outbound queue closed");
                    break;
                };
                if let Err(e) = conn.send(&event).await {
                    debug!(connection = %id, error = %e, "Send failed");
                    break;
                }
                metrics::record_outbound(event.kind());
            }

            inbound = conn.recv() => {
                match inbound {
                    Ok(Some(event)) => {
                        let kind = event.kind();
                        let start = Instant::now();
                        let result = state.router.handle(&id, event).await;
                        metrics::record_inbound(kind, start.elapsed().as_secs_f64());

                        match result {
                            Err(e) if e.is_fatal() => {
                                metrics::record_router_error(&e);
                                break;
                            }
                            Err(e) => metrics::record_router_error(&e),
                            Ok(()) => {}
                        }
                        if kind == lobby_protocol::EventKind::JoinRoom {
                            metrics::record_room_stats(&state.router.stats().await);
                        }
                    }
                    Ok(None) => {
                        debug!(connection = %id, "Client closed connection");
                        break;
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(connection = %id, error = %e, "Discarding undecodable message");
                        metrics::record_error("protocol");
                    }
                    Err(e) => {
                        debug!(connection = %id, error = %e, "Receive failed");
                        metrics::record_error("transport");
                        break;
                    }
                }
            }

            () = tick(&mut heartbeat) => {
                if let Err(e) = conn.ping().await {
                    debug!(connection = %id, error = %e, "Heartbeat failed");
                    break;
                }
            }
        }
    }
}

fn heartbeat_timer(interval_ms: u64) -> Option<Interval> {
    if interval_ms == 0 {
        return None;
    }
    let period = Duration::from_millis(interval_ms);
    let mut timer = interval_at(tokio::time::Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(timer)
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
