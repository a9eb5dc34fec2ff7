//! Metrics collection and export for Lobby.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use lobby_core::{RouterError, RouterStats};
use lobby_protocol::EventKind;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "lobby_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "lobby_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "lobby_connections_rejected_total";
    pub const EVENTS_INBOUND: &str = "lobby_events_inbound_total";
    pub const EVENTS_OUTBOUND: &str = "lobby_events_outbound_total";
    pub const ROOMS_OCCUPIED: &str = "lobby_rooms_occupied";
    pub const ROOM_MEMBERS: &str = "lobby_room_members";
    pub const LATENCY_SECONDS: &str = "lobby_event_latency_seconds";
    pub const ERRORS_TOTAL: &str = "lobby_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Upgrades refused because the connection limit was reached"
    );
    metrics::describe_counter!(names::EVENTS_INBOUND, "Client events handled, by kind");
    metrics::describe_counter!(names::EVENTS_OUTBOUND, "Server events written, by kind");
    metrics::describe_gauge!(names::ROOMS_OCCUPIED, "Rooms with at least one member");
    metrics::describe_gauge!(names::ROOM_MEMBERS, "Room memberships across all rooms");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Client event handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors, by type");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an upgrade refused at the connection limit.
pub fn record_rejection() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Record a handled client event and how long it took.
pub fn record_inbound(kind: EventKind, seconds: f64) {
    counter!(names::EVENTS_INBOUND, "kind" => kind.as_str()).increment(1);
    histogram!(names::LATENCY_SECONDS, "kind" => kind.as_str()).record(seconds);
}

/// Record a server event written to a socket.
pub fn record_outbound(kind: EventKind) {
    counter!(names::EVENTS_OUTBOUND, "kind" => kind.as_str()).increment(1);
}

/// Update room gauges from router statistics.
pub fn record_room_stats(stats: &RouterStats) {
    gauge!(names::ROOMS_OCCUPIED).set(stats.occupied_rooms as f64);
    gauge!(names::ROOM_MEMBERS).set(stats.total_members as f64);
}

/// Record a router error.
pub fn record_router_error(error: &RouterError) {
    record_error(error.label());
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobby_core::RoutingError;

    #[test]
    fn test_metrics_guard() {
        // No recorder installed; just exercise the calls
        let _guard = ConnectionMetricsGuard::new();
        record_inbound(EventKind::JoinRoom, 0.001);
        record_outbound(EventKind::RoomUsers);
        record_router_error(&RoutingError::NotInRoom.into());
    }
}
