//! # lobby-transport
//!
//! Transport abstraction layer for the Lobby chat server.
//!
//! - **WebSocket** - axum upgrade adapter, JSON text or MessagePack binary
//! - **Memory** - In-process channel pair for tests and benchmarks
//! - **Hub** - Per-connection outbound queues the router delivers into
//!
//! ## Transport Abstraction
//!
//! All transports implement the [`Connection`] trait, allowing the
//! session loop to be protocol-agnostic.
//!
//! ```rust,ignore
//! use lobby_transport::Connection;
//!
//! async fn handle_connection(mut conn: impl Connection) {
//!     while let Ok(Some(event)) = conn.recv().await {
//!         // Process event
//!     }
//! }
//! ```

pub mod hub;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use hub::{ConnectionHub, Outbox};
pub use memory::{MemoryClient, MemoryConnection};
pub use traits::{Connection, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
