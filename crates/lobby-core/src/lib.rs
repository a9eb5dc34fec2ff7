//! # lobby-core
//!
//! Presence and room routing for the Lobby chat server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Identity** - Verified users and the token verifier seam
//! - **Catalog** - The fixed set of joinable rooms
//! - **Registry** - Per-connection session state
//! - **Roster** - Live membership of each room
//! - **Router** - Applies connection events and fans out notifications
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Router    │────▶│  Broadcast  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                       │         │
//!                       ▼         ▼
//!               ┌──────────┐ ┌──────────┐
//!               │ Registry │ │  Roster  │
//!               └──────────┘ └──────────┘
//! ```

pub mod catalog;
pub mod error;
pub mod identity;
pub mod message;
pub mod registry;
pub mod roster;
pub mod router;
pub mod sink;

pub use catalog::{CatalogError, RoomCatalog, RoomId, StaticCatalog};
pub use error::{AuthError, InvariantViolation, RouterError, RoutingError};
pub use identity::{Identity, TokenVerifier, VerifyError};
pub use message::{Message, MessageId};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, SessionState};
pub use roster::{Member, RoomRoster};
pub use router::{PresenceRouter, RouterConfig, RouterStats};
pub use sink::{Broadcaster, DeliveryError, EventSink};
