//! # lobby-protocol
//!
//! Wire protocol definitions for the Lobby chat presence engine.
//!
//! This crate defines the events exchanged between Lobby clients and
//! servers, their encodings, and protocol versioning.
//!
//! ## Events
//!
//! - `authenticate` / `joinRoom` / `sendMessage` / `typing` / `stopTyping` - Client requests
//! - `rooms` / `roomUsers` - Catalog and roster snapshots
//! - `newMessage` - Room content, echoed to the sender
//! - `userJoined` / `userLeft` / `userTyping` / `userStoppedTyping` - Presence signals
//! - `error` - Failed requests
//!
//! ## Example
//!
//! ```rust
//! use lobby_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::join_room("general");
//!
//! let text = codec::encode_text(&event).unwrap();
//! let decoded: ClientEvent = codec::decode_text(&text).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;
pub mod version;

pub use codec::{decode, decode_text, encode, encode_text, Encoding, ProtocolError};
pub use events::{ClientEvent, EventKind, MessagePayload, Room, ServerEvent, UserRef};
pub use version::{Version, PROTOCOL_VERSION};
