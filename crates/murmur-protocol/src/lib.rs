//! # murmur-protocol
//!
//! Wire protocol definitions for the Murmur chat relay.
//!
//! This crate defines the events exchanged between chat clients and the
//! relay, together with the JSON and MessagePack codecs that carry them.
//!
//! ## Events
//!
//! - `register` - Bind a connection to a user identity
//! - `sendMessage` / `getMessage` - Point-to-point chat messages
//! - `typing` / `stopTyping` - Typing indicators
//! - `messageRead` / `getReadStatus` - Read receipts
//! - `getUsers` / `userConnected` / `userDisconnected` - Presence
//!
//! ## Example
//!
//! ```rust
//! use murmur_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::send_message("u1", "u2", "c1", "hi");
//!
//! let text = codec::encode_json(&event).unwrap();
//! let decoded: ClientEvent = codec::decode_json(&text).unwrap();
//! assert_eq!(decoded, event);
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, ProtocolError, WireFormat};
pub use events::{ClientEvent, ServerEvent};

/// Protocol version advertised in the `connected` event.
pub const PROTOCOL_VERSION: u8 = 1;
