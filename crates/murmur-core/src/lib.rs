//! # murmur-core
//!
//! Connection registry, event routing, and presence for the Murmur chat relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ConnectionRegistry** - Maps user identities to their live connection
//! - **EventRouter** - Point-to-point delivery of messages, typing, and receipts
//! - **PresenceBroadcaster** - Announces who is online to every connection
//! - **Relay** - The single event loop that owns all of the above
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│    Relay    │────▶│   Router    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   ▼
//!        │            ┌─────────────┐     ┌─────────────┐
//!        └────────────│  Presence   │     │  Registry   │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod connection;
pub mod error;
pub mod message;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod router;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionState, Outbound};
pub use error::RelayError;
pub use message::MessagePayload;
pub use presence::{PresenceBroadcaster, PresenceMode};
pub use registry::{ConnectionRegistry, Registration};
pub use relay::{Relay, RelayCommand, RelayConfig, RelayHandle, RelayStats};
pub use router::{EventRouter, RouteOutcome, RouterConfig};
