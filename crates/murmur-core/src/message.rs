//! Chat message payloads, relay-assigned ids, and the relay clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Atomic counter for ensuring unique IDs even within the same millisecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Generate a message id for messages sent without one.
#[must_use]
pub fn generate_message_id() -> String {
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("msg_{:x}_{:x}", now_millis(), counter)
}

/// Body of a chat message on its way to a recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePayload {
    /// Message text.
    pub text: String,
    /// Conversation the message belongs to.
    pub chat_id: String,
    /// Client-supplied id, if any.
    pub message_id: Option<String>,
}

impl MessagePayload {
    /// Create a payload without a message id.
    #[must_use]
    pub fn new(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            chat_id: chat_id.into(),
            message_id: None,
        }
    }

    /// Attach a client-supplied message id.
    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_message_ids() {
        let id1 = generate_message_id();
        let id2 = generate_message_id();
        assert_ne!(id1, id2);
        assert!(id1.starts_with("msg_"));
    }

    #[test]
    fn test_payload_builder() {
        let payload = MessagePayload::new("c1", "hi").with_message_id("m1");
        assert_eq!(payload.chat_id, "c1");
        assert_eq!(payload.message_id.as_deref(), Some("m1"));
    }
}
