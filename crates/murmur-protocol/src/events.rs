//! Event types for the Murmur protocol.
//!
//! Every event is a JSON-compatible object tagged by its `event` field. The
//! same shapes travel as JSON text frames or as MessagePack binary frames.

use serde::{Deserialize, Serialize};

/// An event sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientEvent {
    /// Announce the identity behind this connection.
    #[serde(rename = "register", alias = "addUser", rename_all = "camelCase")]
    Register {
        /// Application-level user identity.
        user_id: String,
    },

    /// Deliver a chat message to another user.
    #[serde(rename = "sendMessage", rename_all = "camelCase")]
    SendMessage {
        sender_id: String,
        #[serde(alias = "receiverId")]
        recipient_id: String,
        text: String,
        chat_id: String,
        /// Client-chosen message id; the relay assigns one when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    /// The sender is composing in a chat.
    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        sender_id: String,
        #[serde(alias = "receiverId")]
        recipient_id: String,
        chat_id: String,
        /// Draft text, forwarded as-is.
        text: String,
    },

    /// The sender stopped composing in a chat.
    #[serde(rename = "stopTyping", alias = "stop-typing", rename_all = "camelCase")]
    StopTyping {
        sender_id: String,
        #[serde(alias = "receiverId")]
        recipient_id: String,
        chat_id: String,
    },

    /// The reader has seen a message sent by `sender_id`.
    ///
    /// Without a `message_id` the receipt covers every earlier message in
    /// the chat.
    #[serde(rename = "messageRead", rename_all = "camelCase")]
    MessageRead {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        chat_id: String,
        reader_id: String,
        sender_id: String,
    },

    /// Mark a whole chat as read on behalf of this connection's user.
    #[serde(rename = "getReadStatus", rename_all = "camelCase")]
    GetReadStatus {
        chat_id: String,
        /// The other participant, who receives the receipt. Older clients
        /// omit it; the relay rejects those requests.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<String>,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Register { .. } => "register",
            ClientEvent::SendMessage { .. } => "sendMessage",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::StopTyping { .. } => "stopTyping",
            ClientEvent::MessageRead { .. } => "messageRead",
            ClientEvent::GetReadStatus { .. } => "getReadStatus",
            ClientEvent::Ping { .. } => "ping",
        }
    }

    /// Create a Register event.
    #[must_use]
    pub fn register(user_id: impl Into<String>) -> Self {
        ClientEvent::Register {
            user_id: user_id.into(),
        }
    }

    /// Create a SendMessage event without a message id.
    #[must_use]
    pub fn send_message(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        chat_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        ClientEvent::SendMessage {
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            text: text.into(),
            chat_id: chat_id.into(),
            message_id: None,
        }
    }

    /// Create a Typing event.
    #[must_use]
    pub fn typing(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        chat_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        ClientEvent::Typing {
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            chat_id: chat_id.into(),
            text: text.into(),
        }
    }

    /// Create a StopTyping event.
    #[must_use]
    pub fn stop_typing(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        ClientEvent::StopTyping {
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Create a MessageRead event.
    #[must_use]
    pub fn message_read(
        message_id: Option<String>,
        chat_id: impl Into<String>,
        reader_id: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> Self {
        ClientEvent::MessageRead {
            message_id,
            chat_id: chat_id.into(),
            reader_id: reader_id.into(),
            sender_id: sender_id.into(),
        }
    }
}

/// An event sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// Sent once right after the WebSocket opens.
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected {
        connection_id: String,
        /// Protocol version spoken by the relay.
        version: u8,
        /// Recommended ping interval in milliseconds.
        heartbeat: u32,
    },

    /// Full set of registered users.
    #[serde(rename = "getUsers")]
    GetUsers { users: Vec<String> },

    /// A user registered a connection.
    #[serde(rename = "userConnected", rename_all = "camelCase")]
    UserConnected { user_id: String, timestamp: u64 },

    /// A user's connection went away.
    #[serde(rename = "userDisconnected", rename_all = "camelCase")]
    UserDisconnected { user_id: String, timestamp: u64 },

    /// A chat message delivered by the relay.
    #[serde(rename = "getMessage", rename_all = "camelCase")]
    GetMessage {
        sender_id: String,
        text: String,
        chat_id: String,
        message_id: String,
        /// Relay clock at forward time; the authoritative ordering signal.
        timestamp: u64,
    },

    /// The peer is typing.
    #[serde(rename = "userTyping", rename_all = "camelCase")]
    UserTyping {
        sender_id: String,
        chat_id: String,
        text: String,
    },

    /// The peer stopped typing.
    #[serde(rename = "userStopTyping", rename_all = "camelCase")]
    UserStopTyping { sender_id: String, chat_id: String },

    /// Read receipt for a message, or for the whole chat when `message_id`
    /// is absent.
    #[serde(rename = "messageRead", rename_all = "camelCase")]
    MessageRead {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        chat_id: String,
        reader_id: String,
        timestamp: u64,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::GetUsers { .. } => "getUsers",
            ServerEvent::UserConnected { .. } => "userConnected",
            ServerEvent::UserDisconnected { .. } => "userDisconnected",
            ServerEvent::GetMessage { .. } => "getMessage",
            ServerEvent::UserTyping { .. } => "userTyping",
            ServerEvent::UserStopTyping { .. } => "userStopTyping",
            ServerEvent::MessageRead { .. } => "messageRead",
            ServerEvent::Pong { .. } => "pong",
        }
    }

    /// Create a Connected event.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        ServerEvent::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }

    /// Create a GetUsers event.
    #[must_use]
    pub fn users(users: Vec<String>) -> Self {
        ServerEvent::GetUsers { users }
    }

    /// Create a Pong event.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        ServerEvent::Pong { timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_wire_names() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "sendMessage",
            "senderId": "u1",
            "recipientId": "u2",
            "text": "hi",
            "chatId": "c1"
        }))
        .unwrap();

        assert_eq!(event, ClientEvent::send_message("u1", "u2", "c1", "hi"));
        assert_eq!(event.name(), "sendMessage");
    }

    #[test]
    fn test_get_read_status_without_peer_decodes() {
        let event: ClientEvent =
            serde_json::from_value(json!({"event": "getReadStatus", "chatId": "c1"})).unwrap();
        assert_eq!(
            event,
            ClientEvent::GetReadStatus {
                chat_id: "c1".into(),
                peer_id: None,
            }
        );
    }

    #[test]
    fn test_legacy_aliases() {
        let register: ClientEvent =
            serde_json::from_value(json!({"event": "addUser", "userId": "u1"})).unwrap();
        assert_eq!(register, ClientEvent::register("u1"));

        let stop: ClientEvent = serde_json::from_value(json!({
            "event": "stop-typing",
            "senderId": "u1",
            "receiverId": "u2",
            "chatId": "c1"
        }))
        .unwrap();
        assert_eq!(stop, ClientEvent::stop_typing("u1", "u2", "c1"));
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let result: Result<ClientEvent, _> = serde_json::from_value(json!({
            "event": "typing",
            "senderId": "u1",
            "chatId": "c1",
            "text": "h"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result: Result<ClientEvent, _> =
            serde_json::from_value(json!({"event": "joinRoom", "room": "r"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_bulk_receipt_omits_message_id() {
        let receipt = ServerEvent::MessageRead {
            message_id: None,
            chat_id: "c1".into(),
            reader_id: "u2".into(),
            timestamp: 7,
        };
        let value = serde_json::to_value(&receipt).unwrap();
        assert_eq!(
            value,
            json!({"event": "messageRead", "chatId": "c1", "readerId": "u2", "timestamp": 7})
        );
    }

    #[test]
    fn test_get_users_shape() {
        let value = serde_json::to_value(ServerEvent::users(vec!["a".into(), "b".into()])).unwrap();
        assert_eq!(value, json!({"event": "getUsers", "users": ["a", "b"]}));
    }
}
