//! Point-to-point event routing.
//!
//! The router resolves the recipient of each domain event through the
//! registry and pushes the outbound event onto that connection's queue. A
//! recipient that is not connected is a routing miss: the event is dropped
//! and the sender is not told.

use crate::error::{validate_identifier, RelayError};
use crate::message::{generate_message_id, now_millis, MessagePayload};
use crate::registry::ConnectionRegistry;
use murmur_protocol::{ClientEvent, ServerEvent};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Reject events whose sender differs from the connection's identity.
    #[serde(default = "default_true")]
    pub strict_sender: bool,
    /// Send a read receipt back to the sender as soon as a message is delivered.
    #[serde(default)]
    pub read_on_delivery: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strict_sender: true,
            read_on_delivery: false,
        }
    }
}

/// What happened to a routed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued on the recipient's connection.
    Delivered,
    /// Recipient not connected; nothing was sent.
    Dropped,
}

/// Routes domain events over a borrowed registry.
pub struct EventRouter<'r> {
    registry: &'r ConnectionRegistry,
    config: &'r RouterConfig,
}

impl<'r> EventRouter<'r> {
    /// Create a router over `registry`.
    #[must_use]
    pub fn new(registry: &'r ConnectionRegistry, config: &'r RouterConfig) -> Self {
        Self { registry, config }
    }

    /// Validate and route an inbound event from the connection registered as
    /// `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid identifiers, a spoofed sender, or events
    /// that are not routed here (`register`, `ping`).
    pub fn dispatch(&self, origin: &str, event: ClientEvent) -> Result<RouteOutcome, RelayError> {
        match event {
            ClientEvent::SendMessage {
                sender_id,
                recipient_id,
                text,
                chat_id,
                message_id,
            } => {
                self.check_sender(origin, &sender_id)?;
                validate_identifier("recipientId", &recipient_id)?;
                validate_identifier("chatId", &chat_id)?;
                if let Some(id) = &message_id {
                    validate_identifier("messageId", id)?;
                }
                let payload = MessagePayload {
                    text,
                    chat_id,
                    message_id,
                };
                Ok(self.route_message(&sender_id, &recipient_id, payload))
            }

            ClientEvent::Typing {
                sender_id,
                recipient_id,
                chat_id,
                text,
            } => {
                self.check_sender(origin, &sender_id)?;
                validate_identifier("recipientId", &recipient_id)?;
                validate_identifier("chatId", &chat_id)?;
                Ok(self.route_typing(&sender_id, &recipient_id, &chat_id, &text))
            }

            ClientEvent::StopTyping {
                sender_id,
                recipient_id,
                chat_id,
            } => {
                self.check_sender(origin, &sender_id)?;
                validate_identifier("recipientId", &recipient_id)?;
                validate_identifier("chatId", &chat_id)?;
                Ok(self.route_stop_typing(&sender_id, &recipient_id, &chat_id))
            }

            ClientEvent::MessageRead {
                message_id,
                chat_id,
                reader_id,
                sender_id,
            } => {
                self.check_sender(origin, &reader_id)?;
                validate_identifier("senderId", &sender_id)?;
                validate_identifier("chatId", &chat_id)?;
                if let Some(id) = &message_id {
                    validate_identifier("messageId", id)?;
                }
                Ok(self.route_read_receipt(message_id.as_deref(), &chat_id, &reader_id, &sender_id))
            }

            ClientEvent::GetReadStatus { chat_id, peer_id } => {
                validate_identifier("chatId", &chat_id)?;
                let peer_id = peer_id.ok_or(RelayError::InvalidField {
                    field: "peerId",
                    reason: "required, read status is not broadcast",
                })?;
                validate_identifier("peerId", &peer_id)?;
                Ok(self.route_read_receipt(None, &chat_id, origin, &peer_id))
            }

            ClientEvent::Register { .. } => Err(RelayError::UnexpectedEvent("register")),
            ClientEvent::Ping { .. } => Err(RelayError::UnexpectedEvent("ping")),
        }
    }

    /// Deliver a chat message to `recipient_id`.
    ///
    /// The relay stamps the message at forward time and fills in a message
    /// id when the client sent none.
    pub fn route_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        payload: MessagePayload,
    ) -> RouteOutcome {
        let MessagePayload {
            text,
            chat_id,
            message_id,
        } = payload;
        let message_id = message_id.unwrap_or_else(generate_message_id);

        let outcome = self.forward(
            recipient_id,
            ServerEvent::GetMessage {
                sender_id: sender_id.to_string(),
                text,
                chat_id: chat_id.clone(),
                message_id: message_id.clone(),
                timestamp: now_millis(),
            },
        );

        if outcome == RouteOutcome::Delivered && self.config.read_on_delivery {
            self.route_read_receipt(Some(&message_id), &chat_id, recipient_id, sender_id);
        }

        outcome
    }

    /// Tell `recipient_id` that `sender_id` is typing `text` in `chat_id`.
    pub fn route_typing(
        &self,
        sender_id: &str,
        recipient_id: &str,
        chat_id: &str,
        text: &str,
    ) -> RouteOutcome {
        self.forward(
            recipient_id,
            ServerEvent::UserTyping {
                sender_id: sender_id.to_string(),
                chat_id: chat_id.to_string(),
                text: text.to_string(),
            },
        )
    }

    /// Clear the typing indicator of `sender_id` at `recipient_id`.
    pub fn route_stop_typing(&self, sender_id: &str, recipient_id: &str, chat_id: &str) -> RouteOutcome {
        self.forward(
            recipient_id,
            ServerEvent::UserStopTyping {
                sender_id: sender_id.to_string(),
                chat_id: chat_id.to_string(),
            },
        )
    }

    /// Tell `sender_id` that `reader_id` has read their message.
    ///
    /// Without a `message_id` the receipt covers the whole chat up to now.
    pub fn route_read_receipt(
        &self,
        message_id: Option<&str>,
        chat_id: &str,
        reader_id: &str,
        sender_id: &str,
    ) -> RouteOutcome {
        self.forward(
            sender_id,
            ServerEvent::MessageRead {
                message_id: message_id.map(str::to_string),
                chat_id: chat_id.to_string(),
                reader_id: reader_id.to_string(),
                timestamp: now_millis(),
            },
        )
    }

    fn forward(&self, recipient_id: &str, event: ServerEvent) -> RouteOutcome {
        let name = event.name();

        match self.registry.lookup(recipient_id) {
            Some(handle) => {
                if handle.deliver(event) {
                    trace!(event = name, recipient = %recipient_id, connection = %handle.id(), "Forwarded");
                    RouteOutcome::Delivered
                } else {
                    trace!(event = name, recipient = %recipient_id, connection = %handle.id(), "Recipient closing, dropped");
                    RouteOutcome::Dropped
                }
            }
            None => {
                trace!(event = name, recipient = %recipient_id, "Recipient offline, dropped");
                RouteOutcome::Dropped
            }
        }
    }

    fn check_sender(&self, origin: &str, claimed: &str) -> Result<(), RelayError> {
        validate_identifier("senderId", claimed)?;
        if self.config.strict_sender && origin != claimed {
            return Err(RelayError::SenderMismatch {
                registered: origin.to_string(),
                claimed: claimed.to_string(),
            });
        }
        Ok(())
    }
}
