//! Relay errors.
//!
//! None of these are fatal: the relay drops the offending event, logs it,
//! and keeps serving every other connection.

use crate::connection::ConnectionId;
use thiserror::Error;

/// Maximum length of a user, chat, or message identifier.
pub const MAX_IDENTIFIER_LENGTH: usize = 256;

/// Relay errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// A required identifier is empty, too long, or contains control characters.
    #[error("Invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },

    /// The event claims an identity other than the one the connection registered.
    #[error("Sender mismatch: connection is {registered}, event claims {claimed}")]
    SenderMismatch { registered: String, claimed: String },

    /// The connection has not registered an identity yet.
    #[error("Connection {0} has not registered")]
    NotRegistered(ConnectionId),

    /// The connection was never attached or is already detached.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The event is valid on the wire but not routable.
    #[error("Unexpected event: {0}")]
    UnexpectedEvent(&'static str),

    /// The relay task has stopped.
    #[error("Relay is not running")]
    Closed,
}

/// Validate an identifier carried by an event.
///
/// # Errors
///
/// Returns [`RelayError::InvalidField`] naming `field` if the value is unusable.
pub fn validate_identifier(field: &'static str, value: &str) -> Result<(), RelayError> {
    let reason = if value.is_empty() {
        "cannot be empty"
    } else if value.len() > MAX_IDENTIFIER_LENGTH {
        "too long"
    } else if value.chars().any(char::is_control) {
        "contains control characters"
    } else {
        return Ok(());
    };

    Err(RelayError::InvalidField { field, reason })
}
