//! Registry of connected users.
//!
//! Maps each user identity to the one connection currently speaking for it.
//! A new registration for the same identity replaces the old one, and removal
//! is keyed by connection so a late disconnect from a superseded connection
//! cannot evict its replacement.

use crate::connection::{ConnectionHandle, ConnectionId};
use std::collections::HashMap;
use tracing::debug;

/// Result of [`ConnectionRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The identity was not registered before.
    New,
    /// The identity moved here from another connection.
    Replaced {
        /// The superseded connection.
        previous: ConnectionId,
    },
    /// The same connection announced the same identity again.
    Refreshed,
}

/// Identity-to-connection map.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Current handle per user identity.
    by_user: HashMap<String, ConnectionHandle>,
    /// Reverse index used for removal on disconnect.
    by_connection: HashMap<ConnectionId, String>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `user_id`.
    ///
    /// A connection speaks for a single identity, so if `handle` was already
    /// registered under a different identity, that identity is released.
    pub fn register(&mut self, user_id: impl Into<String>, handle: ConnectionHandle) -> Registration {
        let user_id = user_id.into();
        let connection = handle.id().clone();

        if let Some(held) = self.by_connection.get(&connection) {
            if *held != user_id {
                let held = held.clone();
                self.by_user.remove(&held);
                debug!(connection = %connection, user = %held, "Released previous identity");
            }
        }

        let registration = match self.by_user.insert(user_id.clone(), handle) {
            None => Registration::New,
            Some(old) if *old.id() == connection => Registration::Refreshed,
            Some(old) => {
                self.by_connection.remove(old.id());
                Registration::Replaced {
                    previous: old.id().clone(),
                }
            }
        };

        debug!(user = %user_id, connection = %connection, ?registration, "Registered");
        self.by_connection.insert(connection, user_id);

        registration
    }

    /// Remove the entry owned by `connection`.
    ///
    /// Returns the released identity, or `None` if the connection holds no
    /// entry (never registered, or superseded by a newer connection).
    pub fn unregister(&mut self, connection: &ConnectionId) -> Option<String> {
        let user_id = self.by_connection.remove(connection)?;

        if self
            .by_user
            .get(&user_id)
            .is_some_and(|handle| handle.id() == connection)
        {
            self.by_user.remove(&user_id);
        }

        debug!(user = %user_id, connection = %connection, "Unregistered");
        Some(user_id)
    }

    /// Current handle for `user_id`.
    #[must_use]
    pub fn lookup(&self, user_id: &str) -> Option<&ConnectionHandle> {
        self.by_user.get(user_id)
    }

    /// Identity registered by `connection`, if any.
    #[must_use]
    pub fn user_for(&self, connection: &ConnectionId) -> Option<&str> {
        self.by_connection.get(connection).map(String::as_str)
    }

    /// Whether `user_id` is currently registered.
    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    /// All registered identities, sorted.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        let mut users: Vec<String> = self.by_user.keys().cloned().collect();
        users.sort_unstable();
        users
    }

    /// Number of registered identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    /// Whether nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str) -> ConnectionHandle {
        ConnectionHandle::channel(id).0
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ConnectionRegistry::new();

        assert_eq!(registry.register("alice", handle("c1")), Registration::New);
        assert_eq!(registry.lookup("alice").unwrap().id().as_str(), "c1");
        assert!(registry.lookup("bob").is_none());
        assert_eq!(registry.user_for(&"c1".into()), Some("alice"));
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = ConnectionRegistry::new();

        registry.register("alice", handle("c1"));
        registry.register("alice", handle("c2"));
        let registration = registry.register("alice", handle("c3"));

        assert_eq!(
            registration,
            Registration::Replaced {
                previous: "c2".into()
            }
        );
        assert_eq!(registry.lookup("alice").unwrap().id().as_str(), "c3");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_refresh_same_connection() {
        let mut registry = ConnectionRegistry::new();
        let h = handle("c1");

        registry.register("alice", h.clone());
        assert_eq!(registry.register("alice", h), Registration::Refreshed);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_superseded_unregister_is_noop() {
        let mut registry = ConnectionRegistry::new();

        registry.register("alice", handle("c1"));
        registry.register("alice", handle("c2"));

        assert_eq!(registry.unregister(&"c1".into()), None);
        assert_eq!(registry.lookup("alice").unwrap().id().as_str(), "c2");

        assert_eq!(registry.unregister(&"c2".into()), Some("alice".to_string()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_unknown_connection() {
        let mut registry = ConnectionRegistry::new();
        assert_eq!(registry.unregister(&"nope".into()), None);
    }

    #[test]
    fn test_snapshot_contains_each_user_once() {
        let mut registry = ConnectionRegistry::new();

        registry.register("bob", handle("c2"));
        registry.register("alice", handle("c1"));
        registry.register("alice", handle("c3"));

        assert_eq!(registry.snapshot(), vec!["alice", "bob"]);

        registry.unregister(&"c3".into());
        assert_eq!(registry.snapshot(), vec!["bob"]);
    }

    #[test]
    fn test_reregister_under_new_identity_releases_old() {
        let mut registry = ConnectionRegistry::new();
        let h = handle("c1");

        registry.register("alice", h.clone());
        assert_eq!(registry.register("alicia", h), Registration::New);

        assert!(!registry.contains("alice"));
        assert_eq!(registry.user_for(&"c1".into()), Some("alicia"));
        assert_eq!(registry.snapshot(), vec!["alicia"]);
    }
}
