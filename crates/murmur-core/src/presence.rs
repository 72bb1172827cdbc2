//! Presence broadcasting.
//!
//! Every open connection, registered or not, is in the audience. After each
//! registry mutation the broadcaster pushes either the full set of online
//! users or a single connected/disconnected delta, depending on the mode the
//! relay was started with.

use crate::connection::{ConnectionHandle, ConnectionId, Outbound};
use crate::message::now_millis;
use crate::registry::ConnectionRegistry;
use murmur_protocol::ServerEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// How presence changes are announced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceMode {
    /// Broadcast `getUsers` with every registered identity.
    #[default]
    Snapshot,
    /// Broadcast `userConnected` / `userDisconnected`.
    Delta,
}

/// Fans presence events out to all open connections.
#[derive(Debug, Default)]
pub struct PresenceBroadcaster {
    mode: PresenceMode,
    audience: HashMap<ConnectionId, ConnectionHandle>,
}

impl PresenceBroadcaster {
    /// Create a broadcaster with an empty audience.
    #[must_use]
    pub fn new(mode: PresenceMode) -> Self {
        Self {
            mode,
            audience: HashMap::new(),
        }
    }

    /// The configured mode.
    #[must_use]
    pub fn mode(&self) -> PresenceMode {
        self.mode
    }

    /// Add an open connection to the audience.
    ///
    /// Returns `true` if the connection was not already attached.
    pub fn attach(&mut self, handle: ConnectionHandle) -> bool {
        self.audience.insert(handle.id().clone(), handle).is_none()
    }

    /// Remove a connection from the audience.
    pub fn detach(&mut self, connection: &ConnectionId) -> Option<ConnectionHandle> {
        self.audience.remove(connection)
    }

    /// Handle of an attached connection.
    #[must_use]
    pub fn get(&self, connection: &ConnectionId) -> Option<&ConnectionHandle> {
        self.audience.get(connection)
    }

    /// Number of attached connections.
    #[must_use]
    pub fn audience_len(&self) -> usize {
        self.audience.len()
    }

    /// The `getUsers` event for the registry's current state.
    #[must_use]
    pub fn snapshot_event(registry: &ConnectionRegistry) -> ServerEvent {
        ServerEvent::users(registry.snapshot())
    }

    /// Announce that `user_id` registered.
    ///
    /// Returns the number of connections the announcement was queued on.
    pub fn user_connected(&self, user_id: &str, registry: &ConnectionRegistry) -> usize {
        let event = match self.mode {
            PresenceMode::Snapshot => Self::snapshot_event(registry),
            PresenceMode::Delta => ServerEvent::UserConnected {
                user_id: user_id.to_string(),
                timestamp: now_millis(),
            },
        };
        self.broadcast(event)
    }

    /// Announce that `user_id` went offline.
    ///
    /// Returns the number of connections the announcement was queued on.
    pub fn user_disconnected(&self, user_id: &str, registry: &ConnectionRegistry) -> usize {
        let event = match self.mode {
            PresenceMode::Snapshot => Self::snapshot_event(registry),
            PresenceMode::Delta => ServerEvent::UserDisconnected {
                user_id: user_id.to_string(),
                timestamp: now_millis(),
            },
        };
        self.broadcast(event)
    }

    /// Queue `event` on every attached connection.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        let name = event.name();
        let event: Outbound = Arc::new(event);

        let delivered = self
            .audience
            .values()
            .filter(|handle| handle.deliver(Arc::clone(&event)))
            .count();

        debug!(
            event = name,
            recipients = delivered,
            audience = self.audience.len(),
            "Presence broadcast"
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn attach(
        presence: &mut PresenceBroadcaster,
        id: &str,
    ) -> (ConnectionHandle, UnboundedReceiver<Outbound>) {
        let (handle, rx) = ConnectionHandle::channel(id);
        presence.attach(handle.clone());
        (handle, rx)
    }

    #[test]
    fn test_snapshot_mode_broadcasts_full_set() {
        let mut presence = PresenceBroadcaster::new(PresenceMode::Snapshot);
        let mut registry = ConnectionRegistry::new();

        let (a, mut rx_a) = attach(&mut presence, "c1");
        let (_, mut rx_anon) = attach(&mut presence, "c2");

        registry.register("alice", a);
        assert_eq!(presence.user_connected("alice", &registry), 2);

        let expected = ServerEvent::users(vec!["alice".into()]);
        assert_eq!(*rx_a.try_recv().unwrap(), expected);
        assert_eq!(*rx_anon.try_recv().unwrap(), expected);
    }

    #[test]
    fn test_delta_mode_broadcasts_changes() {
        let mut presence = PresenceBroadcaster::new(PresenceMode::Delta);
        let registry = ConnectionRegistry::new();
        let (_, mut rx) = attach(&mut presence, "c1");

        presence.user_connected("bob", &registry);
        presence.user_disconnected("bob", &registry);

        assert!(matches!(
            &*rx.try_recv().unwrap(),
            ServerEvent::UserConnected { user_id, .. } if user_id == "bob"
        ));
        assert!(matches!(
            &*rx.try_recv().unwrap(),
            ServerEvent::UserDisconnected { user_id, .. } if user_id == "bob"
        ));
    }

    #[test]
    fn test_closing_connection_misses_broadcast() {
        let mut presence = PresenceBroadcaster::new(PresenceMode::Snapshot);
        let registry = ConnectionRegistry::new();

        let (_, rx_closed) = attach(&mut presence, "c1");
        let (_, _rx_open) = attach(&mut presence, "c2");
        drop(rx_closed);

        assert_eq!(presence.broadcast(ServerEvent::users(registry.snapshot())), 1);
    }

    #[test]
    fn test_attach_detach() {
        let mut presence = PresenceBroadcaster::default();
        let (handle, _rx) = ConnectionHandle::channel("c1");

        assert!(presence.attach(handle.clone()));
        assert!(!presence.attach(handle));
        assert_eq!(presence.audience_len(), 1);

        assert!(presence.detach(&"c1".into()).is_some());
        assert_eq!(presence.audience_len(), 0);
        assert_eq!(presence.mode(), PresenceMode::Snapshot);
    }
}
