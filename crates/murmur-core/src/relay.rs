//! The relay event loop.
//!
//! One task owns the registry and the presence audience and applies
//! commands strictly in arrival order, so registry state needs no locking:
//! concurrent registrations for the same identity resolve as last-one-wins
//! in queue order. Socket tasks talk to it through a cloneable
//! [`RelayHandle`].

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionState};
use crate::error::{validate_identifier, RelayError};
use crate::presence::{PresenceBroadcaster, PresenceMode};
use crate::registry::{ConnectionRegistry, Registration};
use crate::router::{EventRouter, RouteOutcome, RouterConfig};
use murmur_protocol::ClientEvent;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Relay configuration.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// Presence announcement style.
    pub presence: PresenceMode,
    /// Routing options.
    pub router: RouterConfig,
}

/// Commands accepted by the relay loop.
#[derive(Debug)]
pub enum RelayCommand {
    /// A transport connection opened.
    Attach(ConnectionHandle),
    /// A decoded event arrived on a connection.
    Inbound {
        connection: ConnectionId,
        event: ClientEvent,
    },
    /// A transport connection closed or failed.
    Detach(ConnectionId),
    /// Report counters.
    Stats(oneshot::Sender<RelayStats>),
}

/// Relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    /// Open connections.
    pub connections: usize,
    /// Registered identities.
    pub registered_users: usize,
    /// Events queued on a recipient connection.
    pub delivered: u64,
    /// Routing misses.
    pub dropped: u64,
    /// Malformed or out-of-order events.
    pub rejected: u64,
}

/// Owner of all relay state.
pub struct Relay {
    registry: ConnectionRegistry,
    presence: PresenceBroadcaster,
    router: RouterConfig,
    stats: RelayStats,
}

impl Relay {
    /// Create an idle relay.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        info!(presence = ?config.presence, router = ?config.router, "Creating relay");
        Self {
            registry: ConnectionRegistry::new(),
            presence: PresenceBroadcaster::new(config.presence),
            router: config.router,
            stats: RelayStats::default(),
        }
    }

    /// Run the relay on its own task.
    pub fn spawn(self) -> RelayHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(rx));
        RelayHandle { tx }
    }

    /// Process commands until every [`RelayHandle`] is dropped.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<RelayCommand>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        info!("Relay stopped");
    }

    /// Apply a single command.
    pub fn handle(&mut self, command: RelayCommand) {
        match command {
            RelayCommand::Attach(handle) => self.attach(handle),
            RelayCommand::Inbound { connection, event } => self.inbound(&connection, event),
            RelayCommand::Detach(connection) => self.detach(&connection),
            RelayCommand::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    /// Add a freshly opened connection to the presence audience.
    pub fn attach(&mut self, handle: ConnectionHandle) {
        debug!(connection = %handle.id(), "Attached");
        self.presence.attach(handle);
    }

    /// Process one inbound event, dropping it on error.
    pub fn inbound(&mut self, connection: &ConnectionId, event: ClientEvent) {
        let name = event.name();

        let result = match event {
            ClientEvent::Register { user_id } => self.register(connection, user_id).map(|_| None),
            event => self.route(connection, event).map(Some),
        };

        match result {
            Ok(Some(RouteOutcome::Delivered)) => self.stats.delivered += 1,
            Ok(Some(RouteOutcome::Dropped)) => self.stats.dropped += 1,
            Ok(None) => {}
            Err(e) => {
                self.stats.rejected += 1;
                warn!(connection = %connection, event = name, error = %e, "Dropped event");
            }
        }
    }

    /// Bind `connection` to `user_id` and announce it.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity is invalid or the connection is not
    /// attached.
    pub fn register(
        &mut self,
        connection: &ConnectionId,
        user_id: String,
    ) -> Result<Registration, RelayError> {
        validate_identifier("userId", &user_id)?;

        let handle = self
            .presence
            .get(connection)
            .cloned()
            .ok_or_else(|| RelayError::UnknownConnection(connection.clone()))?;

        if self
            .registry
            .user_for(connection)
            .is_some_and(|held| held != user_id)
        {
            if let Some(released) = self.registry.unregister(connection) {
                self.presence.user_disconnected(&released, &self.registry);
            }
        }

        let registration = self.registry.register(user_id.clone(), handle.clone());
        info!(user = %user_id, connection = %connection, ?registration, "User registered");

        self.presence.user_connected(&user_id, &self.registry);
        if self.presence.mode() == PresenceMode::Delta {
            handle.deliver(PresenceBroadcaster::snapshot_event(&self.registry));
        }

        Ok(registration)
    }

    /// Route a domain event from a registered connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection has not registered or the event
    /// fails validation.
    pub fn route(
        &self,
        connection: &ConnectionId,
        event: ClientEvent,
    ) -> Result<RouteOutcome, RelayError> {
        let origin = self
            .registry
            .user_for(connection)
            .ok_or_else(|| RelayError::NotRegistered(connection.clone()))?;

        EventRouter::new(&self.registry, &self.router).dispatch(origin, event)
    }

    /// Forget a closed connection and announce the user leaving.
    pub fn detach(&mut self, connection: &ConnectionId) {
        self.presence.detach(connection);

        match self.registry.unregister(connection) {
            Some(user_id) => {
                info!(user = %user_id, connection = %connection, "User disconnected");
                self.presence.user_disconnected(&user_id, &self.registry);
            }
            None => debug!(connection = %connection, "Detached"),
        }
    }

    /// Where `connection` is in its lifecycle.
    #[must_use]
    pub fn connection_state(&self, connection: &ConnectionId) -> ConnectionState {
        if self.registry.user_for(connection).is_some() {
            ConnectionState::Registered
        } else if self.presence.get(connection).is_some() {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        }
    }

    /// The registry, for inspection.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            connections: self.presence.audience_len(),
            registered_users: self.registry.len(),
            ..self.stats
        }
    }
}

/// Cloneable sender side of the relay loop.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<RelayCommand>,
}

impl RelayHandle {
    /// Announce an opened connection.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Closed`] if the relay has stopped.
    pub fn attach(&self, handle: ConnectionHandle) -> Result<(), RelayError> {
        self.send(RelayCommand::Attach(handle))
    }

    /// Forward a decoded event.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Closed`] if the relay has stopped.
    pub fn inbound(&self, connection: ConnectionId, event: ClientEvent) -> Result<(), RelayError> {
        self.send(RelayCommand::Inbound { connection, event })
    }

    /// Announce a closed connection.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Closed`] if the relay has stopped.
    pub fn detach(&self, connection: ConnectionId) -> Result<(), RelayError> {
        self.send(RelayCommand::Detach(connection))
    }

    /// Fetch counters from the relay.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Closed`] if the relay has stopped.
    pub async fn stats(&self) -> Result<RelayStats, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Stats(reply))?;
        rx.await.map_err(|_| RelayError::Closed)
    }

    fn send(&self, command: RelayCommand) -> Result<(), RelayError> {
        self.tx.send(command).map_err(|_| RelayError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use murmur_protocol::ServerEvent;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn open(relay: &mut Relay, id: &str) -> UnboundedReceiver<Outbound> {
        let (handle, rx) = ConnectionHandle::channel(id);
        relay.handle(RelayCommand::Attach(handle));
        rx
    }

    fn send(relay: &mut Relay, id: &str, event: ClientEvent) {
        relay.handle(RelayCommand::Inbound {
            connection: id.into(),
            event,
        });
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    #[test]
    fn test_message_scenario() {
        let mut relay = Relay::new(RelayConfig::default());
        let mut rx1 = open(&mut relay, "c1");
        let mut rx2 = open(&mut relay, "c2");

        send(&mut relay, "c1", ClientEvent::register("u1"));
        send(&mut relay, "c2", ClientEvent::register("u2"));
        assert_eq!(
            drain(&mut rx1).last(),
            Some(&ServerEvent::users(vec!["u1".into(), "u2".into()]))
        );
        drain(&mut rx2);

        send(&mut relay, "c1", ClientEvent::send_message("u1", "u2", "c1", "hi"));
        let received = drain(&mut rx2);
        assert_eq!(received.len(), 1);
        match &received[0] {
            ServerEvent::GetMessage {
                sender_id,
                text,
                chat_id,
                timestamp,
                ..
            } => {
                assert_eq!(sender_id, "u1");
                assert_eq!(text, "hi");
                assert_eq!(chat_id, "c1");
                assert!(*timestamp > 0);
            }
            other => panic!("Expected getMessage, got {:?}", other),
        }

        relay.handle(RelayCommand::Detach("c2".into()));
        assert_eq!(drain(&mut rx1), vec![ServerEvent::users(vec!["u1".into()])]);

        send(&mut relay, "c1", ClientEvent::send_message("u1", "u2", "c1", "again"));
        assert!(drain(&mut rx1).is_empty());
        assert!(drain(&mut rx2).is_empty());

        let stats = relay.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.rejected, 0);
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.registered_users, 1);
    }

    #[test]
    fn test_connection_lifecycle() {
        let mut relay = Relay::new(RelayConfig::default());
        let id: ConnectionId = "c1".into();
        assert_eq!(relay.connection_state(&id), ConnectionState::Disconnected);

        let _rx = open(&mut relay, "c1");
        assert_eq!(relay.connection_state(&id), ConnectionState::Connecting);

        send(&mut relay, "c1", ClientEvent::register("u1"));
        assert_eq!(relay.connection_state(&id), ConnectionState::Registered);

        relay.handle(RelayCommand::Detach(id.clone()));
        assert_eq!(relay.connection_state(&id), ConnectionState::Disconnected);
    }

    #[test]
    fn test_events_before_register_are_rejected() {
        let mut relay = Relay::new(RelayConfig::default());
        let _rx1 = open(&mut relay, "c1");
        let mut rx2 = open(&mut relay, "c2");
        send(&mut relay, "c2", ClientEvent::register("u2"));
        drain(&mut rx2);

        send(&mut relay, "c1", ClientEvent::typing("u1", "u2", "c1", "h"));

        assert!(drain(&mut rx2).is_empty());
        assert_eq!(relay.stats().rejected, 1);
    }

    #[test]
    fn test_register_from_unknown_connection() {
        let mut relay = Relay::new(RelayConfig::default());
        assert_eq!(
            relay.register(&"ghost".into(), "u1".into()),
            Err(RelayError::UnknownConnection("ghost".into()))
        );
        assert!(relay.registry().is_empty());
    }

    #[test]
    fn test_stale_disconnect_keeps_new_connection() {
        let mut relay = Relay::new(RelayConfig::default());
        let _old = open(&mut relay, "old");
        let mut new = open(&mut relay, "new");
        let mut watcher = open(&mut relay, "watcher");

        send(&mut relay, "old", ClientEvent::register("u1"));
        send(&mut relay, "new", ClientEvent::register("u1"));
        send(&mut relay, "watcher", ClientEvent::register("w"));
        drain(&mut new);
        drain(&mut watcher);

        relay.handle(RelayCommand::Detach("old".into()));
        assert!(drain(&mut watcher).is_empty());
        assert_eq!(
            relay.registry().lookup("u1").map(|h| h.id().as_str()),
            Some("new")
        );

        send(&mut relay, "watcher", ClientEvent::send_message("w", "u1", "c9", "yo"));
        assert_eq!(drain(&mut new).len(), 1);
    }

    #[test]
    fn test_delta_mode_seeds_registrant() {
        let config = RelayConfig {
            presence: PresenceMode::Delta,
            ..RelayConfig::default()
        };
        let mut relay = Relay::new(config);
        let mut rx1 = open(&mut relay, "c1");
        send(&mut relay, "c1", ClientEvent::register("u1"));
        drain(&mut rx1);

        let mut rx2 = open(&mut relay, "c2");
        send(&mut relay, "c2", ClientEvent::register("u2"));

        let seen_by_u1 = drain(&mut rx1);
        assert_eq!(seen_by_u1.len(), 1);
        assert!(matches!(
            &seen_by_u1[0],
            ServerEvent::UserConnected { user_id, .. } if user_id == "u2"
        ));

        let seen_by_u2 = drain(&mut rx2);
        assert_eq!(seen_by_u2.len(), 2);
        assert_eq!(
            seen_by_u2[1],
            ServerEvent::users(vec!["u1".into(), "u2".into()])
        );

        relay.handle(RelayCommand::Detach("c2".into()));
        assert!(matches!(
            drain(&mut rx1).as_slice(),
            [ServerEvent::UserDisconnected { user_id, .. }] if user_id == "u2"
        ));
    }

    #[test]
    fn test_reregister_under_new_identity() {
        let config = RelayConfig {
            presence: PresenceMode::Delta,
            ..RelayConfig::default()
        };
        let mut relay = Relay::new(config);
        let mut watcher = open(&mut relay, "w");
        let _rx = open(&mut relay, "c1");

        send(&mut relay, "c1", ClientEvent::register("alice"));
        drain(&mut watcher);
        send(&mut relay, "c1", ClientEvent::register("alicia"));

        let events = drain(&mut watcher);
        assert!(matches!(
            &events[0],
            ServerEvent::UserDisconnected { user_id, .. } if user_id == "alice"
        ));
        assert!(matches!(
            &events[1],
            ServerEvent::UserConnected { user_id, .. } if user_id == "alicia"
        ));
        assert_eq!(relay.registry().snapshot(), vec!["alicia"]);
    }

    #[tokio::test]
    async fn test_spawned_relay_stats() {
        let handle = Relay::new(RelayConfig::default()).spawn();
        let (conn, mut rx) = ConnectionHandle::channel("c1");

        handle.attach(conn).unwrap();
        handle.inbound("c1".into(), ClientEvent::register("u1")).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(*event, ServerEvent::users(vec!["u1".into()]));

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.registered_users, 1);

        handle.detach("c1".into()).unwrap();
        assert_eq!(handle.stats().await.unwrap().registered_users, 0);
    }
}
