//! Client Registry (C4, spec.md §4.4): indexes live connections and owns
//! their cleanup path on close.

use std::sync::Arc;

use dashmap::DashMap;

use super::channel::ChannelAccessContext;
use super::connection::{Connection, ConnectionState};
use crate::ids::ConnectionId;
use crate::metrics::Metrics;

use super::broadcast::ChannelRegistry;

/// Process-wide index of active connections.
///
/// Grounded on the teacher's `websocket::broadcast::Broadcaster`
/// connection map, generalized to also run the cleanup sequence the
/// specification requires on close: cancel timers, leave every channel,
/// drop budget counters, update gauges, and hand off to the endpoint's
/// `on_close` hook (invoked by the caller after `remove` returns).
#[derive(Default)]
pub struct ClientRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection: Arc<Connection>) {
        self.connections.insert(connection.id.clone(), connection);
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Remove a connection and unwind every channel it was joined to.
    /// Invariant 4 (spec.md §8): after close the connection is absent
    /// from all subscriber sets and from the registry.
    pub fn remove(&self, id: &ConnectionId, channels: &ChannelRegistry, metrics: &Metrics) -> Option<Arc<Connection>> {
        let removed = self.connections.remove(id).map(|(_, conn)| conn);
        if let Some(conn) = &removed {
            conn.set_state(ConnectionState::Closed);
            for channel in conn.subscriptions() {
                channels.unsubscribe(&channel, id);
            }
            if conn.is_authenticated() {
                metrics.authenticated_connections_dec();
            } else {
                metrics.anonymous_connections_dec();
            }
            metrics.current_connections_dec();
        }
        removed
    }

    pub fn access_context(&self, auth_required: bool) -> ChannelAccessContext {
        ChannelAccessContext { auth_required }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    #[test]
    fn insert_and_get_round_trips() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = mpsc::channel::<Message>(4);
        let conn = Arc::new(Connection::new(tx, 10));
        let id = conn.id.clone();
        registry.insert(conn);
        assert!(registry.get(&id).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_unwinds_subscriptions() {
        let registry = ClientRegistry::new();
        let channels = ChannelRegistry::new();
        let metrics = Metrics::new();
        let (tx, _rx) = mpsc::channel::<Message>(4);
        let conn = Arc::new(Connection::new(tx, 10));
        let id = conn.id.clone();
        conn.add_subscription("public.tokens");
        channels.subscribe("public.tokens", conn.clone());
        registry.insert(conn);

        registry.remove(&id, &channels, &metrics);

        assert!(registry.get(&id).is_none());
        assert_eq!(channels.subscriber_count("public.tokens"), 0);
    }
}
