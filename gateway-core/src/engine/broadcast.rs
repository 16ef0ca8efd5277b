//! Channel Registry & Broadcast Router (C5, spec.md §4.5).

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::connection::Connection;
use super::message::ServerMessage;
use crate::ids::ConnectionId;
use crate::metrics::Metrics;

/// A channel's subscriber set, in insertion order (spec.md §4.5: "the
/// router does not reorder" within one channel).
struct ChannelEntry {
    subscribers: RwLock<Vec<Arc<Connection>>>,
}

impl ChannelEntry {
    fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }
}

/// Maps channel name to subscriber set. Channels are created lazily on
/// first subscription and destroyed when their set becomes empty
/// (invariant 3, spec.md §8).
///
/// Grounded on the teacher's `websocket::broadcast::Broadcaster`,
/// generalized from a single flat connection map to per-channel
/// membership with ordered fan-out and access-denial accounting.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: DashMap<String, ChannelEntry>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` to `channel`'s subscriber set. Idempotent:
    /// repeating the call for the same connection yields exactly one
    /// membership (round-trip law, spec.md §8).
    pub fn subscribe(&self, channel: &str, connection: Arc<Connection>) {
        let entry = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(ChannelEntry::new);
        let mut subscribers = entry.subscribers.write();
        if !subscribers.iter().any(|c| c.id == connection.id) {
            subscribers.push(connection);
        }
    }

    /// Remove `connection_id` from `channel`'s subscriber set, dropping
    /// the channel entirely once it is empty.
    pub fn unsubscribe(&self, channel: &str, connection_id: &ConnectionId) {
        let mut drop_channel = false;
        if let Some(entry) = self.channels.get(channel) {
            let mut subscribers = entry.subscribers.write();
            subscribers.retain(|c| &c.id != connection_id);
            drop_channel = subscribers.is_empty();
        }
        if drop_channel {
            self.channels.remove(channel);
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|entry| entry.subscribers.read().len())
            .unwrap_or(0)
    }

    pub fn exists(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Fan out `message` to every OPEN subscriber of `channel`, in
    /// insertion order. A subscriber whose send cannot complete
    /// immediately loses only that message; the router never blocks or
    /// buffers (spec.md §4.5, §5).
    pub fn broadcast(&self, channel: &str, mut message: ServerMessage, metrics: &Metrics) -> usize {
        message = message.with_channel_if_absent(channel);
        let text = message.to_json();

        let Some(entry) = self.channels.get(channel) else {
            return 0;
        };
        let subscribers = entry.subscribers.read().clone();
        drop(entry);

        let mut delivered = 0;
        for conn in subscribers.iter() {
            match conn.sender.try_send(Message::Text(text.clone().into())) {
                Ok(()) => {
                    delivered += 1;
                    metrics.message_out();
                }
                Err(err) => {
                    tracing::warn!(
                        connection_id = %conn.id,
                        channel = channel,
                        error = %err,
                        "dropping broadcast message for slow or closed subscriber"
                    );
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_connection() -> Arc<Connection> {
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(Connection::new(tx, 10))
    }

    #[test]
    fn subscribe_is_idempotent() {
        let registry = ChannelRegistry::new();
        let conn = test_connection();
        registry.subscribe("public.tokens", conn.clone());
        registry.subscribe("public.tokens", conn.clone());
        assert_eq!(registry.subscriber_count("public.tokens"), 1);
    }

    #[test]
    fn unsubscribe_drops_empty_channel() {
        let registry = ChannelRegistry::new();
        let conn = test_connection();
        registry.subscribe("public.tokens", conn.clone());
        registry.unsubscribe("public.tokens", &conn.id);
        assert!(!registry.exists("public.tokens"));
    }

    #[test]
    fn broadcast_to_empty_channel_is_a_no_op() {
        let registry = ChannelRegistry::new();
        let metrics = Metrics::new();
        let delivered = registry.broadcast(
            "public.tokens",
            ServerMessage::data_frame("token_update", "", serde_json::json!({})),
            &metrics,
        );
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn broadcast_delivers_in_insertion_order() {
        let registry = ChannelRegistry::new();
        let metrics = Metrics::new();

        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let conn1 = Arc::new(Connection::new(tx1, 10));
        let conn2 = Arc::new(Connection::new(tx2, 10));

        registry.subscribe("public.tokens", conn1.clone());
        registry.subscribe("public.tokens", conn2.clone());

        let delivered = registry.broadcast(
            "public.tokens",
            ServerMessage::data_frame("token_update", "", serde_json::json!({"symbol": "SOL"})),
            &metrics,
        );
        assert_eq!(delivered, 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }
}
