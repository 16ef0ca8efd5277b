//! Internal Event Bus (C7, spec.md §4.7).
//!
//! A single process-wide, synchronous publish/subscribe primitive over
//! a closed name set. Grounded on the teacher's actor-based
//! `websocket::rooms::RoomManager` in spirit (subscribers register,
//! publishers fan out, one subscriber's failure is isolated from the
//! rest) but implemented as a direct `DashMap`-backed dispatcher rather
//! than an `acton-reactive` actor: an async message-passing hop would
//! break the "synchronous, in order per publisher" guarantee the
//! specification requires (see DESIGN.md).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

/// The closed vocabulary of event names the bus accepts (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    MarketBroadcast,
    TerminalBroadcast,
    TradeExecuted,
    PortfolioUpdated,
    BalanceUpdated,
    TransactionConfirmed,
    ServiceStatusUpdate,
    ServiceError,
    ServiceInitialized,
    ServiceCircuitBreaker,
    MaintenanceUpdate,
    SystemSettingsUpdate,
}

impl EventName {
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::MarketBroadcast => "market:broadcast",
            EventName::TerminalBroadcast => "terminal:broadcast",
            EventName::TradeExecuted => "trade:executed",
            EventName::PortfolioUpdated => "portfolio:updated",
            EventName::BalanceUpdated => "balance:updated",
            EventName::TransactionConfirmed => "transaction:confirmed",
            EventName::ServiceStatusUpdate => "service:status:update",
            EventName::ServiceError => "service:error",
            EventName::ServiceInitialized => "service:initialized",
            EventName::ServiceCircuitBreaker => "service:circuit_breaker",
            EventName::MaintenanceUpdate => "maintenance:update",
            EventName::SystemSettingsUpdate => "system:settings:update",
        }
    }
}

/// An event published on the bus: a fixed name plus an opaque payload
/// (spec.md §3).
#[derive(Debug, Clone)]
pub struct Event {
    pub name: EventName,
    pub payload: Value,
}

impl Event {
    pub fn new(name: EventName, payload: Value) -> Self {
        Self { name, payload }
    }
}

type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;

/// The process-wide bus. One instance is shared by every endpoint
/// specialization via `Arc`.
#[derive(Default)]
pub struct EventBus {
    subscribers: DashMap<&'static str, Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for `name`. Subscribers receive events until
    /// the bus is dropped (spec.md §4.7: "until they unregister or the
    /// bus shuts down" — this engine has no per-subscription unregister
    /// handle because specializations live for the process lifetime;
    /// `on_cleanup` stops scheduling new work rather than unsubscribing).
    pub fn subscribe<F>(&self, name: EventName, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers
            .entry(name.as_str())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Publish an event. Dispatch is synchronous and in order for this
    /// call; a subscriber that panics is caught and logged so it cannot
    /// affect the others (spec.md §4.7, §7: "bus callbacks must not
    /// propagate exceptions to the bus").
    pub fn publish(&self, event: Event) {
        let Some(callbacks) = self.subscribers.get(event.name.as_str()) else {
            return;
        };
        for callback in callbacks.iter() {
            let callback = callback.clone();
            let event_ref = &event;
            let result = catch_unwind(AssertUnwindSafe(|| callback(event_ref)));
            if result.is_err() {
                tracing::error!(event = event.name.as_str(), "event bus subscriber panicked");
            }
        }
    }

    pub fn subscriber_count(&self, name: EventName) -> usize {
        self.subscribers.get(name.as_str()).map(|v| v.len()).unwrap_or(0)
    }
}

pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn publish_with_no_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.publish(Event::new(EventName::MarketBroadcast, serde_json::json!({})));
    }

    #[test]
    fn every_subscriber_is_notified_in_order() {
        let bus = EventBus::new();
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let calls_a = calls.clone();
        bus.subscribe(EventName::MarketBroadcast, move |_| calls_a.lock().push("a"));
        let calls_b = calls.clone();
        bus.subscribe(EventName::MarketBroadcast, move |_| calls_b.lock().push("b"));

        bus.publish(Event::new(EventName::MarketBroadcast, serde_json::json!({})));

        assert_eq!(*calls.lock(), vec!["a", "b"]);
    }

    #[test]
    fn a_panicking_subscriber_does_not_block_the_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(EventName::TradeExecuted, |_| panic!("boom"));
        let hits_clone = hits.clone();
        bus.subscribe(EventName::TradeExecuted, move |_| {
            hits_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.publish(Event::new(EventName::TradeExecuted, serde_json::json!({})));

        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
