//! Metrics & Observability (C9, spec.md §4.9).
//!
//! The teacher wires HTTP metrics through an OpenTelemetry meter
//! provider (`middleware::metrics`). This gateway has no OTel exporter
//! in scope (see DESIGN.md), so the counters/gauges here are plain
//! atomics; the periodic self-report still flows through the same
//! kind of structured `tracing` events the teacher emits elsewhere.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

/// Latency samples for handler durations, bounded to the last 100
/// entries (spec.md §4.9).
pub struct LatencyRingBuffer {
    samples: parking_lot::Mutex<std::collections::VecDeque<u64>>,
    capacity: usize,
}

impl LatencyRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: parking_lot::Mutex::new(std::collections::VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record(&self, micros: u64) {
        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(micros);
    }

    pub fn average_micros(&self) -> f64 {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<u64>() as f64 / samples.len() as f64
    }
}

/// Process-wide counters and gauges (spec.md §4.9).
pub struct Metrics {
    pub total_connections: AtomicU64,
    pub current_connections: AtomicI64,
    pub authenticated_connections: AtomicI64,
    pub anonymous_connections: AtomicI64,
    pub messages_in: AtomicU64,
    pub messages_out: AtomicU64,
    pub errors: AtomicU64,
    pub rate_limit_breaches: AtomicU64,
    pub very_short_lived_connections: AtomicU64,
    pub auth_interrupted: AtomicU64,
    pub abnormal_closes: AtomicU64,
    channel_subscribers: DashMap<String, AtomicI64>,
    pub handler_latency: LatencyRingBuffer,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            current_connections: AtomicI64::new(0),
            authenticated_connections: AtomicI64::new(0),
            anonymous_connections: AtomicI64::new(0),
            messages_in: AtomicU64::new(0),
            messages_out: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            rate_limit_breaches: AtomicU64::new(0),
            very_short_lived_connections: AtomicU64::new(0),
            auth_interrupted: AtomicU64::new(0),
            abnormal_closes: AtomicU64::new(0),
            channel_subscribers: DashMap::new(),
            handler_latency: LatencyRingBuffer::new(100),
        }
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.current_connections.fetch_add(1, Ordering::Relaxed);
        self.anonymous_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn current_connections_dec(&self) {
        self.current_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn authenticated_connections_dec(&self) {
        self.authenticated_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn anonymous_connections_dec(&self) {
        self.anonymous_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn mark_authenticated(&self) {
        self.anonymous_connections.fetch_sub(1, Ordering::Relaxed);
        self.authenticated_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_in(&self) {
        self.messages_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_out(&self) {
        self.messages_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_limit_breach(&self) {
        self.rate_limit_breaches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn very_short_lived_connection(&self) {
        self.very_short_lived_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_interrupted(&self) {
        self.auth_interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn abnormal_close(&self) {
        self.abnormal_closes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn channel_subscriber_inc(&self, channel: &str) {
        self.channel_subscribers
            .entry(channel.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn channel_subscriber_dec(&self, channel: &str) {
        if let Some(entry) = self.channel_subscribers.get(channel) {
            entry.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            current_connections: self.current_connections.load(Ordering::Relaxed),
            authenticated_connections: self.authenticated_connections.load(Ordering::Relaxed),
            anonymous_connections: self.anonymous_connections.load(Ordering::Relaxed),
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            rate_limit_breaches: self.rate_limit_breaches.load(Ordering::Relaxed),
            very_short_lived_connections: self.very_short_lived_connections.load(Ordering::Relaxed),
            auth_interrupted: self.auth_interrupted.load(Ordering::Relaxed),
            abnormal_closes: self.abnormal_closes.load(Ordering::Relaxed),
            avg_handler_latency_micros: self.handler_latency.average_micros(),
        }
    }
}

/// A point-in-time snapshot published to the event bus roughly every
/// 15 seconds (spec.md §4.9) as a `service:status:update` event.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_connections: u64,
    pub current_connections: i64,
    pub authenticated_connections: i64,
    pub anonymous_connections: i64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub errors: u64,
    pub rate_limit_breaches: u64,
    pub very_short_lived_connections: u64,
    pub auth_interrupted: u64,
    pub abnormal_closes: u64,
    pub avg_handler_latency_micros: f64,
}

pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_opened_updates_current_and_anonymous() {
        let metrics = Metrics::new();
        metrics.connection_opened();
        assert_eq!(metrics.current_connections.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.anonymous_connections.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn mark_authenticated_moves_the_gauge() {
        let metrics = Metrics::new();
        metrics.connection_opened();
        metrics.mark_authenticated();
        assert_eq!(metrics.anonymous_connections.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.authenticated_connections.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn latency_ring_buffer_bounds_to_capacity() {
        let buffer = LatencyRingBuffer::new(3);
        buffer.record(10);
        buffer.record(20);
        buffer.record(30);
        buffer.record(40);
        assert_eq!(buffer.average_micros(), 30.0);
    }
}
