//! Per-connection state owned by the Client Registry (spec.md §3, §4.4).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth::Principal;
use crate::ids::ConnectionId;

/// Heartbeat timing a freshly constructed [`Connection`] carries before
/// its owning endpoint's resolved values are applied via
/// [`Connection::with_heartbeat_timing`]. Matches
/// [`crate::config::HeartbeatConfig`]'s own defaults.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle states of the connection state machine (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Established,
    Closing,
    Closed,
}

/// Progress of the handshake-time auth attempt (spec.md §3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    NotStarted,
    InProgress,
    Completed,
}

/// A live connection tracked by the Client Registry.
///
/// Grounded on the teacher's `websocket::handler::WebSocketConnection`,
/// generalized with the full state the specification requires: auth
/// phase, rate-limit budget, heartbeat strikes, and subscription set.
pub struct Connection {
    pub id: ConnectionId,
    pub sender: mpsc::Sender<Message>,
    pub principal: Principal,
    pub connected_at: DateTime<Utc>,
    last_activity_at: AtomicI64,
    subscriptions: parking_lot::RwLock<HashSet<String>>,
    message_budget: AtomicU32,
    budget_ceiling: AtomicU32,
    heartbeat_strikes: AtomicU32,
    ping_outstanding: AtomicBool,
    ping_sent_at: AtomicI64,
    heartbeat_interval: parking_lot::RwLock<Duration>,
    heartbeat_timeout: parking_lot::RwLock<Duration>,
    state: parking_lot::RwLock<ConnectionState>,
    auth_phase: parking_lot::RwLock<AuthPhase>,
    shutdown: CancellationToken,
}

impl Connection {
    /// An anonymous connection with the given rate-limit ceiling. Most
    /// call sites resolve the principal only after the handshake
    /// completes; use [`Connection::with_principal`] for that case.
    pub fn new(sender: mpsc::Sender<Message>, budget_per_window: u32) -> Self {
        Self::with_principal(sender, budget_per_window, Principal::Anonymous)
    }

    /// A connection whose principal is already resolved (spec.md §8,
    /// invariant 7: the principal never changes after construction).
    pub fn with_principal(sender: mpsc::Sender<Message>, budget_per_window: u32, principal: Principal) -> Self {
        let now = Utc::now();
        Self {
            id: ConnectionId::new(),
            sender,
            principal,
            connected_at: now,
            last_activity_at: AtomicI64::new(now.timestamp_millis()),
            subscriptions: parking_lot::RwLock::new(HashSet::new()),
            message_budget: AtomicU32::new(budget_per_window),
            budget_ceiling: AtomicU32::new(budget_per_window),
            heartbeat_strikes: AtomicU32::new(0),
            ping_outstanding: AtomicBool::new(false),
            ping_sent_at: AtomicI64::new(0),
            heartbeat_interval: parking_lot::RwLock::new(DEFAULT_HEARTBEAT_INTERVAL),
            heartbeat_timeout: parking_lot::RwLock::new(DEFAULT_HEARTBEAT_TIMEOUT),
            state: parking_lot::RwLock::new(ConnectionState::Connecting),
            auth_phase: parking_lot::RwLock::new(AuthPhase::NotStarted),
            shutdown: CancellationToken::new(),
        }
    }

    /// Signals the owning `run_connection` task to tear down even
    /// though the client hasn't initiated or acknowledged a close.
    /// Used by the heartbeat sweep (`engine::heartbeat`) when a
    /// connection stops answering: sending a close frame alone can't
    /// terminate the connection's read loop if the client never reads
    /// or writes again, which is exactly the unresponsive-client case
    /// heartbeat timeout exists to reap.
    pub fn request_close(&self) {
        self.shutdown.cancel();
    }

    /// A clone of this connection's shutdown token, selected on by the
    /// dispatch loop alongside the socket's receive stream.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Applies this connection's endpoint-resolved heartbeat interval
    /// and timeout (`EndpointConfig::resolved_heartbeat_interval`/
    /// `resolved_heartbeat_timeout`, spec.md §4.2/§4.3), so the shared
    /// heartbeat sweep can treat each connection according to its own
    /// endpoint's configuration rather than one process-wide value.
    pub fn with_heartbeat_timing(self, interval: Duration, timeout: Duration) -> Self {
        *self.heartbeat_interval.write() = interval;
        *self.heartbeat_timeout.write() = timeout;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        *self.heartbeat_interval.read()
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        *self.heartbeat_timeout.read()
    }

    pub fn is_authenticated(&self) -> bool {
        self.principal.is_authenticated()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    pub fn auth_phase(&self) -> AuthPhase {
        *self.auth_phase.read()
    }

    pub fn set_auth_phase(&self, phase: AuthPhase) {
        *self.auth_phase.write() = phase;
    }

    /// Record activity (inbound client frame or pong). Invariant 6
    /// (spec.md §8): strikes reset to zero on any activity.
    pub fn touch(&self) {
        self.last_activity_at
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.ping_outstanding.store(false, Ordering::Relaxed);
        self.heartbeat_strikes.store(0, Ordering::Relaxed);
    }

    /// Whether a ping sent on a previous sweep has gone unanswered.
    pub fn ping_outstanding(&self) -> bool {
        self.ping_outstanding.load(Ordering::Relaxed)
    }

    pub fn mark_ping_sent(&self) {
        self.ping_outstanding.store(true, Ordering::Relaxed);
        self.ping_sent_at.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// When the currently-outstanding ping (if any) was sent; used to
    /// measure elapsed time against this connection's own
    /// `heartbeat_timeout` rather than the sweep's tick cadence.
    pub fn ping_sent_at(&self) -> DateTime<Utc> {
        let millis = self.ping_sent_at.load(Ordering::Relaxed);
        DateTime::from_timestamp_millis(millis).unwrap_or(self.connected_at)
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        let millis = self.last_activity_at.load(Ordering::Relaxed);
        DateTime::from_timestamp_millis(millis).unwrap_or(self.connected_at)
    }

    /// Invariant 6 (spec.md §8): strikes strictly increase on a missed
    /// pong and reset to zero on any activity.
    pub fn record_missed_pong(&self) -> u32 {
        self.heartbeat_strikes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_heartbeat_strikes(&self) {
        self.heartbeat_strikes.store(0, Ordering::Relaxed);
    }

    pub fn heartbeat_strikes(&self) -> u32 {
        self.heartbeat_strikes.load(Ordering::Relaxed)
    }

    /// Decrements the rate-limit budget, returning the remaining count.
    /// Saturates at zero rather than wrapping.
    pub fn consume_budget(&self) -> u32 {
        loop {
            let current = self.message_budget.load(Ordering::Relaxed);
            if current == 0 {
                return 0;
            }
            let next = current - 1;
            if self
                .message_budget
                .compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return next;
            }
        }
    }

    /// Decrements the budget only if it is still positive. Returns
    /// `false` when the budget was already exhausted, distinguishing
    /// the frame that exhausts it (processed normally, spec.md §8 S4)
    /// from the next one (rejected with `rate_limit_exceeded`).
    pub fn try_consume_budget(&self) -> bool {
        loop {
            let current = self.message_budget.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            let next = current - 1;
            if self
                .message_budget
                .compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Resets the budget back to this connection's own ceiling
    /// (invariant 5, spec.md §8). The ceiling is fixed at construction
    /// time from the endpoint's resolved per-connection rate limit, so
    /// a single process-wide reset timer can service every connection
    /// regardless of which endpoint it belongs to.
    pub fn reset_budget(&self) {
        let ceiling = self.budget_ceiling.load(Ordering::Relaxed);
        self.message_budget.store(ceiling, Ordering::Relaxed);
    }

    pub fn subscriptions(&self) -> HashSet<String> {
        self.subscriptions.read().clone()
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.read().contains(channel)
    }

    pub fn add_subscription(&self, channel: impl Into<String>) {
        self.subscriptions.write().insert(channel.into());
    }

    pub fn remove_subscription(&self, channel: &str) {
        self.subscriptions.write().remove(channel);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub async fn send(&self, message: Message) -> Result<(), mpsc::error::SendError<Message>> {
        self.sender.send(message).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), mpsc::error::SendError<Message>> {
        self.send(Message::Text(text.into().into())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_connection() -> Connection {
        let (tx, _rx) = mpsc::channel(32);
        Connection::new(tx, 3)
    }

    #[test]
    fn budget_saturates_at_zero() {
        let conn = test_connection();
        assert_eq!(conn.consume_budget(), 2);
        assert_eq!(conn.consume_budget(), 1);
        assert_eq!(conn.consume_budget(), 0);
        assert_eq!(conn.consume_budget(), 0);
    }

    #[test]
    fn heartbeat_strikes_increase_and_reset() {
        let conn = test_connection();
        assert_eq!(conn.record_missed_pong(), 1);
        assert_eq!(conn.record_missed_pong(), 2);
        conn.reset_heartbeat_strikes();
        assert_eq!(conn.heartbeat_strikes(), 0);
    }

    #[test]
    fn request_close_cancels_the_shutdown_token() {
        let conn = test_connection();
        let token = conn.shutdown_token();
        assert!(!token.is_cancelled());
        conn.request_close();
        assert!(token.is_cancelled());
    }

    #[test]
    fn heartbeat_timing_defaults_then_overrides() {
        let conn = test_connection();
        assert_eq!(conn.heartbeat_interval(), DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(conn.heartbeat_timeout(), DEFAULT_HEARTBEAT_TIMEOUT);

        let conn = conn.with_heartbeat_timing(Duration::from_secs(5), Duration::from_secs(2));
        assert_eq!(conn.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(conn.heartbeat_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn subscription_set_round_trips() {
        let conn = test_connection();
        conn.add_subscription("public.tokens");
        assert!(conn.is_subscribed("public.tokens"));
        conn.remove_subscription("public.tokens");
        assert!(!conn.is_subscribed("public.tokens"));
    }
}
