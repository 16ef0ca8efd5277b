//! Rate Limiter half of C3 (spec.md §4.3).
//!
//! A fixed per-window budget, decremented per inbound frame and reset
//! by a single process-wide timer — not a token-bucket refill. This is
//! a deliberate departure from the teacher's `governor`-backed
//! middleware; see DESIGN.md.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::registry::ClientRegistry;
use crate::config::RateLimitConfig;

/// Runs the process-wide reset timer until `cancel` fires.
///
/// Invariant 5 (spec.md §8): budgets are monotonic non-decreasing
/// within a window and reset to zero — here, back to the configured
/// ceiling — at window boundaries.
pub async fn run_reset_loop(registry: Arc<ClientRegistry>, config: RateLimitConfig, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(config.window_secs));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                for id in registry.iter_ids() {
                    if let Some(conn) = registry.get(&id) {
                        conn.reset_budget();
                    }
                }
                tracing::debug!("rate limit window reset");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::connection::Connection;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn reset_loop_restores_budget_after_consumption() {
        let registry = Arc::new(ClientRegistry::new());
        let (tx, _rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(tx, 2));
        let id = conn.id.clone();
        conn.consume_budget();
        conn.consume_budget();
        assert_eq!(conn.consume_budget(), 0);
        registry.insert(conn);

        let config = RateLimitConfig {
            budget_per_window: 2,
            window_secs: 60,
        };
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(run_reset_loop(registry.clone(), config, cancel_clone));

        tokio::time::pause();
        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        let conn = registry.get(&id).unwrap();
        assert_eq!(conn.consume_budget(), 1);

        cancel.cancel();
        let _ = handle.await;
    }
}
