//! Heartbeat half of C3 (spec.md §4.3).
//!
//! A single process-wide timer sweeps every connection, but each
//! connection carries its own resolved `heartbeat_interval`/
//! `heartbeat_timeout` (`EndpointConfig::resolved_heartbeat_interval`/
//! `resolved_heartbeat_timeout`, set at connect time in
//! `engine::base::run_connection`), so endpoints with different
//! declared timings are serviced correctly by the one loop. A graded,
//! 3-strike tolerance for missed pongs avoids cycling connections on
//! transient network blips.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use tokio_util::sync::CancellationToken;

use super::message::CloseCode;
use super::registry::ClientRegistry;
use crate::config::HeartbeatConfig;
use crate::metrics::Metrics;

/// Sweep cadence, independent of any endpoint's configured interval or
/// timeout: fine-grained enough that a short per-endpoint override
/// (e.g. a test endpoint's sub-second timeout) is still observed
/// promptly by the single shared timer.
const SWEEP_TICK: Duration = Duration::from_secs(1);

/// Runs the process-wide heartbeat timer until `cancel` fires.
///
/// For each connection idle longer than its own `heartbeat_interval`,
/// sends a ping. If a ping is already outstanding and its own
/// `heartbeat_timeout` has elapsed without a pong, the strike count
/// increases; at `missed_tolerance` consecutive strikes the connection
/// is closed with `policy_violation` and reason `"heartbeat timeout"`
/// (spec.md §4.3, scenario S3).
pub async fn run_heartbeat_loop(
    registry: Arc<ClientRegistry>,
    config: HeartbeatConfig,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(SWEEP_TICK);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => sweep(&registry, &config, &metrics).await,
        }
    }
}

async fn sweep(registry: &ClientRegistry, config: &HeartbeatConfig, metrics: &Metrics) {
    let now = chrono::Utc::now();
    for id in registry.iter_ids() {
        let Some(conn) = registry.get(&id) else { continue };

        if conn.ping_outstanding() {
            let timeout = chrono::Duration::from_std(conn.heartbeat_timeout()).unwrap_or_default();
            if now - conn.ping_sent_at() < timeout {
                continue;
            }

            let strikes = conn.record_missed_pong();
            if strikes >= config.missed_tolerance {
                tracing::info!(connection_id = %conn.id, "closing connection after heartbeat timeout");
                metrics.abnormal_close();
                let close = Message::Close(Some(axum::extract::ws::CloseFrame {
                    code: CloseCode::PolicyViolation.as_u16(),
                    reason: "heartbeat timeout".into(),
                }));
                let _ = conn.send(close).await;
                // The close frame alone can't terminate an unresponsive
                // client's connection; signal the owning task directly
                // so cleanup (registry removal, on_close) still runs.
                conn.request_close();
                continue;
            }

            // Still within tolerance: re-ping immediately and wait out
            // another timeout window for this strike.
            conn.mark_ping_sent();
            let _ = conn.send(Message::Ping(Vec::new().into())).await;
            continue;
        }

        let idle = now - conn.last_activity_at();
        if idle < chrono::Duration::from_std(conn.heartbeat_interval()).unwrap_or_default() {
            continue;
        }

        conn.mark_ping_sent();
        let _ = conn.send(Message::Ping(Vec::new().into())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::connection::Connection;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn idle_connection_receives_a_ping_before_any_strikes() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(tx, 10).with_heartbeat_timing(Duration::ZERO, Duration::ZERO));
        registry.insert(conn);

        let config = HeartbeatConfig {
            interval_secs: 0,
            timeout_secs: 0,
            missed_tolerance: 3,
        };
        let metrics = Metrics::new();
        sweep(&registry, &config, &metrics).await;

        assert!(matches!(rx.recv().await, Some(Message::Ping(_))));
    }

    #[tokio::test]
    async fn third_strike_closes_with_policy_violation() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(tx, 10).with_heartbeat_timing(Duration::ZERO, Duration::ZERO));
        let shutdown = conn.shutdown_token();
        registry.insert(conn);

        let config = HeartbeatConfig {
            interval_secs: 0,
            timeout_secs: 0,
            missed_tolerance: 3,
        };
        let metrics = Metrics::new();
        sweep(&registry, &config, &metrics).await;
        assert!(rx.recv().await.is_some());
        sweep(&registry, &config, &metrics).await;
        assert!(rx.recv().await.is_some());
        sweep(&registry, &config, &metrics).await;
        assert!(rx.recv().await.is_some());
        sweep(&registry, &config, &metrics).await;

        match rx.recv().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, CloseCode::PolicyViolation.as_u16()),
            other => panic!("expected close frame, got {other:?}"),
        }
        assert!(shutdown.is_cancelled(), "the owning connection's shutdown token should be signalled");
    }

    #[tokio::test]
    async fn endpoints_with_different_resolved_timings_are_swept_independently() {
        let registry = ClientRegistry::new();
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        let fast = Arc::new(Connection::new(fast_tx, 10).with_heartbeat_timing(Duration::ZERO, Duration::ZERO));
        let (slow_tx, mut slow_rx) = mpsc::channel(8);
        let slow = Arc::new(Connection::new(slow_tx, 10).with_heartbeat_timing(Duration::from_secs(3600), Duration::from_secs(3600)));
        registry.insert(fast);
        registry.insert(slow);

        let config = HeartbeatConfig {
            interval_secs: 0,
            timeout_secs: 0,
            missed_tolerance: 3,
        };
        let metrics = Metrics::new();
        sweep(&registry, &config, &metrics).await;

        assert!(matches!(fast_rx.recv().await, Some(Message::Ping(_))));
        assert!(slow_rx.try_recv().is_err(), "connection with a long interval should not be pinged yet");
    }
}
