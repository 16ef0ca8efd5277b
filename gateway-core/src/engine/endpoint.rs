//! Endpoint Specializations (C8, spec.md §4.8): the hook surface every
//! concrete endpoint implements on top of the shared engine.

use std::sync::Arc;

use async_trait::async_trait;

use super::connection::Connection;
use super::message::{ClientMessage, ServerMessage};
use crate::bus::SharedEventBus;
use crate::config::{EndpointConfig, HeartbeatConfig, RateLimitConfig};
use crate::engine::broadcast::ChannelRegistry;
use crate::engine::registry::ClientRegistry;
use crate::error::Result;
use crate::metrics::SharedMetrics;

/// Shared engine state every endpoint is handed at construction time.
///
/// Grounded on the teacher's `AppState` pattern (a single struct of
/// `Arc`-wrapped shared services threaded through every handler). The
/// client/channel registries, bus, and metrics are process-wide
/// singletons (spec.md §5); `rate_limit_defaults`/`heartbeat_defaults`
/// are carried alongside so the connection state machine can resolve
/// each new connection's own budget ceiling and heartbeat
/// interval/timeout from its endpoint's `EndpointConfig` override.
#[derive(Clone)]
pub struct GatewayContext {
    pub clients: Arc<ClientRegistry>,
    pub channels: Arc<ChannelRegistry>,
    pub bus: SharedEventBus,
    pub metrics: SharedMetrics,
    pub rate_limit_defaults: RateLimitConfig,
    pub heartbeat_defaults: HeartbeatConfig,
}

/// A named specialization of the core engine bound to one path
/// (spec.md §4.8). The base connection state machine (`engine::base`)
/// owns `heartbeat`, `subscribe`, and `unsubscribe`; every other inbound
/// message type is delegated to `on_message`.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Static configuration: auth requirement, auth mode, rate limits.
    fn config(&self) -> &EndpointConfig;

    /// Called once when the endpoint is registered, before it accepts
    /// any connections. Used to subscribe to bus events and start
    /// periodic refresh schedulers (spec.md §4.8, §9: "periodic refresh
    /// tasks are owned by the endpoint that needs them").
    async fn on_init(&self, _ctx: &GatewayContext) -> Result<()> {
        Ok(())
    }

    /// Called after a connection reaches `established`. Used to send an
    /// initial frame (e.g. the terminal endpoint's cached bundle).
    async fn on_connection(&self, _ctx: &GatewayContext, _conn: &Arc<Connection>) -> Result<()> {
        Ok(())
    }

    /// Called for every inbound message type the base doesn't own.
    /// Errors are translated to a `server_error` frame by the caller;
    /// the connection is never closed for an endpoint error (spec.md
    /// §4.8 failure policy).
    async fn on_message(
        &self,
        ctx: &GatewayContext,
        conn: &Arc<Connection>,
        message: ClientMessage,
    ) -> Result<Option<ServerMessage>>;

    /// Called after a connection leaves the registry.
    async fn on_close(&self, _ctx: &GatewayContext, _conn: &Arc<Connection>) {}

    /// Called after the base's own subscribe handling succeeds, so the
    /// endpoint can react (e.g. send an initial snapshot for the new
    /// channel).
    async fn on_subscribe(&self, _ctx: &GatewayContext, _conn: &Arc<Connection>, _channel: &str) {}

    /// Called after the base's own unsubscribe handling succeeds.
    async fn on_unsubscribe(&self, _ctx: &GatewayContext, _conn: &Arc<Connection>, _channel: &str) {}

    /// Called on server shutdown so periodic schedulers can be
    /// cancelled (spec.md §9: "the core guarantees `on_cleanup` runs to
    /// quiesce them").
    async fn on_cleanup(&self, _ctx: &GatewayContext) {}
}
