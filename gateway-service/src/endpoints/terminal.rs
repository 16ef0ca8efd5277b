//! Terminal endpoint (spec.md §4.8): caches a pre-computed content
//! bundle, re-broadcasting on `terminal:broadcast` and sending the
//! cached bundle to newly connected clients if it is fresh enough.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use gateway_core::bus::EventName;
use gateway_core::config::EndpointConfig;
use gateway_core::engine::connection::Connection;
use gateway_core::engine::endpoint::{Endpoint, GatewayContext};
use gateway_core::engine::message::{ClientMessage, ServerMessage};
use gateway_core::error::{Error, Result};

const BUNDLE_TTL: chrono::Duration = chrono::Duration::minutes(5);
const TERMINAL_CHANNEL: &str = "public.terminal";

pub struct TerminalEndpoint {
    config: EndpointConfig,
    bundle: Arc<RwLock<Option<(Value, DateTime<Utc>)>>>,
}

impl TerminalEndpoint {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            bundle: Arc::new(RwLock::new(None)),
        }
    }

    fn fresh_bundle(&self) -> Option<Value> {
        let guard = self.bundle.read();
        let (data, inserted_at) = guard.as_ref()?;
        if Utc::now() - *inserted_at > BUNDLE_TTL {
            return None;
        }
        Some(data.clone())
    }
}

#[async_trait]
impl Endpoint for TerminalEndpoint {
    fn config(&self) -> &EndpointConfig {
        &self.config
    }

    async fn on_init(&self, ctx: &GatewayContext) -> Result<()> {
        let bundle = self.bundle.clone();
        let channels = ctx.channels.clone();
        let metrics = ctx.metrics.clone();

        ctx.bus.subscribe(EventName::TerminalBroadcast, move |event| {
            *bundle.write() = Some((event.payload.clone(), Utc::now()));
            channels.broadcast(
                TERMINAL_CHANNEL,
                ServerMessage::data_frame("terminal_update", TERMINAL_CHANNEL, event.payload.clone()),
                &metrics,
            );
        });

        Ok(())
    }

    async fn on_connection(&self, _ctx: &GatewayContext, conn: &Arc<Connection>) -> Result<()> {
        if let Some(bundle) = self.fresh_bundle() {
            let _ = conn
                .send_text(ServerMessage::data_frame("terminal_bundle", TERMINAL_CHANNEL, bundle).to_json())
                .await;
        }
        Ok(())
    }

    async fn on_message(&self, _ctx: &GatewayContext, _conn: &Arc<Connection>, message: ClientMessage) -> Result<Option<ServerMessage>> {
        match message.kind.as_str() {
            "get_terminal_bundle" => Ok(Some(ServerMessage::reply(
                "terminal_bundle",
                self.fresh_bundle().unwrap_or(Value::Null),
                message.request_id,
            ))),
            other => Err(Error::Protocol(format!("unknown message type: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::auth::verifier::AuthMode;

    fn test_config() -> EndpointConfig {
        EndpointConfig {
            path: "/terminal".to_string(),
            auth_required: false,
            auth_mode: AuthMode::Auto,
            required_role: None,
            public_channels: vec![TERMINAL_CHANNEL.to_string()],
            max_payload_bytes: 64 * 1024,
            rate_limit_per_minute: None,
            heartbeat_interval_secs: None,
            heartbeat_timeout_secs: None,
        }
    }

    #[test]
    fn stale_bundle_reads_as_absent() {
        let endpoint = TerminalEndpoint::new(test_config());
        *endpoint.bundle.write() = Some((serde_json::json!({"a":1}), Utc::now() - chrono::Duration::minutes(6)));
        assert!(endpoint.fresh_bundle().is_none());
    }

    #[test]
    fn fresh_bundle_round_trips() {
        let endpoint = TerminalEndpoint::new(test_config());
        *endpoint.bundle.write() = Some((serde_json::json!({"a":1}), Utc::now()));
        assert_eq!(endpoint.fresh_bundle(), Some(serde_json::json!({"a":1})));
    }
}
