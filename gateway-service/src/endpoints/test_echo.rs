//! Diagnostic echo endpoint (SPEC_FULL.md §4.8 supplement for the
//! spec's `test` endpoint), used by this crate's own integration tests
//! to exercise the shared engine without any backend dependency.
//! `auth_required=false` is set in its [`EndpointConfig`], never bypassed
//! in code (spec.md §9 Open Question: test-mode overrides live only in
//! configuration).

use std::sync::Arc;

use async_trait::async_trait;

use gateway_core::config::EndpointConfig;
use gateway_core::engine::connection::Connection;
use gateway_core::engine::endpoint::{Endpoint, GatewayContext};
use gateway_core::engine::message::{ClientMessage, ServerMessage};
use gateway_core::error::Result;

pub struct TestEchoEndpoint {
    config: EndpointConfig,
}

impl TestEchoEndpoint {
    pub fn new(config: EndpointConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Endpoint for TestEchoEndpoint {
    fn config(&self) -> &EndpointConfig {
        &self.config
    }

    async fn on_message(&self, _ctx: &GatewayContext, _conn: &Arc<Connection>, message: ClientMessage) -> Result<Option<ServerMessage>> {
        Ok(Some(ServerMessage::reply(
            "echo",
            message.data.unwrap_or(serde_json::Value::Null),
            message.request_id,
        )))
    }
}
