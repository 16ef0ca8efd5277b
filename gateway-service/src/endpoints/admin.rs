//! Admin/Service-control endpoint (spec.md §4.8, §4.10, scenario S6).
//!
//! Accepts `service_command {serviceName, command}` for admin/superadmin
//! principals, executes it against the service-control backend, replies
//! with the result, and broadcasts the resulting status to every
//! subscriber of that service's channel.

use std::sync::Arc;

use async_trait::async_trait;

use gateway_core::auth::Role;
use gateway_core::config::EndpointConfig;
use gateway_core::engine::connection::Connection;
use gateway_core::engine::endpoint::{Endpoint, GatewayContext};
use gateway_core::engine::message::{ClientMessage, ServerMessage};
use gateway_core::error::{Error, Result};

use crate::backend::ServiceControl;

pub struct AdminEndpoint {
    config: EndpointConfig,
    control: Arc<dyn ServiceControl>,
}

impl AdminEndpoint {
    pub fn new(config: EndpointConfig, control: Arc<dyn ServiceControl>) -> Self {
        Self { config, control }
    }

    fn service_channel(service_name: &str) -> String {
        format!("admin.service.{service_name}")
    }
}

#[async_trait]
impl Endpoint for AdminEndpoint {
    fn config(&self) -> &EndpointConfig {
        &self.config
    }

    async fn on_message(&self, ctx: &GatewayContext, conn: &Arc<Connection>, message: ClientMessage) -> Result<Option<ServerMessage>> {
        match message.kind.as_str() {
            "service_command" => {
                if !conn.principal.role().map(Role::is_admin_or_above).unwrap_or(false) {
                    return Err(Error::Authorization("admin or superadmin role required".to_string()));
                }

                let data = message.data.as_ref().ok_or_else(|| Error::Protocol("service_command requires data".to_string()))?;
                let service_name = data
                    .get("serviceName")
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| Error::Protocol("service_command requires data.serviceName".to_string()))?;
                let command = data
                    .get("command")
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| Error::Protocol("service_command requires data.command".to_string()))?;

                let outcome = match command {
                    "start" => self.control.start(service_name).await,
                    "stop" => self.control.stop(service_name).await,
                    "restart" => self.control.restart(service_name).await,
                    "reset_circuit_breaker" => self.control.reset_circuit_breaker(service_name).await,
                    other => return Err(Error::Protocol(format!("unknown service command: {other}"))),
                };

                tracing::info!(
                    connection_id = %conn.id,
                    wallet_id = ?conn.principal.wallet_id(),
                    service = service_name,
                    command,
                    ok = outcome.is_ok(),
                    "admin service command"
                );

                if let Err(e) = outcome {
                    return Err(Error::Upstream(e));
                }

                let status = self.control.get_service(service_name).await;
                let channel = Self::service_channel(service_name);
                if let Some(status) = &status {
                    ctx.channels.broadcast(
                        &channel,
                        ServerMessage::data_frame("service_status", &channel, serde_json::to_value(status).unwrap_or(serde_json::Value::Null)),
                        &ctx.metrics,
                    );
                }

                Ok(Some(ServerMessage::reply(
                    "service_command_result",
                    serde_json::json!({
                        "serviceName": service_name,
                        "command": command,
                        "result": status,
                    }),
                    message.request_id,
                )))
            }
            "get_all_services" => {
                let services = self.control.get_all_services().await;
                Ok(Some(ServerMessage::reply(
                    "all_services",
                    serde_json::to_value(services).unwrap_or(serde_json::Value::Null),
                    message.request_id,
                )))
            }
            other => Err(Error::Protocol(format!("unknown message type: {other}"))),
        }
    }
}
