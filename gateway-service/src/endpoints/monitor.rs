//! Monitor endpoint (spec.md §4.8): caches system status, maintenance
//! flag, settings, and per-service health; auto-subscribes admins to
//! admin channels and anonymous connections to the public background
//! scene channel; retains a bounded ring of recent errors.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use gateway_core::auth::Role;
use gateway_core::bus::EventName;
use gateway_core::config::EndpointConfig;
use gateway_core::engine::connection::Connection;
use gateway_core::engine::endpoint::{Endpoint, GatewayContext};
use gateway_core::engine::message::{ClientMessage, ServerMessage};
use gateway_core::error::{Error, Result};

const RECENT_ERRORS_CAPACITY: usize = 100;
const PUBLIC_BACKGROUND_CHANNEL: &str = "public.background_scene";
const ADMIN_SERVICES_CHANNEL: &str = "admin.services";

#[derive(Default)]
struct MonitorState {
    maintenance: RwLock<Option<Value>>,
    settings: RwLock<Option<Value>>,
    services: RwLock<std::collections::HashMap<String, Value>>,
    recent_errors: Mutex<VecDeque<Value>>,
}

pub struct MonitorEndpoint {
    config: EndpointConfig,
    state: Arc<MonitorState>,
}

impl MonitorEndpoint {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            state: Arc::new(MonitorState::default()),
        }
    }
}

#[async_trait]
impl Endpoint for MonitorEndpoint {
    fn config(&self) -> &EndpointConfig {
        &self.config
    }

    async fn on_init(&self, ctx: &GatewayContext) -> Result<()> {
        let state = self.state.clone();
        ctx.bus.subscribe(EventName::MaintenanceUpdate, move |event| {
            *state.maintenance.write() = Some(event.payload.clone());
        });

        let state = self.state.clone();
        ctx.bus.subscribe(EventName::SystemSettingsUpdate, move |event| {
            *state.settings.write() = Some(event.payload.clone());
        });

        let state = self.state.clone();
        let channels = ctx.channels.clone();
        let metrics = ctx.metrics.clone();
        ctx.bus.subscribe(EventName::ServiceStatusUpdate, move |event| {
            if let Some(name) = event.payload.get("name").and_then(Value::as_str) {
                state.services.write().insert(name.to_string(), event.payload.clone());
            }
            channels.broadcast(
                ADMIN_SERVICES_CHANNEL,
                ServerMessage::data_frame("service_status", ADMIN_SERVICES_CHANNEL, event.payload.clone()),
                &metrics,
            );
        });

        let state = self.state.clone();
        ctx.bus.subscribe(EventName::ServiceInitialized, move |event| {
            if let Some(name) = event.payload.get("name").and_then(Value::as_str) {
                state.services.write().insert(name.to_string(), event.payload.clone());
            }
        });

        let state = self.state.clone();
        ctx.bus.subscribe(EventName::ServiceError, move |event| {
            let mut errors = state.recent_errors.lock();
            if errors.len() == RECENT_ERRORS_CAPACITY {
                errors.pop_front();
            }
            errors.push_back(event.payload.clone());
        });

        let state = self.state.clone();
        ctx.bus.subscribe(EventName::ServiceCircuitBreaker, move |event| {
            if let Some(name) = event.payload.get("name").and_then(Value::as_str) {
                state.services.write().insert(name.to_string(), event.payload.clone());
            }
        });

        Ok(())
    }

    async fn on_connection(&self, ctx: &GatewayContext, conn: &Arc<Connection>) -> Result<()> {
        if conn.principal.role().map(Role::is_admin_or_above).unwrap_or(false) {
            ctx.channels.subscribe(ADMIN_SERVICES_CHANNEL, conn.clone());
            conn.add_subscription(ADMIN_SERVICES_CHANNEL);
            ctx.metrics.channel_subscriber_inc(ADMIN_SERVICES_CHANNEL);
        } else if !conn.is_authenticated() {
            ctx.channels.subscribe(PUBLIC_BACKGROUND_CHANNEL, conn.clone());
            conn.add_subscription(PUBLIC_BACKGROUND_CHANNEL);
            ctx.metrics.channel_subscriber_inc(PUBLIC_BACKGROUND_CHANNEL);
        }
        Ok(())
    }

    async fn on_message(&self, _ctx: &GatewayContext, _conn: &Arc<Connection>, message: ClientMessage) -> Result<Option<ServerMessage>> {
        match message.kind.as_str() {
            "errors_recent" => {
                let errors: Vec<Value> = self.state.recent_errors.lock().iter().cloned().collect();
                Ok(Some(ServerMessage::reply("errors_recent", serde_json::json!(errors), message.request_id)))
            }
            "get_status" => {
                let maintenance = self.state.maintenance.read().clone();
                let settings = self.state.settings.read().clone();
                let services: Vec<Value> = self.state.services.read().values().cloned().collect();
                Ok(Some(ServerMessage::reply(
                    "status",
                    serde_json::json!({ "maintenance": maintenance, "settings": settings, "services": services }),
                    message.request_id,
                )))
            }
            other => Err(Error::Protocol(format!("unknown message type: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_errors_bounds_to_capacity() {
        let state = MonitorState::default();
        for i in 0..(RECENT_ERRORS_CAPACITY + 10) {
            let mut errors = state.recent_errors.lock();
            if errors.len() == RECENT_ERRORS_CAPACITY {
                errors.pop_front();
            }
            errors.push_back(serde_json::json!({ "i": i }));
        }
        assert_eq!(state.recent_errors.lock().len(), RECENT_ERRORS_CAPACITY);
    }
}
