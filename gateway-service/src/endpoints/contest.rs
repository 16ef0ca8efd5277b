//! Contest/game endpoint (SPEC_FULL.md §4.8 supplement for the spec's
//! `skyduel` mention, which has no dedicated contract beyond "a
//! contest-style game-event endpoint"). Built the same way as the
//! market endpoint: bus events carrying a contest payload fan out to
//! `public.contests` plus per-contest `contest.<id>` channels that have
//! subscribers.
//!
//! There is no dedicated event name for contests in the closed bus
//! vocabulary (spec.md §3); contest updates ride on `service:status:update`
//! events tagged `"domain": "contest"`, the same status-broadcast path
//! the monitor endpoint observes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use gateway_core::bus::EventName;
use gateway_core::config::EndpointConfig;
use gateway_core::engine::connection::Connection;
use gateway_core::engine::endpoint::{Endpoint, GatewayContext};
use gateway_core::engine::message::{ClientMessage, ServerMessage};
use gateway_core::error::{Error, Result};

const PUBLIC_CONTESTS_CHANNEL: &str = "public.contests";

pub struct ContestEndpoint {
    config: EndpointConfig,
}

impl ContestEndpoint {
    pub fn new(config: EndpointConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Endpoint for ContestEndpoint {
    fn config(&self) -> &EndpointConfig {
        &self.config
    }

    async fn on_init(&self, ctx: &GatewayContext) -> Result<()> {
        let channels = ctx.channels.clone();
        let metrics = ctx.metrics.clone();

        ctx.bus.subscribe(EventName::ServiceStatusUpdate, move |event| {
            if event.payload.get("domain").and_then(Value::as_str) != Some("contest") {
                return;
            }

            channels.broadcast(
                PUBLIC_CONTESTS_CHANNEL,
                ServerMessage::data_frame("contest_update", PUBLIC_CONTESTS_CHANNEL, event.payload.clone()),
                &metrics,
            );

            if let Some(contest_id) = event.payload.get("contestId").and_then(Value::as_str) {
                let channel = format!("contest.{contest_id}");
                if channels.subscriber_count(&channel) > 0 {
                    channels.broadcast(&channel, ServerMessage::data_frame("contest_update", &channel, event.payload.clone()), &metrics);
                }
            }
        });

        Ok(())
    }

    async fn on_message(&self, _ctx: &GatewayContext, _conn: &Arc<Connection>, message: ClientMessage) -> Result<Option<ServerMessage>> {
        Err(Error::Protocol(format!("unknown message type: {}", message.kind)))
    }
}
