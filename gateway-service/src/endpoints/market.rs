//! Market/Token endpoint (spec.md §4.8).
//!
//! On `market:broadcast`, fans out to `public.tokens`/`public.market`
//! plus per-symbol `token.<symbol>` channels, but only the ones that
//! currently have subscribers. Client-driven symbol subscriptions are
//! validated against the token catalog before the per-symbol channel is
//! created.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use gateway_core::bus::EventName;
use gateway_core::config::EndpointConfig;
use gateway_core::engine::connection::Connection;
use gateway_core::engine::endpoint::{Endpoint, GatewayContext};
use gateway_core::engine::message::{ClientMessage, ServerMessage};
use gateway_core::error::{Error, Result};

use crate::backend::TokenCatalog;

pub struct MarketEndpoint {
    config: EndpointConfig,
    catalog: Arc<dyn TokenCatalog>,
}

impl MarketEndpoint {
    pub fn new(config: EndpointConfig, catalog: Arc<dyn TokenCatalog>) -> Self {
        Self { config, catalog }
    }
}

#[async_trait]
impl Endpoint for MarketEndpoint {
    fn config(&self) -> &EndpointConfig {
        &self.config
    }

    async fn on_init(&self, ctx: &GatewayContext) -> Result<()> {
        let channels = ctx.channels.clone();
        let metrics = ctx.metrics.clone();

        ctx.bus.subscribe(EventName::MarketBroadcast, move |event| {
            let Some(items) = event.payload.get("data").and_then(Value::as_array) else {
                return;
            };

            channels.broadcast(
                "public.tokens",
                ServerMessage::data_frame("token_update", "public.tokens", Value::Array(items.clone())),
                &metrics,
            );
            channels.broadcast(
                "public.market",
                ServerMessage::data_frame("token_update", "public.market", Value::Array(items.clone())),
                &metrics,
            );

            for item in items {
                let Some(symbol) = item.get("symbol").and_then(Value::as_str) else {
                    continue;
                };
                let channel = format!("token.{symbol}");
                if channels.subscriber_count(&channel) > 0 {
                    channels.broadcast(&channel, ServerMessage::data_frame("token_update", &channel, item.clone()), &metrics);
                }
            }
        });

        Ok(())
    }

    async fn on_message(&self, ctx: &GatewayContext, conn: &Arc<Connection>, message: ClientMessage) -> Result<Option<ServerMessage>> {
        match message.kind.as_str() {
            "subscribe_tokens" => {
                let symbols = symbols_from(&message)?;
                let mut subscribed = Vec::new();
                for symbol in symbols {
                    if self.catalog.get_token(&symbol).await.is_none() {
                        continue;
                    }
                    let channel = format!("token.{symbol}");
                    ctx.channels.subscribe(&channel, conn.clone());
                    conn.add_subscription(channel.clone());
                    ctx.metrics.channel_subscriber_inc(&channel);
                    subscribed.push(symbol);
                }
                Ok(Some(ServerMessage::reply(
                    "tokens_subscribed",
                    serde_json::json!({ "symbols": subscribed }),
                    message.request_id,
                )))
            }
            "unsubscribe_tokens" => {
                let symbols = symbols_from(&message)?;
                for symbol in &symbols {
                    let channel = format!("token.{symbol}");
                    ctx.channels.unsubscribe(&channel, &conn.id);
                    conn.remove_subscription(&channel);
                    ctx.metrics.channel_subscriber_dec(&channel);
                }
                Ok(Some(ServerMessage::reply(
                    "tokens_unsubscribed",
                    serde_json::json!({ "symbols": symbols }),
                    message.request_id,
                )))
            }
            "get_token" => {
                let symbol = message
                    .data
                    .as_ref()
                    .and_then(|d| d.get("symbol"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Protocol("get_token requires data.symbol".to_string()))?;
                let token = self
                    .catalog
                    .get_token(symbol)
                    .await
                    .ok_or_else(|| Error::NotFound(format!("unknown token: {symbol}")))?;
                Ok(Some(ServerMessage::reply(
                    "token",
                    serde_json::to_value(token).unwrap_or(Value::Null),
                    message.request_id,
                )))
            }
            "get_all_tokens" => {
                let tokens = self.catalog.get_all_tokens().await;
                Ok(Some(ServerMessage::reply(
                    "all_tokens",
                    serde_json::to_value(tokens).unwrap_or(Value::Null),
                    message.request_id,
                )))
            }
            other => Err(Error::Protocol(format!("unknown message type: {other}"))),
        }
    }
}

fn symbols_from(message: &ClientMessage) -> Result<Vec<String>> {
    let symbols = message
        .data
        .as_ref()
        .and_then(|d| d.get("symbols"))
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Protocol("expected data.symbols array".to_string()))?;
    Ok(symbols.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_from_rejects_missing_field() {
        let msg = ClientMessage::parse(r#"{"type":"subscribe_tokens"}"#).unwrap();
        assert!(symbols_from(&msg).is_err());
    }

    #[test]
    fn symbols_from_extracts_string_list() {
        let msg = ClientMessage::parse(r#"{"type":"subscribe_tokens","data":{"symbols":["SOL","ETH"]}}"#).unwrap();
        assert_eq!(symbols_from(&msg).unwrap(), vec!["SOL".to_string(), "ETH".to_string()]);
    }
}
