//! Portfolio endpoint (spec.md §4.8, scenario S5): maintains
//! per-principal `portfolio.<id>` and `trades.<id>` channels. A
//! `trade:executed` event emits `trade_executed` on `trades.<id>` and,
//! after refreshing the cached snapshot, `portfolio_update` on
//! `portfolio.<id>`; a `portfolio:updated` event broadcasts directly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use gateway_core::bus::EventName;
use gateway_core::config::EndpointConfig;
use gateway_core::engine::connection::Connection;
use gateway_core::engine::endpoint::{Endpoint, GatewayContext};
use gateway_core::engine::message::{ClientMessage, ServerMessage};
use gateway_core::error::{Error, Result};

use crate::backend::{PersistentStore, TradeRecord};
use crate::endpoints::cache::TtlCache;

const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

pub struct PortfolioEndpoint {
    config: EndpointConfig,
    store: Arc<dyn PersistentStore>,
    cache: Arc<TtlCache<Vec<TradeRecord>>>,
    watched: Arc<DashSet<String>>,
    cancel: CancellationToken,
}

impl PortfolioEndpoint {
    pub fn new(config: EndpointConfig, store: Arc<dyn PersistentStore>) -> Self {
        Self {
            config,
            store,
            cache: Arc::new(TtlCache::new(chrono::Duration::seconds(30))),
            watched: Arc::new(DashSet::new()),
            cancel: CancellationToken::new(),
        }
    }

    fn watch_from_channel(channel: &str) -> Option<&str> {
        channel.strip_prefix("portfolio.").or_else(|| channel.strip_prefix("trades."))
    }

    async fn refresh_and_broadcast(
        store: &Arc<dyn PersistentStore>,
        cache: &TtlCache<Vec<TradeRecord>>,
        channels: &gateway_core::engine::broadcast::ChannelRegistry,
        metrics: &gateway_core::metrics::Metrics,
        wallet_id: &str,
    ) {
        let trades = store.get_trades_for_wallet(wallet_id).await;
        cache.insert(wallet_id, trades.clone());
        let channel = format!("portfolio.{wallet_id}");
        channels.broadcast(
            &channel,
            ServerMessage::data_frame("portfolio_update", &channel, serde_json::to_value(&trades).unwrap_or(Value::Null)),
            metrics,
        );
    }
}

#[async_trait]
impl Endpoint for PortfolioEndpoint {
    fn config(&self) -> &EndpointConfig {
        &self.config
    }

    async fn on_init(&self, ctx: &GatewayContext) -> Result<()> {
        let channels = ctx.channels.clone();
        let metrics = ctx.metrics.clone();
        let store = self.store.clone();
        let cache = self.cache.clone();

        ctx.bus.subscribe(EventName::TradeExecuted, move |event| {
            let Some(wallet_id) = event.payload.get("walletId").and_then(Value::as_str).map(str::to_string) else {
                return;
            };
            let trades_channel = format!("trades.{wallet_id}");
            channels.broadcast(
                &trades_channel,
                ServerMessage::data_frame("trade_executed", &trades_channel, event.payload.clone()),
                &metrics,
            );

            let channels = channels.clone();
            let metrics = metrics.clone();
            let store = store.clone();
            let cache = cache.clone();
            tokio::spawn(async move {
                PortfolioEndpoint::refresh_and_broadcast(&store, &cache, &channels, &metrics, &wallet_id).await;
            });
        });

        let channels = ctx.channels.clone();
        let metrics = ctx.metrics.clone();
        ctx.bus.subscribe(EventName::PortfolioUpdated, move |event| {
            let Some(wallet_id) = event.payload.get("walletId").and_then(Value::as_str) else {
                return;
            };
            let channel = format!("portfolio.{wallet_id}");
            channels.broadcast(&channel, ServerMessage::data_frame("portfolio_update", &channel, event.payload.clone()), &metrics);
        });

        let channels = ctx.channels.clone();
        let metrics = ctx.metrics.clone();
        let store = self.store.clone();
        let cache = self.cache.clone();
        let watched = self.watched.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for wallet_id in watched.iter().map(|e| e.key().clone()) {
                            if channels.subscriber_count(&format!("portfolio.{wallet_id}")) == 0 {
                                continue;
                            }
                            PortfolioEndpoint::refresh_and_broadcast(&store, &cache, &channels, &metrics, &wallet_id).await;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn on_message(&self, _ctx: &GatewayContext, _conn: &Arc<Connection>, message: ClientMessage) -> Result<Option<ServerMessage>> {
        match message.kind.as_str() {
            "get_portfolio" => {
                let wallet_id = message
                    .data
                    .as_ref()
                    .and_then(|d| d.get("walletId"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Protocol("get_portfolio requires data.walletId".to_string()))?;

                let trades = match self.cache.get(wallet_id) {
                    Some(t) => t,
                    None => {
                        let fetched = self.store.get_trades_for_wallet(wallet_id).await;
                        self.cache.insert(wallet_id, fetched.clone());
                        fetched
                    }
                };

                Ok(Some(ServerMessage::reply(
                    "portfolio",
                    serde_json::to_value(trades).unwrap_or(Value::Null),
                    message.request_id,
                )))
            }
            other => Err(Error::Protocol(format!("unknown message type: {other}"))),
        }
    }

    async fn on_subscribe(&self, _ctx: &GatewayContext, _conn: &Arc<Connection>, channel: &str) {
        if let Some(wallet_id) = Self::watch_from_channel(channel) {
            self.watched.insert(wallet_id.to_string());
        }
    }

    async fn on_unsubscribe(&self, ctx: &GatewayContext, _conn: &Arc<Connection>, channel: &str) {
        if let Some(wallet_id) = Self::watch_from_channel(channel) {
            let still_watched = ctx.channels.subscriber_count(&format!("portfolio.{wallet_id}")) > 0
                || ctx.channels.subscriber_count(&format!("trades.{wallet_id}")) > 0;
            if !still_watched {
                self.watched.remove(wallet_id);
            }
        }
    }

    async fn on_cleanup(&self, _ctx: &GatewayContext) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_from_channel_strips_either_prefix() {
        assert_eq!(PortfolioEndpoint::watch_from_channel("portfolio.0xabc"), Some("0xabc"));
        assert_eq!(PortfolioEndpoint::watch_from_channel("trades.0xabc"), Some("0xabc"));
        assert_eq!(PortfolioEndpoint::watch_from_channel("public.tokens"), None);
    }
}
