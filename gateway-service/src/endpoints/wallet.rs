//! Wallet endpoint (spec.md §4.8): maintains per-principal `wallet.<id>`
//! and `balance.<id>` channels, invalidating its cache on
//! `balance:updated`/`transaction:confirmed` and refreshing actively
//! subscribed wallets on a periodic sweep.

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

use crate::backend::BalanceProvider;
use crate::endpoints::cache::TtlCache;

const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

pub struct WalletEndpoint {
    config: EndpointConfig,
    balances: Arc<dyn BalanceProvider>,
    cache: Arc<TtlCache<f64>>,
    watched: Arc<DashSet<String>>,
    cancel: CancellationToken,
}

impl WalletEndpoint {
    pub fn new(config: EndpointConfig, balances: Arc<dyn BalanceProvider>) -> Self {
        Self {
            config,
            balances,
            cache: Arc::new(TtlCache::new(chrono::Duration::seconds(30))),
            watched: Arc::new(DashSet::new()),
            cancel: CancellationToken::new(),
        }
    }

    fn watch_from_channel(channel: &str) -> Option<&str> {
        channel.strip_prefix("wallet.").or_else(|| channel.strip_prefix("balance."))
    }
}

#[async_trait]
impl Endpoint for WalletEndpoint {
    fn config(&self) -> &EndpointConfig {
        &self.config
    }

    async fn on_init(&self, ctx: &GatewayContext) -> Result<()> {
        let channels = ctx.channels.clone();
        let metrics = ctx.metrics.clone();
        let cache = self.cache.clone();

        let handler = move |event: &gateway_core::bus::Event| {
            let Some(wallet_id) = event.payload.get("walletId").and_then(Value::as_str) else {
                return;
            };
            cache.invalidate(wallet_id);
            let data = event.payload.clone();
            for channel in [format!("wallet.{wallet_id}"), format!("balance.{wallet_id}")] {
                channels.broadcast(&channel, ServerMessage::data_frame("balance_update", &channel, data.clone()), &metrics);
            }
        };
        ctx.bus.subscribe(EventName::BalanceUpdated, handler.clone());
        ctx.bus.subscribe(EventName::TransactionConfirmed, handler);

        let channels = ctx.channels.clone();
        let metrics = ctx.metrics.clone();
        let balances = self.balances.clone();
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
                            let channel = format!("balance.{wallet_id}");
                            if channels.subscriber_count(&channel) == 0 {
                                continue;
                            }
                            let Some(balance) = balances.get_balance(&wallet_id).await else { continue };
                            cache.insert(wallet_id.clone(), balance);
                            channels.broadcast(
                                &channel,
                                ServerMessage::data_frame("balance_update", &channel, serde_json::json!({"walletId": wallet_id, "balance": balance})),
                                &metrics,
                            );
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn on_message(&self, _ctx: &GatewayContext, _conn: &Arc<Connection>, message: ClientMessage) -> Result<Option<ServerMessage>> {
        match message.kind.as_str() {
            "get_balance" => {
                let wallet_id = message
                    .data
                    .as_ref()
                    .and_then(|d| d.get("walletId"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Protocol("get_balance requires data.walletId".to_string()))?;

                let balance = match self.cache.get(wallet_id) {
                    Some(b) => Some(b),
                    None => {
                        let fetched = self.balances.get_balance(wallet_id).await;
                        if let Some(b) = fetched {
                            self.cache.insert(wallet_id, b);
                        }
                        fetched
                    }
                };

                Ok(Some(ServerMessage::reply(
                    "balance",
                    serde_json::json!({ "walletId": wallet_id, "balance": balance }),
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
            let still_watched = ctx.channels.subscriber_count(&format!("wallet.{wallet_id}")) > 0
                || ctx.channels.subscriber_count(&format!("balance.{wallet_id}")) > 0;
            if !still_watched {
                self.watched.remove(wallet_id);
            }
        }
    }

    async fn on_cleanup(&self, _ctx: &GatewayContext) {
        self.cancel.cancel();
    }
}
