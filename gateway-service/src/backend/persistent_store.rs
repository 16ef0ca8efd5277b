//! Persistent store backend contract (spec.md §6): "read-only queries
//! for user records, holdings, trades, snapshots, settings, service
//! configuration." The real store is out of scope (spec.md §1); this
//! in-memory fake also implements [`UserDirectory`] so it can feed
//! [`AuthVerifier`](gateway_core::auth::verifier::AuthVerifier) directly.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_core::auth::verifier::UserDirectory;
use gateway_core::auth::Role;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub wallet_address: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub wallet_address: String,
    pub symbol: String,
    pub size: f64,
    pub price: f64,
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get_user(&self, wallet_address: &str) -> Option<UserRecord>;
    async fn get_trades_for_wallet(&self, wallet_address: &str) -> Vec<TradeRecord>;
}

/// Backed by two `DashMap`s so it can be shared cheaply: one clone feeds
/// `AuthVerifier` as a `UserDirectory`, another is held by endpoints that
/// need trade history.
#[derive(Clone, Default)]
pub struct InMemoryPersistentStore {
    users: Arc<DashMap<String, UserRecord>>,
    trades: Arc<DashMap<String, Vec<TradeRecord>>>,
}

impl InMemoryPersistentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_user(&self, record: UserRecord) {
        self.users.insert(record.wallet_address.clone(), record);
    }

    pub fn record_trade(&self, trade: TradeRecord) {
        self.trades.entry(trade.wallet_address.clone()).or_default().push(trade);
    }
}

#[async_trait]
impl PersistentStore for InMemoryPersistentStore {
    async fn get_user(&self, wallet_address: &str) -> Option<UserRecord> {
        self.users.get(wallet_address).map(|entry| entry.value().clone())
    }

    async fn get_trades_for_wallet(&self, wallet_address: &str) -> Vec<TradeRecord> {
        self.trades.get(wallet_address).map(|entry| entry.value().clone()).unwrap_or_default()
    }
}

/// The persistent store is the source of truth for role resolution
/// (spec.md §4.2) — `AuthVerifier` depends only on this trait, never on
/// the concrete fake.
#[async_trait]
impl UserDirectory for InMemoryPersistentStore {
    async fn resolve_role(&self, wallet_address: &str) -> Option<Role> {
        self.users.get(wallet_address).map(|entry| entry.value().role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_role_for_known_wallet_only() {
        let store = InMemoryPersistentStore::new();
        store.upsert_user(UserRecord {
            wallet_address: "0xabc".into(),
            role: Role::Admin,
        });

        assert_eq!(UserDirectory::resolve_role(&store, "0xabc").await, Some(Role::Admin));
        assert_eq!(UserDirectory::resolve_role(&store, "0xdef").await, None);
    }

    #[tokio::test]
    async fn trades_accumulate_per_wallet() {
        let store = InMemoryPersistentStore::new();
        store.record_trade(TradeRecord {
            id: "t1".into(),
            wallet_address: "0xabc".into(),
            symbol: "SOL".into(),
            size: 1.0,
            price: 145.0,
        });
        store.record_trade(TradeRecord {
            id: "t2".into(),
            wallet_address: "0xabc".into(),
            symbol: "SOL".into(),
            size: 2.0,
            price: 146.0,
        });

        assert_eq!(store.get_trades_for_wallet("0xabc").await.len(), 2);
        assert!(store.get_trades_for_wallet("0xdef").await.is_empty());
    }
}
