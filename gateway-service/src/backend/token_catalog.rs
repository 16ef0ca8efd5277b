//! Token catalog backend contract (spec.md §6): `get_all_tokens`,
//! `get_token`, `get_token_by_address`.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub symbol: String,
    pub address: String,
    pub price: f64,
}

#[async_trait]
pub trait TokenCatalog: Send + Sync {
    async fn get_all_tokens(&self) -> Vec<TokenRecord>;
    async fn get_token(&self, symbol: &str) -> Option<TokenRecord>;
    async fn get_token_by_address(&self, address: &str) -> Option<TokenRecord>;
}

/// In-memory stand-in for the real token catalog service, out of scope
/// per spec.md §1. Held behind an `Arc<DashMap<..>>` so the market
/// endpoint's bus subscriber closure (which must be `'static`) can hold
/// its own clone.
#[derive(Clone, Default)]
pub struct InMemoryTokenCatalog {
    tokens: Arc<DashMap<String, TokenRecord>>,
}

impl InMemoryTokenCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, record: TokenRecord) {
        self.tokens.insert(record.symbol.clone(), record);
    }
}

#[async_trait]
impl TokenCatalog for InMemoryTokenCatalog {
    async fn get_all_tokens(&self) -> Vec<TokenRecord> {
        self.tokens.iter().map(|entry| entry.value().clone()).collect()
    }

    async fn get_token(&self, symbol: &str) -> Option<TokenRecord> {
        self.tokens.get(symbol).map(|entry| entry.value().clone())
    }

    async fn get_token_by_address(&self, address: &str) -> Option<TokenRecord> {
        self.tokens.iter().find(|entry| entry.value().address == address).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_lookup_by_symbol_and_address() {
        let catalog = InMemoryTokenCatalog::new();
        catalog.upsert(TokenRecord {
            symbol: "SOL".into(),
            address: "So1111".into(),
            price: 145.23,
        });

        assert_eq!(catalog.get_token("SOL").await.unwrap().price, 145.23);
        assert_eq!(catalog.get_token_by_address("So1111").await.unwrap().symbol, "SOL");
        assert!(catalog.get_token("DOGE").await.is_none());
        assert_eq!(catalog.get_all_tokens().await.len(), 1);
    }
}
