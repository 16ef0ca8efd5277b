//! On-chain balance lookup (spec.md §6): "may be unavailable; callers
//! must tolerate null."

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

#[async_trait]
pub trait BalanceProvider: Send + Sync {
    /// Returns `None` when the lookup is unavailable (spec.md §6) rather
    /// than erroring — callers must tolerate a null balance.
    async fn get_balance(&self, wallet_address: &str) -> Option<f64>;
}

#[derive(Clone, Default)]
pub struct InMemoryBalanceProvider {
    balances: Arc<DashMap<String, f64>>,
}

impl InMemoryBalanceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, wallet_address: &str, balance: f64) {
        self.balances.insert(wallet_address.to_string(), balance);
    }
}

#[async_trait]
impl BalanceProvider for InMemoryBalanceProvider {
    async fn get_balance(&self, wallet_address: &str) -> Option<f64> {
        self.balances.get(wallet_address).map(|entry| *entry.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_wallet_returns_none_not_an_error() {
        let provider = InMemoryBalanceProvider::new();
        assert_eq!(provider.get_balance("0xabc").await, None);
        provider.set_balance("0xabc", 12.5);
        assert_eq!(provider.get_balance("0xabc").await, Some(12.5));
    }
}
