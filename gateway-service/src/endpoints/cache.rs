//! Per-endpoint TTL cache (spec.md §3: "Cache entry ... with a TTL
//! evaluated at read time"). Shared by the wallet and portfolio
//! specializations, which otherwise duplicate the same snapshot-cache
//! shape (SPEC_FULL.md §4.8).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

struct CacheEntry<T> {
    data: T,
    inserted_at: DateTime<Utc>,
}

/// A small per-key cache with TTL evaluated at read time; no background
/// eviction, matching spec.md §9 ("no background sweep required for
/// correctness").
pub struct TtlCache<T: Clone> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    ttl: chrono::Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if Utc::now() - entry.inserted_at > self.ttl {
            return None;
        }
        Some(entry.data.clone())
    }

    pub fn insert(&self, key: impl Into<String>, data: T) {
        self.entries.write().insert(
            key.into(),
            CacheEntry {
                data,
                inserted_at: Utc::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.write().remove(key);
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_is_returned() {
        let cache = TtlCache::new(chrono::Duration::seconds(60));
        cache.insert("0xabc", 12.5_f64);
        assert_eq!(cache.get("0xabc"), Some(12.5));
    }

    #[test]
    fn expired_entry_reads_as_absent() {
        let cache = TtlCache::new(chrono::Duration::milliseconds(-1));
        cache.insert("0xabc", 12.5_f64);
        assert_eq!(cache.get("0xabc"), None);
    }

    #[test]
    fn invalidate_clears_a_key() {
        let cache = TtlCache::new(chrono::Duration::seconds(60));
        cache.insert("0xabc", 1.0_f64);
        cache.invalidate("0xabc");
        assert_eq!(cache.get("0xabc"), None);
    }
}
