//! Response cache with TTL tiers
//!
//! Bounded LRU cache for rendered JSON response bodies. Entries expire per
//! tier: listings age out quickly, single items more slowly, version history
//! slowest. Reads past the expiry miss and drop the entry.
//!
//! # Thread Safety
//!
//! The cache uses `tokio::sync::RwLock` for async-safe access and is `Clone`
//! for sharing across request handlers.

pub mod invalidation;

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

/// Cache configuration options
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached responses
    pub max_entries: usize,
    /// TTL for list responses
    pub short_ttl: Duration,
    /// TTL for single-item responses
    pub medium_ttl: Duration,
    /// TTL for version-history responses
    pub long_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            short_ttl: Duration::from_secs(30),
            medium_ttl: Duration::from_secs(120),
            long_ttl: Duration::from_secs(600),
        }
    }
}

/// TTL tier for a cached response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Short,
    Medium,
    Long,
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Shared response cache
#[derive(Clone)]
pub struct ResponseCache {
    entries: Arc<RwLock<LruCache<String, CacheEntry>>>,
    config: CacheConfig,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::new(1024).unwrap());

        Self {
            entries: Arc::new(RwLock::new(LruCache::new(capacity))),
            config,
        }
    }

    /// Get a live cached value; expired entries are dropped on access
    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub async fn put(&self, key: impl Into<String>, value: Value, tier: CacheTier) {
        let ttl = match tier {
            CacheTier::Short => self.config.short_ttl,
            CacheTier::Medium => self.config.medium_ttl,
            CacheTier::Long => self.config.long_ttl,
        };
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };

        let mut entries = self.entries.write().await;
        entries.put(key.into(), entry);
    }

    /// Drop every entry whose key starts with `prefix`; returns how many
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().await;
        let keys_to_remove: Vec<String> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys_to_remove {
            entries.pop(key);
        }
        keys_to_remove.len()
    }

    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        let entries = self.entries.read().await;
        entries.is_empty()
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }

    /// Occupancy and capacity, for logs and tests
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            entries: entries.len(),
            capacity: entries.cap().get(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_and_get() {
        let cache = ResponseCache::default();
        assert!(cache.is_empty().await);

        cache
            .put("annotation:a-1", json!({"id": "a-1"}), CacheTier::Medium)
            .await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(
            cache.get("annotation:a-1").await,
            Some(json!({"id": "a-1"}))
        );
        assert_eq!(cache.get("annotation:a-2").await, None);
    }

    #[tokio::test]
    async fn test_entries_expire_per_tier() {
        let cache = ResponseCache::new(CacheConfig {
            max_entries: 16,
            short_ttl: Duration::from_millis(20),
            medium_ttl: Duration::from_secs(60),
            long_ttl: Duration::from_secs(300),
        });

        cache.put("annotations:all", json!([1]), CacheTier::Short).await;
        cache.put("annotation:a-1", json!({}), CacheTier::Medium).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("annotations:all").await, None);
        assert!(cache.get("annotation:a-1").await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_prefix_targets_matching_keys_only() {
        let cache = ResponseCache::default();
        cache.put("annotations:a:1:20", json!([]), CacheTier::Short).await;
        cache.put("annotations:b:1:20", json!([]), CacheTier::Short).await;
        cache.put("annotation:a-1:false:false", json!({}), CacheTier::Medium).await;

        let dropped = cache.invalidate_prefix("annotations:").await;
        assert_eq!(dropped, 2);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("annotation:a-1:false:false").await.is_some());
    }

    #[tokio::test]
    async fn test_lru_eviction_respects_capacity() {
        let cache = ResponseCache::new(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });

        cache.put("k1", json!(1), CacheTier::Long).await;
        cache.put("k2", json!(2), CacheTier::Long).await;
        cache.put("k3", json!(3), CacheTier::Long).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("k1").await, None);
        assert!(cache.get("k3").await.is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.capacity, 2);
    }
}
