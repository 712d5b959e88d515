//! Category-scoped result cache
//!
//! Provides:
//! - Deterministic keys: `namespace:category:sha256(canonical json)[..16]`
//! - Per-category TTLs taken from configuration
//! - Hit/miss/error statistics per category
//! - Failure absorption: store errors surface as misses or no-ops
//!
//! The backing store is pluggable through [`CacheStore`]; production uses
//! Redis, tests use [`MemoryStore`] with a manual clock.

mod cached;
mod memory;
mod store;

pub use cached::{Cached, Operation};
pub use memory::{Clock, ManualClock, MemoryStore, SystemClock};
pub use store::{CacheStore, RedisStore};

use crate::config::CacheConfig;
use crate::errors::Result;
use crate::metrics::{record_cache, CacheOutcome};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Kinds of cached values; each has its own TTL and statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheCategory {
    #[serde(rename = "search")]
    Search,
    #[serde(rename = "embedding")]
    Embedding,
    #[serde(rename = "rerank")]
    Rerank,
    #[serde(rename = "expansion")]
    QueryExpansion,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 4] = [
        CacheCategory::Search,
        CacheCategory::Embedding,
        CacheCategory::Rerank,
        CacheCategory::QueryExpansion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::Search => "search",
            CacheCategory::Embedding => "embedding",
            CacheCategory::Rerank => "rerank",
            CacheCategory::QueryExpansion => "expansion",
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one category's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategoryStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

impl CategoryStats {
    /// hits / (hits + misses); 0.0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CategoryStats {
        CategoryStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Build a cache key from a namespace, category and serializable key parts.
///
/// Parts are converted to a `serde_json::Value` first, so object keys are
/// emitted in sorted order regardless of how the caller built them.
pub fn cache_key<K: Serialize + ?Sized>(
    namespace: &str,
    category: CacheCategory,
    parts: &K,
) -> Result<String> {
    let canonical = serde_json::to_value(parts)?.to_string();
    let hash = hex::encode(Sha256::digest(canonical.as_bytes()));
    Ok(format!("{}:{}:{}", namespace, category.as_str(), &hash[..16]))
}

/// Process-wide cache handle
pub struct Cache {
    store: Option<Arc<dyn CacheStore>>,
    config: CacheConfig,
    connected: AtomicBool,
    counters: [Counters; 4],
}

impl Cache {
    /// Connect to the configured Redis store.
    ///
    /// Never fails: when the cache is disabled or Redis is unreachable the
    /// handle runs without a store and every lookup is a miss.
    pub async fn connect(config: &CacheConfig) -> Self {
        if !config.enabled {
            info!("Cache disabled by configuration");
            return Self::disabled(config);
        }

        match RedisStore::connect(config).await {
            Ok(store) => {
                info!(namespace = %config.namespace, "Cache connected");
                Self::with_store(Arc::new(store), config)
            }
            Err(e) => {
                warn!(error = %e, "Cache unavailable, continuing without cache");
                Self::disabled(config)
            }
        }
    }

    /// Use an explicit backing store
    pub fn with_store(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store: Some(store),
            config: config.clone(),
            connected: AtomicBool::new(true),
            counters: Default::default(),
        }
    }

    /// A cache that never stores anything
    pub fn disabled(config: &CacheConfig) -> Self {
        Self {
            store: None,
            config: config.clone(),
            connected: AtomicBool::new(false),
            counters: Default::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.store.is_some() && self.connected.load(Ordering::Relaxed)
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// TTL applied to every entry of `category`
    pub fn ttl(&self, category: CacheCategory) -> Duration {
        let secs = match category {
            CacheCategory::Search => self.config.ttl_search_secs,
            CacheCategory::Embedding => self.config.ttl_embedding_secs,
            CacheCategory::Rerank => self.config.ttl_rerank_secs,
            CacheCategory::QueryExpansion => self.config.ttl_expansion_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn key<K: Serialize + ?Sized>(&self, category: CacheCategory, parts: &K) -> Result<String> {
        cache_key(&self.config.namespace, category, parts)
    }

    /// Look up a value; any failure is reported as a miss
    pub async fn get<T, K>(&self, category: CacheCategory, parts: &K) -> Option<T>
    where
        T: DeserializeOwned,
        K: Serialize + ?Sized,
    {
        let Some(store) = &self.store else {
            self.count(category, CacheOutcome::Miss);
            return None;
        };

        let key = match self.key(category, parts) {
            Ok(key) => key,
            Err(e) => {
                warn!(%category, error = %e, "Unserializable cache key");
                self.count(category, CacheOutcome::Error);
                return None;
            }
        };

        let raw = match store.get(&key).await {
            Ok(raw) => {
                self.mark_reachable(true);
                raw
            }
            Err(e) => {
                warn!(%category, error = %e, "Cache get failed");
                self.mark_reachable(false);
                self.count(category, CacheOutcome::Error);
                return None;
            }
        };

        match raw {
            None => {
                debug!(key = %key, "Cache miss");
                self.count(category, CacheOutcome::Miss);
                None
            }
            Some(json) => match serde_json::from_str::<T>(&json) {
                Ok(value) => {
                    debug!(key = %key, "Cache hit");
                    self.count(category, CacheOutcome::Hit);
                    Some(value)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Malformed cached value, treating as miss");
                    self.count(category, CacheOutcome::Error);
                    None
                }
            },
        }
    }

    /// Store a value under the category TTL; returns whether it was written
    pub async fn set<T, K>(&self, category: CacheCategory, value: &T, parts: &K) -> bool
    where
        T: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        let Some(store) = &self.store else {
            return false;
        };

        let encoded = self
            .key(category, parts)
            .and_then(|key| Ok((key, serde_json::to_string(value)?)));
        let (key, json) = match encoded {
            Ok(pair) => pair,
            Err(e) => {
                warn!(%category, error = %e, "Failed to encode cache entry");
                self.count(category, CacheOutcome::Error);
                return false;
            }
        };

        let ttl = self.ttl(category);
        match store.set_ex(&key, json, ttl).await {
            Ok(()) => {
                self.mark_reachable(true);
                debug!(key = %key, ttl_secs = ttl.as_secs(), "Cache set");
                true
            }
            Err(e) => {
                warn!(%category, error = %e, "Cache set failed");
                self.mark_reachable(false);
                self.count(category, CacheOutcome::Error);
                false
            }
        }
    }

    /// Remove one entry; returns whether a key was deleted
    pub async fn delete<K: Serialize + ?Sized>(&self, category: CacheCategory, parts: &K) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let Ok(key) = self.key(category, parts) else {
            return false;
        };

        match store.delete(&key).await {
            Ok(deleted) => {
                self.mark_reachable(true);
                debug!(key = %key, deleted, "Cache delete");
                deleted
            }
            Err(e) => {
                warn!(%category, error = %e, "Cache delete failed");
                self.mark_reachable(false);
                self.count(category, CacheOutcome::Error);
                false
            }
        }
    }

    /// Delete every entry of `category`, or of the whole namespace when
    /// `None`. Returns the number of deleted keys.
    pub async fn clear(&self, category: Option<CacheCategory>) -> u64 {
        let Some(store) = &self.store else {
            return 0;
        };

        let pattern = match category {
            Some(category) => format!("{}:{}:*", self.config.namespace, category.as_str()),
            None => format!("{}:*", self.config.namespace),
        };

        let keys = match store.keys(&pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Cache scan failed");
                self.mark_reachable(false);
                return 0;
            }
        };

        let mut deleted = 0;
        for key in &keys {
            match store.delete(key).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Cache delete failed during clear");
                    self.mark_reachable(false);
                    return deleted;
                }
            }
        }

        self.mark_reachable(true);
        info!(pattern = %pattern, deleted, "Cache cleared");
        deleted
    }

    /// Ping the store and refresh the connected flag
    pub async fn ping(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let ok = match store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Cache ping failed");
                false
            }
        };
        self.mark_reachable(ok);
        ok
    }

    pub fn stats(&self, category: CacheCategory) -> CategoryStats {
        self.counters[category.slot()].snapshot()
    }

    /// Counters for every category
    pub fn all_stats(&self) -> BTreeMap<CacheCategory, CategoryStats> {
        CacheCategory::ALL
            .iter()
            .map(|c| (*c, self.stats(*c)))
            .collect()
    }

    fn count(&self, category: CacheCategory, outcome: CacheOutcome) {
        let counters = &self.counters[category.slot()];
        let counter = match outcome {
            CacheOutcome::Hit => &counters.hits,
            CacheOutcome::Miss => &counters.misses,
            CacheOutcome::Error => &counters.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        record_cache(outcome, category.as_str());
    }

    fn mark_reachable(&self, reachable: bool) {
        let was = self.connected.swap(reachable, Ordering::Relaxed);
        if was != reachable {
            if reachable {
                info!("Cache store reachable again");
            } else {
                warn!("Cache store unreachable, serving misses");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use async_trait::async_trait;
    use serde_json::json;

    fn memory_cache() -> (Cache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let store = MemoryStore::with_clock(clock.clone());
        (Cache::with_store(Arc::new(store), &CacheConfig::default()), clock)
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(AppError::CacheUnavailable { message: "connection refused".into() })
        }
        async fn set_ex(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
            Err(AppError::CacheUnavailable { message: "connection refused".into() })
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(AppError::CacheUnavailable { message: "connection refused".into() })
        }
        async fn keys(&self, _pattern: &str) -> Result<Vec<String>> {
            Err(AppError::CacheUnavailable { message: "connection refused".into() })
        }
        async fn ping(&self) -> Result<()> {
            Err(AppError::CacheUnavailable { message: "connection refused".into() })
        }
    }

    #[test]
    fn test_key_format_is_stable() {
        let a = cache_key("kas", CacheCategory::Search, &("k1", "k2")).unwrap();
        let b = cache_key("kas", CacheCategory::Search, &("k1", "k2")).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("kas:search:"));
        assert_eq!(a.len(), "kas:search:".len() + 16);

        let other = cache_key("kas", CacheCategory::Rerank, &("k1", "k2")).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_key_ignores_object_field_order() {
        let mut first = serde_json::Map::new();
        first.insert("query".into(), json!("rust"));
        first.insert("limit".into(), json!(10));
        let second = json!({"limit": 10, "query": "rust"});

        let a = cache_key("kas", CacheCategory::Search, &first).unwrap();
        let b = cache_key("kas", CacheCategory::Search, &second).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_round_trip_then_expiry() {
        let (cache, clock) = memory_cache();
        let value = vec![0.25f32, 0.5, 0.75];

        assert!(cache.set(CacheCategory::Embedding, &value, &("k1", "k2")).await);
        let hit: Option<Vec<f32>> = cache.get(CacheCategory::Embedding, &("k1", "k2")).await;
        assert_eq!(hit, Some(value));

        clock.advance(cache.ttl(CacheCategory::Embedding) + Duration::from_secs(1));
        let expired: Option<Vec<f32>> = cache.get(CacheCategory::Embedding, &("k1", "k2")).await;
        assert!(expired.is_none());

        let stats = cache.stats(CacheCategory::Embedding);
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_category_ttls_differ() {
        let (cache, clock) = memory_cache();
        cache.set(CacheCategory::Search, "results", "q").await;
        cache.set(CacheCategory::Embedding, "vector", "q").await;

        clock.advance(Duration::from_secs(301));
        assert!(cache.get::<String, _>(CacheCategory::Search, "q").await.is_none());
        assert_eq!(
            cache.get::<String, _>(CacheCategory::Embedding, "q").await.as_deref(),
            Some("vector")
        );
    }

    #[tokio::test]
    async fn test_store_failures_become_misses() {
        let cache = Cache::with_store(Arc::new(BrokenStore), &CacheConfig::default());
        assert!(cache.is_connected());

        assert!(!cache.set(CacheCategory::Search, "v", "k").await);
        assert!(cache.get::<String, _>(CacheCategory::Search, "k").await.is_none());
        assert!(!cache.delete(CacheCategory::Search, "k").await);
        assert_eq!(cache.clear(None).await, 0);
        assert!(!cache.is_connected());
        assert!(!cache.ping().await);

        let stats = cache.stats(CacheCategory::Search);
        assert_eq!(stats.errors, 3);
        assert_eq!(stats.hits, 0);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_miss_only() {
        let cache = Cache::disabled(&CacheConfig::default());
        assert!(!cache.is_connected());
        assert!(!cache.set(CacheCategory::Rerank, &0.9f64, "k").await);
        assert!(cache.get::<f64, _>(CacheCategory::Rerank, "k").await.is_none());
        assert_eq!(cache.stats(CacheCategory::Rerank).misses, 1);
    }

    #[tokio::test]
    async fn test_malformed_value_counts_as_error() {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(MemoryStore::with_clock(clock));
        let cache = Cache::with_store(store.clone(), &CacheConfig::default());

        let key = cache.key(CacheCategory::Search, "q").unwrap();
        store
            .set_ex(&key, "{not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(cache.get::<Vec<String>, _>(CacheCategory::Search, "q").await.is_none());
        assert_eq!(cache.stats(CacheCategory::Search).errors, 1);
    }

    #[tokio::test]
    async fn test_clear_by_category() {
        let (cache, _clock) = memory_cache();
        cache.set(CacheCategory::Search, "a", "1").await;
        cache.set(CacheCategory::Search, "b", "2").await;
        cache.set(CacheCategory::Rerank, "c", "3").await;

        assert_eq!(cache.clear(Some(CacheCategory::Search)).await, 2);
        assert!(cache.get::<String, _>(CacheCategory::Search, "1").await.is_none());
        assert!(cache.get::<String, _>(CacheCategory::Rerank, "3").await.is_some());
        assert_eq!(cache.clear(None).await, 1);
    }

    #[tokio::test]
    async fn test_clear_spans_many_scan_batches() {
        let (cache, _clock) = memory_cache();
        for i in 0..250 {
            assert!(cache.set(CacheCategory::Search, &i, &format!("query-{i}")).await);
        }
        cache.set(CacheCategory::Embedding, &[0.5f32], "kept").await;

        assert_eq!(cache.clear(Some(CacheCategory::Search)).await, 250);
        assert!(cache.get::<i32, _>(CacheCategory::Search, "query-7").await.is_none());
        assert!(cache.get::<Vec<f32>, _>(CacheCategory::Embedding, "kept").await.is_some());
    }

    #[tokio::test]
    async fn test_delete_single_entry() {
        let (cache, _clock) = memory_cache();
        cache.set(CacheCategory::QueryExpansion, &["a", "b"], "query").await;
        assert!(cache.delete(CacheCategory::QueryExpansion, "query").await);
        assert!(!cache.delete(CacheCategory::QueryExpansion, "query").await);
    }
}
