//! In-process store with injectable time, used by tests and store-less tooling

use super::store::CacheStore;
use crate::errors::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Millisecond time source for TTL evaluation
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

struct Entry {
    value: String,
    expires_at: u64,
}

/// Minimum clock time between two full sweeps of expired entries
const SWEEP_INTERVAL_MS: u64 = 1_000;

/// `HashMap` store; expired entries are dropped on access and swept on writes
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    last_sweep: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            last_sweep: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.lock().values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // Every critical section is one map call, so a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        let live = entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone());
        if live.is_none() {
            entries.remove(key);
        }
        Ok(live)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let now = self.clock.now_millis();
        let expires_at = now + ttl.as_millis() as u64;
        let mut entries = self.lock();
        if now >= self.last_sweep.load(Ordering::Relaxed) + SWEEP_INTERVAL_MS {
            entries.retain(|_, entry| entry.expires_at > now);
            self.last_sweep.store(now, Ordering::Relaxed);
        }
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now_millis();
        Ok(self
            .lock()
            .remove(key)
            .is_some_and(|entry| entry.expires_at > now))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = self.clock.now_millis();
        let mut keys: Vec<String> = self
            .lock()
            .iter()
            .filter(|(key, entry)| entry.expires_at > now && matches(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching() {
        assert!(matches("kas:search:*", "kas:search:abcd"));
        assert!(!matches("kas:search:*", "kas:rerank:abcd"));
        assert!(matches("exact", "exact"));
        assert!(!matches("exact", "exactly"));
    }

    #[tokio::test]
    async fn test_expiry_follows_manual_clock() {
        let clock = Arc::new(ManualClock::new());
        let store = MemoryStore::with_clock(clock.clone());

        store.set_ex("k", "v".into(), Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(9));
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.len(), 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_writes_sweep_expired_entries() {
        let clock = Arc::new(ManualClock::new());
        let store = MemoryStore::with_clock(clock.clone());

        for key in ["a", "b", "c"] {
            store.set_ex(key, "v".into(), Duration::from_secs(1)).await.unwrap();
        }
        assert_eq!(store.lock().len(), 3);

        // Never read again, so only the write-time sweep can reclaim them
        clock.advance(Duration::from_secs(2));
        store.set_ex("d", "v".into(), Duration::from_secs(60)).await.unwrap();

        let entries = store.lock();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("d"));
    }

    #[test]
    fn test_blocking_access() {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            store.set_ex("a", "1".into(), Duration::from_secs(60)).await.unwrap();
            assert_eq!(store.keys("*").await.unwrap(), vec!["a".to_string()]);
            assert!(store.delete("a").await.unwrap());
        });
    }
}
