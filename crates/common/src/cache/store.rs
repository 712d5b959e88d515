//! Backing stores for the cache layer

use crate::config::CacheConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Keys requested per `SCAN` round trip
const SCAN_BATCH: usize = 100;

/// Minimal key-value contract the cache needs.
///
/// Every method is a single atomic operation against the store; concurrent
/// writers to one key resolve last-write-wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Keys matching a glob pattern (only trailing `*` is used by the cache)
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn ping(&self) -> Result<()>;
}

/// Redis-backed store
///
/// `ConnectionManager` multiplexes one connection and reconnects on its own,
/// so each operation works on a cheap clone instead of locking.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    /// Open a connection, bounded by `connect_timeout_ms`
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| AppError::CacheUnavailable {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = tokio::time::timeout(config.connect_timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| AppError::Timeout {
                operation: "redis connect".to_string(),
                timeout_ms: config.connect_timeout_ms,
            })?
            .map_err(|e| AppError::CacheUnavailable {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        let store = Self {
            connection,
            op_timeout: config.op_timeout(),
        };
        store.ping().await?;
        Ok(store)
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => Err(AppError::Timeout {
                operation: format!("redis {}", operation),
                timeout_ms: self.op_timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        self.bounded("get", conn.get(key)).await
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        // Redis rejects a zero expiry
        let secs = ttl.as_secs().max(1);
        self.bounded("set", conn.set_ex(key, value, secs)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = self.bounded("del", conn.del(key)).await?;
        Ok(removed > 0)
    }

    /// Walks the keyspace with cursor-based `SCAN` so other clients are not
    /// blocked; the whole walk shares one operation timeout.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let walk = async move {
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok::<_, redis::RedisError>(keys)
        };

        let mut keys = self.bounded("scan", walk).await?;
        // SCAN may report a key more than once while the table is rehashing
        keys.sort();
        keys.dedup();
        debug!(pattern, count = keys.len(), "Scanned cache keys");
        Ok(keys)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}
