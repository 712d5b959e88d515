//! Explicit caching wrapper around an async operation
//!
//! ```ignore
//! let scorer = Cached::new(PairScorer::new(embedder), cache.clone(), CacheCategory::Rerank);
//! let score = scorer.call(&(query, text)).await?;
//! ```

use super::{Cache, CacheCategory};
use crate::errors::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// A pure async function of its input, safe to memoize
#[async_trait]
pub trait Operation: Send + Sync {
    type Input: Serialize + Send + Sync;
    type Output: Serialize + DeserializeOwned + Send;

    /// Stable name mixed into the cache key
    fn name(&self) -> &str;

    async fn call(&self, input: &Self::Input) -> Result<Self::Output>;
}

/// Wraps an [`Operation`] with lookup-then-store caching under one category.
///
/// Errors from the wrapped operation propagate and are never cached.
pub struct Cached<O> {
    inner: O,
    cache: Arc<Cache>,
    category: CacheCategory,
}

impl<O: Operation> Cached<O> {
    pub fn new(inner: O, cache: Arc<Cache>, category: CacheCategory) -> Self {
        Self {
            inner,
            cache,
            category,
        }
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    pub fn category(&self) -> CacheCategory {
        self.category
    }

    pub async fn call(&self, input: &O::Input) -> Result<O::Output> {
        if let Some(hit) = self.lookup(input).await {
            return Ok(hit);
        }

        let output = self.inner.call(input).await?;
        self.store(input, &output).await;
        Ok(output)
    }

    pub async fn lookup(&self, input: &O::Input) -> Option<O::Output> {
        self.cache.get(self.category, &(self.inner.name(), input)).await
    }

    pub async fn store(&self, input: &O::Input, output: &O::Output) -> bool {
        self.cache
            .set(self.category, output, &(self.inner.name(), input))
            .await
    }
}
