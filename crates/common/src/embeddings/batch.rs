//! Cached, bounded-concurrency batch embedding with per-item retries

use super::{CircuitBreaker, Embedder};
use crate::cache::{Cache, CacheCategory};
use crate::config::{CircuitBreakerConfig, EmbeddingConfig};
use crate::errors::{AppError, Result};
use crate::metrics::{record_embedding, record_embedding_retry};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Knobs for one `embed_batch` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Texts per sequential group
    pub batch_size: usize,
    /// Total attempts per text
    pub max_retries: u32,
    /// In-flight provider calls within a group
    pub max_concurrency: usize,
}

impl From<&EmbeddingConfig> for BatchOptions {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            max_concurrency: config.max_concurrency,
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&EmbeddingConfig::default())
    }
}

/// Embedding front-end used by ingestion and search
pub struct BatchEmbedder {
    provider: Arc<dyn Embedder>,
    cache: Arc<Cache>,
    circuit: Arc<CircuitBreaker>,
    timeout: Duration,
    backoff_base: Duration,
    defaults: BatchOptions,
}

impl BatchEmbedder {
    /// Guarded by a breaker with default settings; see [`Self::with_circuit_breaker`]
    pub fn new(provider: Arc<dyn Embedder>, cache: Arc<Cache>, config: &EmbeddingConfig) -> Self {
        let circuit = Arc::new(CircuitBreaker::new(
            provider.model_name(),
            &CircuitBreakerConfig::default(),
        ));
        Self {
            provider,
            cache,
            circuit,
            timeout: config.timeout(),
            backoff_base: config.backoff_base(),
            defaults: BatchOptions::from(config),
        }
    }

    /// Override the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the backoff unit; attempt n sleeps `base * 2^n`
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Share `circuit` across every call to the provider
    pub fn with_circuit_breaker(mut self, circuit: Arc<CircuitBreaker>) -> Self {
        self.circuit = circuit;
        self
    }

    pub fn circuit(&self) -> &Arc<CircuitBreaker> {
        &self.circuit
    }

    pub fn provider(&self) -> &Arc<dyn Embedder> {
        &self.provider
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn options(&self) -> BatchOptions {
        self.defaults
    }

    /// Embed one text: cache, then a single provider attempt, then write-back
    #[instrument(skip(self, text), fields(chars = text.len()))]
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.cached(text).await {
            return Ok(vector);
        }

        let vector = self.call_provider(text).await?;
        self.remember(text, &vector).await;
        Ok(vector)
    }

    /// `embed_batch` with the configured options
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(texts, self.defaults).await
    }

    /// Embed `texts` in sequential groups of `batch_size`, running at most
    /// `max_concurrency` provider calls at once inside a group.
    ///
    /// Output position `i` always holds the vector for `texts[i]`. If any
    /// text exhausts its attempts the whole call fails with
    /// [`AppError::PartialBatchFailure`] naming that index.
    #[instrument(skip(self, texts), fields(count = texts.len()))]
    pub async fn embed_batch(&self, texts: &[String], options: BatchOptions) -> Result<Vec<Vec<f32>>> {
        let batch_size = options.batch_size.max(1);
        let concurrency = options.max_concurrency.max(1);
        let attempts = options.max_retries.max(1);

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        for (group, chunk) in texts.chunks(batch_size).enumerate() {
            let offset = group * batch_size;
            debug!(group, size = chunk.len(), "Embedding batch group");

            let embedded: Vec<(usize, Vec<f32>)> = stream::iter(chunk.iter().enumerate())
                .map(|(i, text)| {
                    let index = offset + i;
                    async move {
                        self.embed_with_retry(index, text, attempts)
                            .await
                            .map(|vector| (index, vector))
                    }
                })
                .buffer_unordered(concurrency)
                .try_collect()
                .await?;

            for (index, vector) in embedded {
                results[index] = Some(vector);
            }
        }

        results
            .into_iter()
            .enumerate()
            .map(|(index, vector)| {
                vector.ok_or_else(|| AppError::Internal {
                    message: format!("Missing embedding for text at index {}", index),
                })
            })
            .collect()
    }

    async fn embed_with_retry(&self, index: usize, text: &str, attempts: u32) -> Result<Vec<f32>> {
        if let Some(vector) = self.cached(text).await {
            return Ok(vector);
        }

        let mut backoff = self.backoff();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.call_provider(text).await {
                Ok(vector) => {
                    self.remember(text, &vector).await;
                    return Ok(vector);
                }
                Err(e @ AppError::CircuitOpen { .. }) => {
                    warn!(index, attempt, error = %e, "Embedding skipped, circuit open");
                    return Err(AppError::PartialBatchFailure {
                        index,
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) if attempt >= attempts => {
                    warn!(index, attempts, error = %e, "Embedding retries exhausted");
                    return Err(AppError::PartialBatchFailure {
                        index,
                        attempts,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = backoff.next_backoff().unwrap_or(self.backoff_base);
                    warn!(
                        index,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Embedding failed, retrying"
                    );
                    record_embedding_retry(self.provider.model_name());
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.backoff_base)
            .with_randomization_factor(0.0)
            .with_multiplier(2.0)
            .with_max_interval(Duration::from_secs(3600))
            .with_max_elapsed_time(None)
            .build()
    }

    async fn call_provider(&self, text: &str) -> Result<Vec<f32>> {
        self.circuit.call(self.timed_embed(text)).await
    }

    async fn timed_embed(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.provider.embed(text)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout {
                operation: format!("{} embed", self.provider.model_name()),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };
        record_embedding(
            start.elapsed().as_secs_f64(),
            self.provider.model_name(),
            result.is_ok(),
        );
        result
    }

    async fn cached(&self, text: &str) -> Option<Vec<f32>> {
        self.cache
            .get(CacheCategory::Embedding, &(self.provider.model_name(), text))
            .await
    }

    async fn remember(&self, text: &str, vector: &[f32]) {
        self.cache
            .set(CacheCategory::Embedding, vector, &(self.provider.model_name(), text))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ManualClock, MemoryStore};
    use crate::config::CacheConfig;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fake provider with per-text latency and failure scripts
    #[derive(Default)]
    struct ScriptedProvider {
        delays_ms: HashMap<String, u64>,
        failures: Mutex<HashMap<String, usize>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        completed: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn delay(mut self, text: &str, ms: u64) -> Self {
            self.delays_ms.insert(text.to_string(), ms);
            self
        }

        fn fail(self, text: &str, times: usize) -> Self {
            self.failures.lock().unwrap().insert(text.to_string(), times);
            self
        }
    }

    #[async_trait]
    impl Embedder for ScriptedProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = self.delays_ms.get(text).copied().unwrap_or(5);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            {
                let mut failures = self.failures.lock().unwrap();
                if let Some(remaining) = failures.get_mut(text) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(AppError::provider("scripted", "connection reset"));
                    }
                }
            }

            self.completed.lock().unwrap().push(text.to_string());
            Ok(vec![text.len() as f32, text.as_bytes()[0] as f32])
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn memory_cache() -> Arc<Cache> {
        let store = MemoryStore::with_clock(Arc::new(ManualClock::new()));
        Arc::new(Cache::with_store(Arc::new(store), &CacheConfig::default()))
    }

    fn embedder(provider: Arc<ScriptedProvider>, cache: Arc<Cache>) -> BatchEmbedder {
        BatchEmbedder::new(provider, cache, &EmbeddingConfig::default())
            .with_backoff_base(Duration::from_millis(1))
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn options(batch_size: usize, max_retries: u32, max_concurrency: usize) -> BatchOptions {
        BatchOptions {
            batch_size,
            max_retries,
            max_concurrency,
        }
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        let provider = Arc::new(ScriptedProvider::default().delay("a", 60).delay("b", 1));
        let embedder = embedder(provider.clone(), Arc::new(Cache::disabled(&CacheConfig::default())));

        let vectors = embedder
            .embed_batch(&texts(&["a", "b", "c"]), options(2, 3, 2))
            .await
            .unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vec![1.0, b'a' as f32]);
        assert_eq!(vectors[1], vec![1.0, b'b' as f32]);
        assert_eq!(vectors[2], vec![1.0, b'c' as f32]);

        let completed = provider.completed.lock().unwrap().clone();
        assert_eq!(completed[..2], ["b".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let provider = Arc::new(ScriptedProvider::default());
        let embedder = embedder(provider.clone(), Arc::new(Cache::disabled(&CacheConfig::default())));

        let input: Vec<String> = (0..12).map(|i| format!("text-{}", i)).collect();
        embedder.embed_batch(&input, options(6, 1, 2)).await.unwrap();

        assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let provider = Arc::new(ScriptedProvider::default().fail("flaky", 2));
        let embedder = embedder(provider.clone(), Arc::new(Cache::disabled(&CacheConfig::default())));

        let vectors = embedder
            .embed_batch(&texts(&["ok", "flaky"]), options(10, 3, 5))
            .await
            .unwrap();

        assert_eq!(vectors.len(), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exhausted_item_fails_whole_batch() {
        let provider = Arc::new(ScriptedProvider::default().fail("bad", usize::MAX));
        let embedder = embedder(provider, Arc::new(Cache::disabled(&CacheConfig::default())));

        let err = embedder
            .embed_batch(&texts(&["good", "bad", "fine"]), options(10, 3, 5))
            .await
            .unwrap_err();

        match err {
            AppError::PartialBatchFailure { index, attempts, .. } => {
                assert_eq!(index, 1);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_embed_one_uses_cache() {
        let provider = Arc::new(ScriptedProvider::default());
        let cache = memory_cache();
        let embedder = embedder(provider.clone(), cache.clone());

        let first = embedder.embed_one("hello").await.unwrap();
        let second = embedder.embed_one("hello").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        // batch items reuse the same entries
        embedder
            .embed_batch(&texts(&["hello", "world"]), options(10, 1, 5))
            .await
            .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats(CacheCategory::Embedding).hits, 2);
    }

    #[tokio::test]
    async fn test_embed_one_does_not_retry() {
        let provider = Arc::new(ScriptedProvider::default().fail("once", 1));
        let embedder = embedder(provider.clone(), memory_cache());

        assert!(embedder.embed_one("once").await.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(embedder.embed_one("once").await.is_ok());
    }

    #[tokio::test]
    async fn test_open_circuit_skips_provider() {
        let provider = Arc::new(ScriptedProvider::default().fail("down", usize::MAX));
        let circuit = Arc::new(CircuitBreaker::new(
            "scripted",
            &CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout_secs: 3600,
                half_open_max_calls: 1,
            },
        ));
        let embedder = embedder(provider.clone(), Arc::new(Cache::disabled(&CacheConfig::default())))
            .with_circuit_breaker(circuit.clone());

        assert!(embedder.embed_one("down").await.is_err());
        assert!(embedder.embed_one("down").await.is_err());
        assert!(circuit.is_open());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        let err = embedder.embed_one("anything").await.unwrap_err();
        assert!(matches!(err, AppError::CircuitOpen { .. }));

        // Batch items stop after the first rejected attempt
        let err = embedder
            .embed_batch(&texts(&["x"]), options(10, 3, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PartialBatchFailure { index: 0, attempts: 1, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let provider = Arc::new(ScriptedProvider::default().delay("slow", 500));
        let embedder = embedder(provider, Arc::new(Cache::disabled(&CacheConfig::default())))
            .with_timeout(Duration::from_millis(20));

        let err = embedder.embed_one("slow").await.unwrap_err();
        assert!(matches!(err, AppError::Timeout { timeout_ms: 20, .. }));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let provider = Arc::new(ScriptedProvider::default());
        let embedder = embedder(provider, Arc::new(Cache::disabled(&CacheConfig::default())));
        let vectors = embedder.embed_all(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let embedder = embedder(
            Arc::new(ScriptedProvider::default()),
            Arc::new(Cache::disabled(&CacheConfig::default())),
        );
        let mut backoff = embedder.backoff();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(1)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(2)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(4)));
    }
}
