//! Configuration management for KAS services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with KAS__)
//! - Configuration files (config/default.toml, config/{env}.toml, config/local.toml)
//! - Default values
//!
//! Unknown keys are rejected rather than ignored, so a misspelled option
//! fails at startup instead of silently falling back to its default.

use crate::errors::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Cache layer configuration
    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheConfig,

    /// Embedding provider configuration
    #[serde(default)]
    #[validate(nested)]
    pub embedding: EmbeddingConfig,

    /// Circuit breaker around the embedding provider
    #[serde(default)]
    #[validate(nested)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// LLM (decomposition and answer generation) configuration
    #[serde(default)]
    #[validate(nested)]
    pub llm: LlmConfig,

    /// Hybrid search configuration
    #[serde(default)]
    #[validate(nested)]
    pub search: SearchConfig,

    /// Reranking configuration
    #[serde(default)]
    #[validate(nested)]
    pub rerank: RerankConfig,

    /// Confidence and citation configuration
    #[serde(default)]
    #[validate(nested)]
    pub confidence: ConfidenceConfig,

    /// Multi-hop decomposition configuration
    #[serde(default)]
    #[validate(nested)]
    pub multihop: MultiHopConfig,

    /// Question answering configuration
    #[serde(default)]
    #[validate(nested)]
    pub qa: QaConfig,

    /// Chunking defaults per strategy
    #[serde(default)]
    #[validate(nested)]
    pub chunking: ChunkingDefaults,

    /// Observability configuration
    #[serde(default)]
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Enable the Redis-backed cache
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redis URL (redis://host:port/db)
    #[serde(default = "default_redis_url")]
    #[validate(length(min = 1))]
    pub url: String,

    /// Key namespace prefix
    #[serde(default = "default_cache_namespace")]
    #[validate(length(min = 1))]
    pub namespace: String,

    /// TTL for hybrid search results
    #[serde(default = "default_ttl_search")]
    #[validate(range(min = 1))]
    pub ttl_search_secs: u64,

    /// TTL for embedding vectors
    #[serde(default = "default_ttl_embedding")]
    #[validate(range(min = 1))]
    pub ttl_embedding_secs: u64,

    /// TTL for rerank scores
    #[serde(default = "default_ttl_rerank")]
    #[validate(range(min = 1))]
    pub ttl_rerank_secs: u64,

    /// TTL for query expansions
    #[serde(default = "default_ttl_expansion")]
    #[validate(range(min = 1))]
    pub ttl_expansion_secs: u64,

    /// Upper bound for a single store operation
    #[serde(default = "default_cache_op_timeout")]
    #[validate(range(min = 1))]
    pub op_timeout_ms: u64,

    /// Upper bound for the initial connection
    #[serde(default = "default_cache_connect_timeout")]
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Embedding provider: ollama, openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Provider base URL
    #[serde(default = "default_ollama_url")]
    #[validate(length(min = 1))]
    pub base_url: String,

    /// API key (OpenAI-compatible providers)
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    #[validate(range(min = 1))]
    pub dimension: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    #[validate(range(min = 1))]
    pub timeout_secs: u64,

    /// Texts per sequential batch group
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1))]
    pub batch_size: usize,

    /// Attempts per text before the batch fails
    #[serde(default = "default_embedding_retries")]
    #[validate(range(min = 1))]
    pub max_retries: u32,

    /// Maximum in-flight provider calls
    #[serde(default = "default_max_concurrency")]
    #[validate(range(min = 1))]
    pub max_concurrency: usize,

    /// Backoff unit; attempt n waits base * 2^n
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_llm_url")]
    #[validate(length(min = 1))]
    pub base_url: String,

    /// API key
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_circuit_failures")]
    #[validate(range(min = 1))]
    pub failure_threshold: u32,

    /// Seconds after the last failure before a trial call is allowed
    #[serde(default = "default_circuit_recovery")]
    pub recovery_timeout_secs: u64,

    /// Trial successes needed to close a half-open circuit
    #[serde(default = "default_circuit_half_open")]
    #[validate(range(min = 1))]
    pub half_open_max_calls: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    /// RRF constant k
    #[serde(default = "default_rrf_k")]
    #[validate(range(min = 0.0))]
    pub rrf_k: f64,

    /// Lexical candidate pool size
    #[serde(default = "default_candidates")]
    #[validate(range(min = 1))]
    pub bm25_candidates: usize,

    /// Vector candidate pool size
    #[serde(default = "default_candidates")]
    #[validate(range(min = 1))]
    pub vector_candidates: usize,

    /// Default result limit
    #[serde(default = "default_search_limit")]
    #[validate(range(min = 1))]
    pub default_limit: usize,

    /// Maximum allowed result limit
    #[serde(default = "default_search_max_limit")]
    #[validate(range(min = 1))]
    pub max_limit: usize,

    /// Weight applied to lexical RRF terms
    #[serde(default = "default_channel_weight")]
    #[validate(range(min = 0.0))]
    pub bm25_weight: f64,

    /// Weight applied to vector RRF terms
    #[serde(default = "default_channel_weight")]
    #[validate(range(min = 0.0))]
    pub vector_weight: f64,

    /// Append known synonyms to the lexical query
    #[serde(default = "default_true")]
    pub enable_query_expansion: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RerankConfig {
    /// Results kept after reranking
    #[serde(default = "default_rerank_top_k")]
    #[validate(range(min = 1))]
    pub top_k: usize,

    /// Maximum in-flight scoring calls
    #[serde(default = "default_max_concurrency")]
    #[validate(range(min = 1))]
    pub max_concurrency: usize,

    /// Candidate text is truncated to this many characters before scoring
    #[serde(default = "default_rerank_text_chars")]
    #[validate(range(min = 1))]
    pub max_text_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ConfidenceConfig {
    /// Scores below this are LOW
    #[serde(default = "default_confidence_low")]
    pub low: f64,

    /// Scores at or above this are HIGH
    #[serde(default = "default_confidence_high")]
    pub high: f64,

    /// Number of top results averaged into the score
    #[serde(default = "default_confidence_top_n")]
    #[validate(range(min = 1))]
    pub top_n: usize,

    /// Maximum citations returned with an answer
    #[serde(default = "default_max_citations")]
    pub max_citations: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct MultiHopConfig {
    /// Upper bound on sub-queries
    #[serde(default = "default_max_sub_queries")]
    #[validate(range(min = 1))]
    pub max_sub_queries: usize,

    /// Floor for each sub-query's result share
    #[serde(default = "default_min_per_query_limit")]
    #[validate(range(min = 1))]
    pub min_per_query_limit: usize,

    /// Decomposition call timeout in seconds
    #[serde(default = "default_decompose_timeout")]
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct QaConfig {
    /// Overall answer generation timeout in seconds
    #[serde(default = "default_llm_timeout")]
    #[validate(range(min = 1))]
    pub timeout_secs: u64,

    /// Search results retrieved before reranking
    #[serde(default = "default_search_limit")]
    #[validate(range(min = 1))]
    pub default_limit: usize,

    /// Below this confidence no answer is generated
    #[serde(default)]
    pub min_confidence: f64,
}

/// Chunk sizing for one strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ChunkingConfig {
    /// Target size in tokens (approximated as chars / 4)
    #[validate(range(min = 1))]
    pub chunk_size: usize,
    /// Overlap in tokens carried into the next chunk
    pub chunk_overlap: usize,
    /// Minimum chunk length in characters; shorter chunks are merged forward
    pub min_chunk_size: usize,
}

impl ChunkingConfig {
    pub const fn new(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            min_chunk_size,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        default_general_chunking()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ChunkingDefaults {
    #[serde(default = "default_timestamp_chunking")]
    #[validate(nested)]
    pub timestamp: ChunkingConfig,

    #[serde(default = "default_paragraph_chunking")]
    #[validate(nested)]
    pub paragraph: ChunkingConfig,

    #[serde(default = "default_page_chunking")]
    #[validate(nested)]
    pub page: ChunkingConfig,

    #[serde(default = "default_general_chunking")]
    #[validate(nested)]
    pub general: ChunkingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_true")]
    pub json_logging: bool,

    /// Prometheus exporter port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,

    /// Service name attached to log output
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_true() -> bool { true }
fn default_redis_url() -> String { "redis://localhost:6379/0".to_string() }
fn default_cache_namespace() -> String { "kas".to_string() }
fn default_ttl_search() -> u64 { 300 }
fn default_ttl_embedding() -> u64 { 86_400 }
fn default_ttl_rerank() -> u64 { 600 }
fn default_ttl_expansion() -> u64 { 3_600 }
fn default_cache_op_timeout() -> u64 { 500 }
fn default_cache_connect_timeout() -> u64 { 2_000 }
fn default_embedding_provider() -> String { "ollama".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_batch_size() -> usize { 10 }
fn default_embedding_retries() -> u32 { 3 }
fn default_max_concurrency() -> usize { 5 }
fn default_backoff_base() -> u64 { 1_000 }
fn default_circuit_failures() -> u32 { 5 }
fn default_circuit_recovery() -> u64 { 30 }
fn default_circuit_half_open() -> u32 { 3 }
fn default_llm_url() -> String { "https://openrouter.ai/api/v1".to_string() }
fn default_llm_model() -> String { "deepseek/deepseek-chat".to_string() }
fn default_llm_timeout() -> u64 { 60 }
fn default_rrf_k() -> f64 { 60.0 }
fn default_candidates() -> usize { 50 }
fn default_search_limit() -> usize { 10 }
fn default_search_max_limit() -> usize { 100 }
fn default_channel_weight() -> f64 { 1.0 }
fn default_rerank_top_k() -> usize { 5 }
fn default_rerank_text_chars() -> usize { 1_000 }
fn default_confidence_low() -> f64 { 0.3 }
fn default_confidence_high() -> f64 { 0.7 }
fn default_confidence_top_n() -> usize { 3 }
fn default_max_citations() -> usize { 5 }
fn default_max_sub_queries() -> usize { 3 }
fn default_min_per_query_limit() -> usize { 5 }
fn default_decompose_timeout() -> u64 { 30 }
fn default_timestamp_chunking() -> ChunkingConfig { ChunkingConfig::new(500, 50, 100) }
fn default_paragraph_chunking() -> ChunkingConfig { ChunkingConfig::new(512, 77, 100) }
fn default_page_chunking() -> ChunkingConfig { ChunkingConfig::new(1000, 100, 200) }
fn default_general_chunking() -> ChunkingConfig { ChunkingConfig::new(400, 60, 50) }
fn default_log_level() -> String { "info".to_string() }
fn default_service_name() -> String { "kas".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self> {
        let env = std::env::var("KAS_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with KAS__ prefix
            // e.g., KAS__EMBEDDING__MAX_CONCURRENCY=8
            .add_source(Self::environment())
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Self::environment())
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn environment() -> Environment {
        Environment::with_prefix("KAS")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    /// Validate field rules and cross-field constraints, reporting every
    /// failure at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if let Err(e) = Validate::validate(self) {
            errors.push(e.to_string());
        }

        for (name, sizes) in [
            ("timestamp", &self.chunking.timestamp),
            ("paragraph", &self.chunking.paragraph),
            ("page", &self.chunking.page),
            ("general", &self.chunking.general),
        ] {
            if sizes.chunk_overlap >= sizes.chunk_size {
                errors.push(format!(
                    "chunking.{name}: chunk_overlap ({}) must be smaller than chunk_size ({})",
                    sizes.chunk_overlap, sizes.chunk_size
                ));
            }
        }

        let (low, high) = (self.confidence.low, self.confidence.high);
        if !(0.0 <= low && low < high && high <= 1.0) {
            errors.push(format!(
                "confidence thresholds must satisfy 0 <= low < high <= 1, got low={low} high={high}"
            ));
        }

        if !(0.0..=1.0).contains(&self.qa.min_confidence) {
            errors.push(format!(
                "qa.min_confidence must be within [0, 1], got {}",
                self.qa.min_confidence
            ));
        }

        // RRF divides by k + rank, so k must stay strictly positive
        if !(self.search.rrf_k > 0.0 && self.search.rrf_k.is_finite()) {
            errors.push(format!("search.rrf_k must be a positive number, got {}", self.search.rrf_k));
        }

        if self.search.default_limit > self.search.max_limit {
            errors.push("search.default_limit cannot exceed search.max_limit".to_string());
        }

        if self.cache.enabled && self.cache.url.trim().is_empty() {
            errors.push("cache.url cannot be empty when the cache is enabled".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Configuration {
                message: format!("validation failed:\n  - {}", errors.join("\n  - ")),
            })
        }
    }
}

impl CacheConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            url: default_redis_url(),
            namespace: default_cache_namespace(),
            ttl_search_secs: default_ttl_search(),
            ttl_embedding_secs: default_ttl_embedding(),
            ttl_rerank_secs: default_ttl_rerank(),
            ttl_expansion_secs: default_ttl_expansion(),
            op_timeout_ms: default_cache_op_timeout(),
            connect_timeout_ms: default_cache_connect_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            base_url: default_ollama_url(),
            api_key: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            max_concurrency: default_max_concurrency(),
            backoff_base_ms: default_backoff_base(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_circuit_failures(),
            recovery_timeout_secs: default_circuit_recovery(),
            half_open_max_calls: default_circuit_half_open(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            bm25_candidates: default_candidates(),
            vector_candidates: default_candidates(),
            default_limit: default_search_limit(),
            max_limit: default_search_max_limit(),
            bm25_weight: default_channel_weight(),
            vector_weight: default_channel_weight(),
            enable_query_expansion: true,
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            top_k: default_rerank_top_k(),
            max_concurrency: default_max_concurrency(),
            max_text_chars: default_rerank_text_chars(),
        }
    }
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            low: default_confidence_low(),
            high: default_confidence_high(),
            top_n: default_confidence_top_n(),
            max_citations: default_max_citations(),
        }
    }
}

impl Default for MultiHopConfig {
    fn default() -> Self {
        Self {
            max_sub_queries: default_max_sub_queries(),
            min_per_query_limit: default_min_per_query_limit(),
            timeout_secs: default_decompose_timeout(),
        }
    }
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_llm_timeout(),
            default_limit: default_search_limit(),
            min_confidence: 0.0,
        }
    }
}

impl Default for ChunkingDefaults {
    fn default() -> Self {
        Self {
            timestamp: default_timestamp_chunking(),
            paragraph: default_paragraph_chunking(),
            page: default_page_chunking(),
            general: default_general_chunking(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_true(),
            metrics_port: 0,
            service_name: default_service_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> std::result::Result<AppConfig, config::ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.search.rrf_k, 60.0);
        assert!(config.search.enable_query_expansion);
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.cache.ttl_embedding_secs, 86_400);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.recovery_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = from_toml(
            r#"
            [embedding]
            max_concurrency = 8

            [chunking.page]
            chunk_size = 800
            chunk_overlap = 80
            min_chunk_size = 150
            "#,
        )
        .unwrap();

        assert_eq!(config.embedding.max_concurrency, 8);
        assert_eq!(config.embedding.batch_size, 10);
        assert_eq!(config.chunking.page, ChunkingConfig::new(800, 80, 150));
        assert_eq!(config.chunking.general, ChunkingConfig::new(400, 60, 50));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = from_toml(
            r#"
            [search]
            rrf_constant = 30
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rrf_k_must_be_positive() {
        let mut config = AppConfig::default();
        config.search.rrf_k = 0.0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("search.rrf_k"));

        config.search.rrf_k = f64::NAN;
        assert!(config.validate().is_err());

        config.search.rrf_k = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cross_field_validation_reports_all_failures() {
        let mut config = AppConfig::default();
        config.confidence.low = 0.8;
        config.confidence.high = 0.5;
        config.chunking.general.chunk_overlap = 400;
        config.search.default_limit = 500;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("confidence thresholds"));
        assert!(err.contains("chunking.general"));
        assert!(err.contains("default_limit"));
    }

    #[test]
    fn test_field_rules_enforced() {
        let mut config = AppConfig::default();
        config.embedding.max_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
