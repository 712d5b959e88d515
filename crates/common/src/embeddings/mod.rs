//! Embedding service abstraction
//!
//! Provides a unified interface for multiple embedding providers:
//! - Ollama (nomic-embed-text and other local models)
//! - OpenAI-compatible `/embeddings` endpoints
//! - A deterministic mock for tests and offline runs
//!
//! [`BatchEmbedder`] layers caching, bounded concurrency, retries and a
//! [`CircuitBreaker`] on top.

mod batch;
mod circuit;

pub use batch::{BatchEmbedder, BatchOptions};
pub use circuit::{CircuitBreaker, CircuitState, CircuitStats};

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| AppError::Configuration {
            message: format!("Failed to create HTTP client: {}", e),
        })
}

/// Map a transport error, keeping timeouts distinguishable
fn transport_error(provider: &str, operation: &str, timeout_ms: u64, e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Timeout {
            operation: format!("{} {}", provider, operation),
            timeout_ms,
        }
    } else {
        AppError::provider(provider, format!("Request failed: {}", e))
    }
}

async fn check_status(provider: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::provider(provider, format!("API error {}: {}", status, body)))
}

/// Ollama embedding client (`POST /api/embeddings`)
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
    timeout_ms: u64,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    embedding: Option<Vec<f32>>,
}

#[derive(Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

/// Result of a provider health check
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub models_loaded: Vec<String>,
    pub error: Option<String>,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
            timeout_ms: config.timeout_secs * 1000,
        })
    }

    /// Check that Ollama is running and the embedding model is pulled
    pub async fn check_health(&self) -> ProviderHealth {
        let url = format!("{}/api/tags", self.base_url);
        let tags = match self.client.get(&url).send().await {
            Ok(response) => match check_status("ollama", response).await {
                Ok(response) => response.json::<OllamaTags>().await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            },
            Err(e) if e.is_connect() => {
                Err("Cannot connect to Ollama. Is it running? Start with: ollama serve".to_string())
            }
            Err(e) => Err(format!("Ollama health check failed: {}", e)),
        };

        match tags {
            Ok(tags) => {
                let models: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
                let loaded = models
                    .iter()
                    .any(|m| m.starts_with(&self.model) || m.contains(&self.model));
                ProviderHealth {
                    healthy: loaded,
                    error: (!loaded).then(|| {
                        format!(
                            "Embedding model '{}' not found. Run: ollama pull {}",
                            self.model, self.model
                        )
                    }),
                    models_loaded: models,
                }
            }
            Err(error) => ProviderHealth {
                healthy: false,
                models_loaded: Vec::new(),
                error: Some(error),
            },
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = OllamaRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("ollama", "embed", self.timeout_ms, e))?;
        let response = check_status("ollama", response).await?;

        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| AppError::invalid_response("ollama", format!("Failed to parse response: {}", e)))?;

        body.embedding
            .ok_or_else(|| AppError::invalid_response("ollama", "No embedding returned"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// OpenAI-compatible embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    timeout_ms: u64,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let dimension = match config.model.as_str() {
            "text-embedding-ada-002" => 1536,
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            _ => config.dimension,
        };

        Ok(Self {
            client: http_client(config)?,
            api_key,
            model: config.model.clone(),
            dimension,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_ms: config.timeout_secs * 1000,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let request = OpenAIRequest {
            input: vec![text],
            model: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error("openai", "embed", self.timeout_ms, e))?;
        let response = check_status("openai", response).await?;

        let result: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| AppError::invalid_response("openai", format!("Failed to parse response: {}", e)))?;

        result
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| AppError::invalid_response("openai", "Empty response"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Mock embedder for testing
///
/// Vectors are seeded from the text hash, so equal texts embed identically
/// and cosine similarity between a text and itself is 1.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let digest = Sha256::digest(text.as_bytes());
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        let mut rng = StdRng::from_seed(seed);

        let raw: Vec<f32> = (0..self.dimension).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Ok(raw);
        }
        Ok(raw.into_iter().map(|v| v / norm).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "embedding.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Arc::new(OpenAIEmbedder::new(config, key)?))
        }
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("Unknown embedding provider '{}'", other),
        }),
    }
}

/// Cosine similarity; 0.0 when either vector has zero norm or lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::new(768);
        let a = embedder.embed("test text").await.unwrap();
        let b = embedder.embed("test text").await.unwrap();
        let c = embedder.embed("other text").await.unwrap();

        assert_eq!(a.len(), 768);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-12);
    }

    #[test]
    fn test_create_embedder_from_config() {
        let mut config = EmbeddingConfig {
            provider: "mock".into(),
            dimension: 16,
            ..EmbeddingConfig::default()
        };
        assert_eq!(create_embedder(&config).unwrap().dimension(), 16);

        config.provider = "openai".into();
        assert!(matches!(create_embedder(&config), Err(AppError::Configuration { .. })));

        config.provider = "nope".into();
        assert!(create_embedder(&config).is_err());
    }
}
