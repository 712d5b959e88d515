//! Reranking, confidence and citations
//!
//! Fused results are rescored against the query by a [`RelevanceScorer`],
//! then the rescored list feeds the confidence estimate and the citation
//! list handed to answer generation.

mod citation;
mod confidence;

pub use citation::{build_citations, Citation};
pub use confidence::{Confidence, ConfidenceCalculator, ConfidenceLevel};

use crate::retrieval::FusedResult;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kas_common::cache::{Cache, CacheCategory, Cached, Operation};
use kas_common::config::RerankConfig;
use kas_common::embeddings::{cosine_similarity, BatchEmbedder};
use kas_common::errors::Result;
use kas_common::metrics::OperationTimer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};

/// Search result with its reranking score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub result: FusedResult,
    pub rerank_score: f64,

    /// 1-based position before reranking
    pub original_rank: usize,
}

impl RankedResult {
    /// Keep fusion order, scoring each result by its fused score
    pub fn from_fused(results: Vec<FusedResult>) -> Vec<Self> {
        results
            .into_iter()
            .enumerate()
            .map(|(i, result)| RankedResult {
                rerank_score: result.fused_score,
                original_rank: i + 1,
                result,
            })
            .collect()
    }
}

/// Query/passage relevance collaborator
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Stable identifier, part of the rerank cache key
    fn name(&self) -> &str;

    async fn score(&self, query: &str, passage: &str) -> Result<f64>;
}

/// Scores a passage by cosine similarity between query and passage embeddings
pub struct EmbeddingScorer {
    embedder: Arc<BatchEmbedder>,
    name: String,
}

impl EmbeddingScorer {
    pub fn new(embedder: Arc<BatchEmbedder>) -> Self {
        let name = format!("cosine:{}", embedder.model_name());
        Self { embedder, name }
    }
}

#[async_trait]
impl RelevanceScorer for EmbeddingScorer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, query: &str, passage: &str) -> Result<f64> {
        let (query, passage) = tokio::try_join!(self.embedder.embed_one(query), self.embedder.embed_one(passage))?;
        Ok(cosine_similarity(&query, &passage))
    }
}

#[derive(Debug, Serialize)]
pub struct ScoreInput {
    pub query: String,
    pub passage: String,
}

/// Adapts a scorer to the cacheable [`Operation`] shape
pub struct PairScoring {
    scorer: Arc<dyn RelevanceScorer>,
}

#[async_trait]
impl Operation for PairScoring {
    type Input = ScoreInput;
    type Output = f64;

    fn name(&self) -> &str {
        self.scorer.name()
    }

    async fn call(&self, input: &ScoreInput) -> Result<f64> {
        self.scorer.score(&input.query, &input.passage).await
    }
}

/// Reorders fused results by query relevance
pub struct Reranker {
    scoring: Cached<PairScoring>,
    config: RerankConfig,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn RelevanceScorer>, cache: Arc<Cache>, config: &RerankConfig) -> Self {
        Self {
            scoring: Cached::new(PairScoring { scorer }, cache, CacheCategory::Rerank),
            config: config.clone(),
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.config.top_k
    }

    fn passage(&self, result: &FusedResult) -> String {
        result.passage().chars().take(self.config.max_text_chars).collect()
    }

    /// Rescore `results` and keep the best `top_k` (all when `None`).
    ///
    /// A passage whose scoring fails keeps its fused score, so reranking as
    /// a whole never fails. Equal scores keep their fused order.
    #[instrument(skip(self, query, results), fields(candidates = results.len()))]
    pub async fn rerank(&self, query: &str, results: Vec<FusedResult>, top_k: Option<usize>) -> Vec<RankedResult> {
        if results.is_empty() {
            return Vec::new();
        }

        let timer = OperationTimer::start("rerank_duration_seconds", self.scoring.inner().name().to_string());
        let concurrency = self.config.max_concurrency.max(1);

        let scores: Vec<f64> = stream::iter(results.iter())
            .map(|result| async move {
                let input = ScoreInput {
                    query: query.to_string(),
                    passage: self.passage(result),
                };
                match self.scoring.call(&input).await {
                    Ok(score) if score.is_finite() => score,
                    Ok(score) => {
                        warn!(content_id = %result.content_id, score, "Non-finite rerank score, keeping fused score");
                        result.fused_score
                    }
                    Err(e) => {
                        warn!(content_id = %result.content_id, error = %e, "Rerank scoring failed, keeping fused score");
                        result.fused_score
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut ranked: Vec<RankedResult> = results
            .into_iter()
            .zip(scores)
            .enumerate()
            .map(|(i, (result, rerank_score))| RankedResult {
                result,
                rerank_score,
                original_rank: i + 1,
            })
            .collect();

        ranked.sort_by(|a, b| b.rerank_score.total_cmp(&a.rerank_score));
        if let Some(top_k) = top_k {
            ranked.truncate(top_k);
        }

        timer.finish();
        ranked
    }
}
