//! Hybrid retrieval combining lexical and vector search
//!
//! Both channels run concurrently and are fused with RRF. Losing the vector
//! channel degrades to lexical-only results instead of failing the query.
//! The lexical channel sees the synonym-expanded query; the embedding is
//! always computed from the query as written.

use super::{
    fusion::RRFusion, Candidate, HybridSearchResponse, LexicalIndex, Retriever, SearchMode, SearchRequest,
    VectorIndex,
};
use crate::expansion::{ExpandedQuery, QueryExpander};
use kas_common::cache::{Cache, CacheCategory, Cached};
use kas_common::config::SearchConfig;
use kas_common::embeddings::BatchEmbedder;
use kas_common::errors::{AppError, Result};
use kas_common::metrics::{record_search, OperationTimer};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Collaborator error text kept in user-facing warnings
const WARNING_DETAIL_CHARS: usize = 100;

fn short(error: &impl std::fmt::Display) -> String {
    error.to_string().chars().take(WARNING_DETAIL_CHARS).collect()
}

/// Hybrid retriever combining vector and BM25
pub struct HybridRetriever {
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    embedder: Arc<BatchEmbedder>,
    cache: Arc<Cache>,
    expander: Cached<QueryExpander>,
    fusion: RRFusion,
    config: SearchConfig,
}

impl HybridRetriever {
    pub fn new(
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn VectorIndex>,
        embedder: Arc<BatchEmbedder>,
        cache: Arc<Cache>,
        config: &SearchConfig,
    ) -> Self {
        Self {
            lexical,
            vector,
            embedder,
            expander: Cached::new(QueryExpander, cache.clone(), CacheCategory::QueryExpansion),
            cache,
            fusion: RRFusion::from_config(config),
            config: config.clone(),
        }
    }

    pub fn fusion(&self) -> &RRFusion {
        &self.fusion
    }

    /// Requested limit clamped to `1..=max_limit`
    pub fn effective_limit(&self, request: &SearchRequest) -> usize {
        request
            .limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit.max(1))
    }

    async fn vector_candidates(&self, query: &str, namespace: Option<&str>) -> Result<Vec<Candidate>> {
        let embedding = self.embedder.embed_one(query).await?;
        self.vector
            .search(&embedding, self.config.vector_candidates, namespace)
            .await
    }

    /// Query text for the lexical channel
    pub async fn lexical_query(&self, query: &str) -> String {
        if !self.config.enable_query_expansion {
            return query.to_string();
        }

        let expanded = self
            .expander
            .call(&query.to_string())
            .await
            .unwrap_or_else(|_| ExpandedQuery::unchanged(query));
        if expanded.expansion_applied {
            debug!(terms_added = ?expanded.terms_added, "Query expanded");
        }
        expanded.expanded
    }

    /// Run both channels and fuse, without touching the search response cache
    pub async fn search_uncached(&self, request: &SearchRequest) -> HybridSearchResponse {
        let limit = self.effective_limit(request);
        let namespace = request.namespace.as_deref();
        let query = request.query.as_str();
        let lexical_query = self.lexical_query(query).await;

        let (lexical, vector) = tokio::join!(
            self.lexical.search(&lexical_query, self.config.bm25_candidates, namespace),
            self.vector_candidates(query, namespace)
        );

        let mut warnings = Vec::new();
        let mut degraded = false;

        let lexical = lexical.unwrap_or_else(|e| {
            error!(error = %e, "BM25 search failed");
            warnings.push(format!("BM25 search failed: {}", short(&e)));
            Vec::new()
        });
        let lexical_failed = !warnings.is_empty();

        let vector = vector.unwrap_or_else(|e| {
            match e {
                AppError::CircuitOpen { .. } => {
                    warn!("Embedding circuit open, using BM25 only");
                    warnings.push("Semantic search unavailable: embedding service circuit open".to_string());
                }
                e => {
                    error!(error = %e, "Vector search failed");
                    warnings.push(format!("Semantic search failed: {}", short(&e)));
                }
            }
            degraded = true;
            Vec::new()
        });

        let mode = match (lexical_failed, degraded) {
            (_, true) => SearchMode::LexicalOnly,
            (true, false) => SearchMode::VectorOnly,
            (false, false) => SearchMode::Hybrid,
        };

        let mut results = self.fusion.fuse(&lexical, &vector);
        if let Some(min_score) = request.min_score {
            results.retain(|r| r.fused_score >= min_score);
        }
        results.truncate(limit);

        HybridSearchResponse {
            results,
            degraded,
            mode,
            warnings,
        }
    }
}

#[async_trait::async_trait]
impl Retriever for HybridRetriever {
    #[instrument(skip(self, request), fields(query_len = request.query.len()))]
    async fn retrieve(&self, request: &SearchRequest) -> Result<HybridSearchResponse> {
        let timer = OperationTimer::start("retrieval_duration_seconds", "hybrid");
        let limit = self.effective_limit(request);
        let key = (
            &request.query,
            limit,
            request.namespace.as_deref(),
            request.min_score,
        );

        if let Some(cached) = self
            .cache
            .get::<HybridSearchResponse, _>(CacheCategory::Search, &key)
            .await
        {
            debug!(results = cached.results.len(), "Search served from cache");
            return Ok(cached);
        }

        let response = self.search_uncached(request).await;

        // Partial responses are not worth replaying
        if response.warnings.is_empty() {
            self.cache.set(CacheCategory::Search, &response, &key).await;
        }

        record_search(
            timer.finish(),
            response.mode.as_str(),
            response.results.len(),
            response.degraded,
        );
        Ok(response)
    }
}
