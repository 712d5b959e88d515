//! Multi-hop search for compound questions
//!
//! An LLM splits the question into a few independently searchable
//! sub-questions; each is searched on its own and the result sets are merged
//! with first-seen deduplication.

use crate::retrieval::{FusedResult, Retriever, SearchRequest};
use futures::future::join_all;
use kas_common::config::MultiHopConfig;
use kas_common::llm::{GenerationOptions, LlmClient};
use kas_common::metrics::record_multihop;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

const DECOMPOSE_PROMPT: &str = "Break this complex question into 2-3 simpler sub-questions that can be answered independently.
Each sub-question should focus on a single concept or entity.

Guidelines:
- Keep sub-questions concise and searchable
- Focus on key entities or concepts
- Avoid yes/no questions
- Each sub-question should contribute to answering the main question

Question: {query}

Return ONLY the sub-questions, one per line (no numbering, no extra text):";

/// Shorter lines are fragments, not questions
const MIN_SUB_QUERY_CHARS: usize = 6;

static LIST_MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s*").ok());

/// Clean an LLM reply into at most `max` sub-queries.
///
/// Numbering and bullet markers are stripped before the length check.
pub fn parse_sub_queries(response: &str, max: usize) -> Vec<String> {
    response
        .lines()
        .map(|line| {
            let line = line.trim();
            match LIST_MARKER.as_ref() {
                Some(marker) => marker.replace(line, "").trim().to_string(),
                None => line.to_string(),
            }
        })
        .filter(|line| line.chars().count() >= MIN_SUB_QUERY_CHARS)
        .take(max)
        .collect()
}

pub struct QueryDecomposer {
    llm: Arc<dyn LlmClient>,
    max_sub_queries: usize,
    timeout: Duration,
}

impl QueryDecomposer {
    pub fn new(llm: Arc<dyn LlmClient>, config: &MultiHopConfig) -> Self {
        Self {
            llm,
            max_sub_queries: config.max_sub_queries.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Split `query` into 1..=max sub-queries; any failure yields `[query]`
    #[instrument(skip(self), fields(query_len = query.len()))]
    pub async fn decompose(&self, query: &str) -> Vec<String> {
        let prompt = DECOMPOSE_PROMPT.replace("{query}", query);
        let options = GenerationOptions {
            max_tokens: 200,
            temperature: 0.3,
            system_prompt: None,
        };

        let response = match timeout(self.timeout, self.llm.generate(&prompt, &options)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, "Query decomposition failed");
                return vec![query.to_string()];
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Query decomposition timed out");
                return vec![query.to_string()];
            }
        };

        let sub_queries = parse_sub_queries(&response, self.max_sub_queries);
        if sub_queries.is_empty() {
            debug!("No sub-queries generated");
            return vec![query.to_string()];
        }

        debug!(count = sub_queries.len(), "Query decomposed");
        sub_queries
    }
}

/// Result of a multi-hop search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiHopResult {
    pub query: String,
    pub sub_queries: Vec<String>,

    /// Unique by content id, best score first
    pub results: Vec<FusedResult>,

    pub deduplicated: bool,

    /// Any sub-search ran without its vector channel
    pub degraded: bool,

    pub warnings: Vec<String>,
}

pub struct MultiHopSearcher {
    decomposer: QueryDecomposer,
    retriever: Arc<dyn Retriever>,
    min_per_query_limit: usize,
}

impl MultiHopSearcher {
    pub fn new(decomposer: QueryDecomposer, retriever: Arc<dyn Retriever>, config: &MultiHopConfig) -> Self {
        Self {
            decomposer,
            retriever,
            min_per_query_limit: config.min_per_query_limit,
        }
    }

    pub fn decomposer(&self) -> &QueryDecomposer {
        &self.decomposer
    }

    /// Fair share of `limit` for each of `count` sub-queries
    pub fn per_query_limit(&self, limit: usize, count: usize) -> usize {
        (limit / count.max(1)).max(self.min_per_query_limit)
    }

    #[instrument(skip(self), fields(query_len = query.len()))]
    pub async fn search(&self, query: &str, limit: usize, namespace: Option<String>) -> MultiHopResult {
        let sub_queries = self.decomposer.decompose(query).await;
        record_multihop(sub_queries.len());

        let per_query_limit = self.per_query_limit(limit, sub_queries.len());
        let requests: Vec<SearchRequest> = sub_queries
            .iter()
            .map(|sq| {
                SearchRequest::new(sq.clone())
                    .with_limit(per_query_limit)
                    .with_namespace(namespace.clone())
            })
            .collect();

        let responses = join_all(requests.iter().map(|r| self.retriever.retrieve(r))).await;

        let mut seen = HashSet::new();
        let mut results = Vec::new();
        let mut warnings = Vec::new();
        let mut degraded = false;

        // Sub-query order decides which duplicate survives
        for (sub_query, response) in sub_queries.iter().zip(responses) {
            match response {
                Ok(response) => {
                    degraded |= response.degraded;
                    warnings.extend(response.warnings);
                    results.extend(
                        response
                            .results
                            .into_iter()
                            .filter(|r| seen.insert(r.content_id)),
                    );
                }
                Err(e) => {
                    warn!(sub_query = %sub_query, error = %e, "Sub-query search failed");
                    warnings.push(format!("Sub-query search failed: {sub_query}"));
                }
            }
        }

        let total = results.len();
        results.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score));
        results.truncate(limit);

        debug!(
            sub_query_count = sub_queries.len(),
            total_results = total,
            returned_results = results.len(),
            "Multi-hop search complete"
        );

        MultiHopResult {
            query: query.to_string(),
            sub_queries,
            results,
            deduplicated: true,
            degraded,
            warnings,
        }
    }
}
