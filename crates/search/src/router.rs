//! Query routing
//!
//! Keyword heuristics pick a query type; each type carries its own result
//! limit and decides whether to rerank and whether to decompose.

use crate::multihop::MultiHopSearcher;
use crate::rerank::{RankedResult, Reranker};
use crate::retrieval::{Retriever, SearchRequest};
use kas_common::errors::Result;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

/// "or" is deliberately absent: it matches inside "vector", "framework", ...
const COMPARISON_PATTERNS: &[&str] = &[
    " vs ",
    " versus ",
    "compare",
    "compared to",
    "difference between",
    " better than ",
];
const HOW_TO_PATTERNS: &[&str] = &[
    "how do i",
    "how to",
    "how can i",
    "steps to",
    "guide to",
    "tutorial",
    "way to",
    "implement",
];
const LIST_PATTERNS: &[&str] = &[
    "what are",
    "list of",
    "types of",
    "examples of",
    "features of",
    "options for",
    "best",
];
const DEFINITION_PATTERNS: &[&str] = &[
    "what is",
    "what's",
    "define",
    "explain",
    "meaning of",
    "definition of",
];
const COMPLEX_INDICATORS: &[&str] = &[
    "why",
    "when should",
    "best practice",
    "trade-off",
    "consider",
    "approach",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Direct lookup
    Simple,
    /// Needs reasoning across sources
    Complex,
    /// A vs B
    Comparison,
    /// Procedural
    HowTo,
    /// Enumeration
    List,
    /// Concept definition
    Definition,
}

/// Search parameters tuned per query type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoutingParams {
    pub limit: usize,
    pub rerank: bool,
    pub multi_hop: bool,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Simple => "simple",
            QueryType::Complex => "complex",
            QueryType::Comparison => "comparison",
            QueryType::HowTo => "how_to",
            QueryType::List => "list",
            QueryType::Definition => "definition",
        }
    }

    /// Classify a query. Precedence: comparison, how-to, complex, list,
    /// definition, long question, simple.
    pub fn classify(query: &str) -> Self {
        let lower = query.trim().to_lowercase();
        let word_count = lower.split_whitespace().count();
        let contains_any = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));
        let starts_with_any = |patterns: &[&str]| patterns.iter().any(|p| lower.starts_with(p));

        // Short queries like "x vs y" are too ambiguous to fan out
        if contains_any(COMPARISON_PATTERNS) && word_count >= 3 {
            return QueryType::Comparison;
        }

        if HOW_TO_PATTERNS
            .iter()
            .any(|p| lower.starts_with(p) || lower.contains(&format!(" {p}")))
        {
            return QueryType::HowTo;
        }

        // Before list/definition: "what are the trade-offs" is complex
        if contains_any(COMPLEX_INDICATORS) {
            return QueryType::Complex;
        }

        if starts_with_any(LIST_PATTERNS) {
            return QueryType::List;
        }

        if starts_with_any(DEFINITION_PATTERNS) {
            return QueryType::Definition;
        }

        if word_count > 10 && query.contains('?') {
            return QueryType::Complex;
        }

        QueryType::Simple
    }

    pub fn params(&self) -> RoutingParams {
        let (limit, rerank, multi_hop) = match self {
            QueryType::Simple => (5, false, false),
            QueryType::Definition => (5, true, false),
            QueryType::HowTo => (10, true, false),
            QueryType::List => (15, true, false),
            QueryType::Comparison => (20, true, true),
            QueryType::Complex => (15, true, true),
        };
        RoutingParams {
            limit,
            rerank,
            multi_hop,
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a routed search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedSearch {
    pub query_type: QueryType,

    /// Empty unless the query was decomposed
    pub sub_queries: Vec<String>,

    /// Rerank order when `reranked`, fusion order otherwise
    pub results: Vec<RankedResult>,

    pub reranked: bool,
    pub degraded: bool,
    pub warnings: Vec<String>,
}

pub struct Router {
    retriever: Arc<dyn Retriever>,
    multihop: Arc<MultiHopSearcher>,
    reranker: Arc<Reranker>,
}

impl Router {
    pub fn new(retriever: Arc<dyn Retriever>, multihop: Arc<MultiHopSearcher>, reranker: Arc<Reranker>) -> Self {
        Self {
            retriever,
            multihop,
            reranker,
        }
    }

    /// Search with the strategy picked for `query`.
    ///
    /// `limit` and `force_rerank` override the routed parameters when set.
    #[instrument(skip(self), fields(query_len = query.len()))]
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        namespace: Option<String>,
        force_rerank: Option<bool>,
    ) -> Result<RoutedSearch> {
        let query_type = QueryType::classify(query);
        let params = query_type.params();
        let limit = limit.unwrap_or(params.limit);
        counter!("kas_routed_queries_total", "type" => query_type.as_str()).increment(1);
        debug!(%query_type, limit, rerank = params.rerank, multi_hop = params.multi_hop, "Query routed");

        let (sub_queries, results, degraded, warnings) = if params.multi_hop {
            let hop = self.multihop.search(query, limit, namespace).await;
            (hop.sub_queries, hop.results, hop.degraded, hop.warnings)
        } else {
            let request = SearchRequest::new(query)
                .with_limit(limit)
                .with_namespace(namespace);
            let response = self.retriever.retrieve(&request).await?;
            (Vec::new(), response.results, response.degraded, response.warnings)
        };

        let reranked = force_rerank.unwrap_or(params.rerank);
        let results = if reranked {
            self.reranker.rerank(query, results, Some(limit)).await
        } else {
            let mut results = RankedResult::from_fused(results);
            results.truncate(limit);
            results
        };

        Ok(RoutedSearch {
            query_type,
            sub_queries,
            results,
            reranked,
            degraded,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let cases = [
            ("PostgreSQL vs MySQL for analytics", QueryType::Comparison),
            ("How do I implement RRF?", QueryType::HowTo),
            ("Step by step guide to tokio", QueryType::HowTo),
            ("What are the trade-offs of caching embeddings", QueryType::Complex),
            ("Why does the borrow checker reject this", QueryType::Complex),
            ("What are the features of Axum", QueryType::List),
            ("What is RAG?", QueryType::Definition),
            ("Explain reciprocal rank fusion", QueryType::Definition),
            ("FastAPI", QueryType::Simple),
            (
                "Is there a relationship between chunk overlap and the recall we measured last week?",
                QueryType::Complex,
            ),
        ];
        for (query, expected) in cases {
            assert_eq!(QueryType::classify(query), expected, "{query}");
        }
    }

    #[test]
    fn test_short_comparison_is_not_fanned_out() {
        assert_eq!(QueryType::classify("a vs b"), QueryType::Comparison);
        assert_eq!(QueryType::classify("rust vs"), QueryType::Simple);
    }

    #[test]
    fn test_vector_is_not_a_comparison() {
        assert_eq!(QueryType::classify("vector or framework"), QueryType::Simple);
    }

    #[test]
    fn test_params() {
        assert_eq!(
            QueryType::Simple.params(),
            RoutingParams {
                limit: 5,
                rerank: false,
                multi_hop: false
            }
        );
        assert!(QueryType::Comparison.params().multi_hop);
        assert_eq!(QueryType::Comparison.params().limit, 20);
        assert!(QueryType::Complex.params().multi_hop);
        assert!(!QueryType::List.params().multi_hop);
        assert_eq!(QueryType::List.params().limit, 15);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_value(QueryType::HowTo).unwrap(), "how_to");
    }
}
