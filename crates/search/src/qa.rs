//! Question answering with citations and confidence
//!
//! Pipeline:
//! 1. Hybrid search for relevant content
//! 2. Rerank results
//! 3. Confidence and citations
//! 4. Generate the answer, if confidence is sufficient
//!
//! `ask` never fails: every problem is reported through `warning`/`error`
//! on the returned [`QaResult`].

use crate::rerank::{build_citations, Citation, Confidence, ConfidenceCalculator, ConfidenceLevel, RankedResult, Reranker};
use crate::retrieval::{Retriever, SearchRequest};
use kas_common::config::{QaConfig, RerankConfig};
use kas_common::llm::{GenerationOptions, LlmClient};
use kas_common::metrics::record_qa_confidence;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions based on the provided context.

Guidelines:
- Answer based ONLY on the provided context
- If the context doesn't contain enough information, say so
- Cite sources using [1], [2], etc. when referencing specific information
- Be concise but thorough
- If you're unsure, indicate your uncertainty";

const LOW_CONFIDENCE_WARNING: &str =
    "Low confidence answer. The knowledge base may not contain sufficient information for this query.";

/// Per-question options
#[derive(Debug, Clone)]
pub struct AskOptions {
    /// Search results to retrieve
    pub limit: usize,
    /// Results kept after reranking
    pub rerank_top_k: usize,
    /// Skip generation below this confidence score
    pub min_confidence: f64,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            rerank_top_k: 5,
            min_confidence: 0.0,
        }
    }
}

impl AskOptions {
    pub fn from_config(qa: &QaConfig, rerank: &RerankConfig) -> Self {
        Self {
            limit: qa.default_limit,
            rerank_top_k: rerank.top_k,
            min_confidence: qa.min_confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaResult {
    pub query: String,
    pub answer: String,
    pub confidence: ConfidenceLevel,
    pub confidence_score: f64,
    pub citations: Vec<Citation>,
    pub warning: Option<String>,
    pub error: Option<String>,
}

impl QaResult {
    fn failed(query: &str, error: impl Into<String>) -> Self {
        Self {
            query: query.to_string(),
            answer: String::new(),
            confidence: ConfidenceLevel::Low,
            confidence_score: 0.0,
            citations: Vec::new(),
            warning: None,
            error: Some(error.into()),
        }
    }

    fn unanswered(query: &str, confidence: Confidence, citations: Vec<Citation>) -> Self {
        Self {
            query: query.to_string(),
            answer: String::new(),
            confidence: confidence.level,
            confidence_score: confidence.score,
            citations,
            warning: None,
            error: None,
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none() && !self.answer.is_empty()
    }
}

/// Numbered context block matching the citation indices
pub fn build_prompt(query: &str, ranked: &[RankedResult]) -> String {
    let mut context = String::new();
    for (i, r) in ranked.iter().enumerate() {
        let doc = &r.result.doc;
        context.push_str(&format!(
            "\n[{}] {}\n{}\n",
            i + 1,
            doc.title,
            doc.chunk_text.as_deref().unwrap_or_default()
        ));
        if let Some(source) = doc.source_ref.as_deref().filter(|s| !s.is_empty()) {
            context.push_str(&format!("Source: {source}\n"));
        }
    }

    format!(
        "Context:\n{context}\n\nQuestion: {query}\n\nPlease answer the question based on the context above. Cite your sources."
    )
}

pub struct QaPipeline {
    retriever: Arc<dyn Retriever>,
    reranker: Arc<Reranker>,
    confidence: ConfidenceCalculator,
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
    max_citations: usize,
}

impl QaPipeline {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        reranker: Arc<Reranker>,
        confidence: ConfidenceCalculator,
        llm: Arc<dyn LlmClient>,
        config: &QaConfig,
        max_citations: usize,
    ) -> Self {
        Self {
            retriever,
            reranker,
            confidence,
            llm,
            timeout: Duration::from_secs(config.timeout_secs),
            max_citations,
        }
    }

    /// Answer a question from the knowledge base
    #[instrument(skip(self, options), fields(query_len = query.len()))]
    pub async fn ask(&self, query: &str, options: &AskOptions) -> QaResult {
        let request = SearchRequest::new(query).with_limit(options.limit);
        let response = match self.retriever.retrieve(&request).await {
            Ok(response) => response,
            Err(e) => return QaResult::failed(query, format!("Q&A failed: {e}")),
        };

        if response.results.is_empty() {
            return QaResult::failed(query, "No relevant content found in knowledge base.");
        }

        let ranked = self
            .reranker
            .rerank(query, response.results, Some(options.rerank_top_k))
            .await;
        if ranked.is_empty() {
            return QaResult::failed(query, "Reranking failed.");
        }

        let confidence = self.confidence.calculate(&ranked);
        record_qa_confidence(confidence.level.as_str(), confidence.score);
        let citations = build_citations(&ranked, self.max_citations);
        let mut result = QaResult::unanswered(query, confidence, citations);

        if confidence.score < options.min_confidence {
            result.warning = Some(format!(
                "Confidence too low ({:.2} < {}). The knowledge base may not contain relevant information for this query.",
                confidence.score, options.min_confidence
            ));
            return result;
        }

        let generation = GenerationOptions {
            max_tokens: 1024,
            temperature: 0.3,
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
        };
        let prompt = build_prompt(query, &ranked);

        match timeout(self.timeout, self.llm.generate(&prompt, &generation)).await {
            Ok(Ok(answer)) => {
                info!(confidence = %confidence.level, citations = result.citations.len(), "Answer generated");
                result.answer = answer;
                if confidence.level == ConfidenceLevel::Low {
                    result.warning = Some(LOW_CONFIDENCE_WARNING.to_string());
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Answer generation failed");
                result.error = Some(format!("Failed to generate answer: {e}"));
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Answer generation timed out");
                result.warning =
                    Some("LLM generation timed out. Results shown without synthesized answer.".to_string());
                result.error = Some(format!("LLM timeout after {}s", self.timeout.as_secs()));
            }
        }

        result
    }
}
