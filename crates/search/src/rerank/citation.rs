//! Citations shown next to a generated answer

use super::RankedResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Citation in display order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Citation index (1-based), matches `[n]` markers in the answer
    pub index: usize,

    pub content_id: Uuid,
    pub title: String,
    pub content_type: String,
    pub chunk_text: Option<String>,
    pub source_ref: Option<String>,
}

/// Project the first `max_citations` ranked results into citations
pub fn build_citations(results: &[RankedResult], max_citations: usize) -> Vec<Citation> {
    results
        .iter()
        .take(max_citations)
        .enumerate()
        .map(|(i, ranked)| {
            let result = &ranked.result;
            Citation {
                index: i + 1,
                content_id: result.content_id,
                title: result.doc.title.clone(),
                content_type: result.doc.content_type.clone(),
                chunk_text: result.doc.chunk_text.clone(),
                source_ref: result.doc.source_ref.clone(),
            }
        })
        .collect()
}
