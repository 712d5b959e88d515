//! Text chunking module
//!
//! Splits source content into ordered retrieval units. Four strategies are
//! available, selected from the content type:
//!
//! | content type        | strategy    | source_ref          |
//! |---------------------|-------------|---------------------|
//! | youtube             | timestamp   | `timestamp:m:ss`    |
//! | bookmark, note      | paragraph   | none                |
//! | pdf                 | page        | `page:N`            |
//! | anything else       | general     | none                |
//!
//! Chunking is pure and deterministic. Sizes are given in tokens and
//! approximated as `chars / 4`; `min_chunk_size` is in characters.

mod strategies;

pub use kas_common::config::{ChunkingConfig, ChunkingDefaults};
pub use strategies::PAGE_SEPARATOR;

use kas_common::metrics::record_chunks;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// How content is segmented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Transcript markers like `[3:45]`
    Timestamp,
    /// Blank-line delimited paragraphs, accumulated up to the size budget
    Paragraph,
    /// Explicit page separators
    Page,
    /// Recursive boundary-aware splitting with overlap
    General,
}

impl ChunkingStrategy {
    /// Strategy for a content type (youtube, bookmark, note, pdf, file, ...)
    pub fn for_content_type(content_type: &str) -> Self {
        match content_type.trim().to_ascii_lowercase().as_str() {
            "youtube" => ChunkingStrategy::Timestamp,
            "bookmark" | "note" => ChunkingStrategy::Paragraph,
            "pdf" => ChunkingStrategy::Page,
            _ => ChunkingStrategy::General,
        }
    }

    /// Built-in sizing for this strategy
    pub fn default_config(&self) -> ChunkingConfig {
        self.config_from(&ChunkingDefaults::default())
    }

    /// Sizing for this strategy from loaded configuration
    pub fn config_from(&self, defaults: &ChunkingDefaults) -> ChunkingConfig {
        match self {
            ChunkingStrategy::Timestamp => defaults.timestamp,
            ChunkingStrategy::Paragraph => defaults.paragraph,
            ChunkingStrategy::Page => defaults.page,
            ChunkingStrategy::General => defaults.general,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkingStrategy::Timestamp => "timestamp",
            ChunkingStrategy::Paragraph => "paragraph",
            ChunkingStrategy::Page => "page",
            ChunkingStrategy::General => "general",
        }
    }
}

impl fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A text chunk with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// The chunk content
    pub text: String,
    /// Position in the chunk list, contiguous from 0
    pub index: usize,
    /// Location in the source, e.g. `timestamp:3:00` or `page:2`
    pub source_ref: Option<String>,
    /// Byte offset of the first character in the original content
    pub start: Option<usize>,
    /// Byte offset one past the last character
    pub end: Option<usize>,
}

impl Chunk {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Rough token estimate (~4 chars per token)
    pub fn token_estimate(&self) -> usize {
        self.char_count() / 4
    }
}

/// Split `content` with the given strategy and sizing
pub fn chunk(content: &str, strategy: ChunkingStrategy, config: &ChunkingConfig) -> Vec<Chunk> {
    let chunks = match strategy {
        ChunkingStrategy::Timestamp => strategies::timestamp(content, config),
        ChunkingStrategy::Paragraph => strategies::paragraph(content, config),
        ChunkingStrategy::Page => strategies::page(content, config),
        ChunkingStrategy::General => strategies::general(content, config),
    };

    debug!(
        strategy = %strategy,
        input_len = content.len(),
        chunk_count = chunks.len(),
        chunk_size = config.chunk_size,
        "Text chunked"
    );
    record_chunks(strategy.as_str(), chunks.len());

    chunks
}

/// Chunker bound to a set of per-strategy sizes
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    defaults: ChunkingDefaults,
}

impl Chunker {
    pub fn new(defaults: ChunkingDefaults) -> Self {
        Self { defaults }
    }

    pub fn chunk(&self, content: &str, strategy: ChunkingStrategy) -> Vec<Chunk> {
        chunk(content, strategy, &strategy.config_from(&self.defaults))
    }

    /// Pick the strategy from the content type, then chunk
    pub fn chunk_content(&self, content: &str, content_type: &str) -> (ChunkingStrategy, Vec<Chunk>) {
        let strategy = ChunkingStrategy::for_content_type(content_type);
        (strategy, self.chunk(content, strategy))
    }
}

/// Fold chunks shorter than `min_size` characters into their successor.
///
/// The merged chunk keeps the earlier chunk's `source_ref` and start offset
/// and takes the later chunk's end offset. Afterwards every chunk except
/// possibly the last is at least `min_size` characters long, and indexes
/// run 0..N-1.
pub fn merge_small_chunks(chunks: Vec<Chunk>, min_size: usize) -> Vec<Chunk> {
    let mut iter = chunks.into_iter();
    let Some(mut current) = iter.next() else {
        return Vec::new();
    };

    let mut merged = Vec::new();
    for next in iter {
        if current.char_count() < min_size {
            current.text.push_str("\n\n");
            current.text.push_str(&next.text);
            current.end = next.end;
        } else {
            merged.push(std::mem::replace(&mut current, next));
        }
    }
    merged.push(current);

    reindex(&mut merged);
    merged
}

pub(crate) fn reindex(chunks: &mut [Chunk]) {
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.index = i;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_at(text: &str, index: usize, source_ref: Option<&str>) -> Chunk {
        Chunk {
            text: text.to_string(),
            index,
            source_ref: source_ref.map(str::to_string),
            start: Some(index * 100),
            end: Some(index * 100 + text.len()),
        }
    }

    fn assert_merge_invariant(chunks: &[Chunk], min_size: usize) {
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            if i + 1 < chunks.len() {
                assert!(
                    chunk.char_count() >= min_size,
                    "chunk {} has {} chars, min {}",
                    i,
                    chunk.char_count(),
                    min_size
                );
            }
        }
    }

    #[test]
    fn test_transcript_scenario() {
        let content = "[0:00] Hello and welcome. [3:00] Let's discuss ML.";
        let config = ChunkingConfig::new(500, 50, 5);

        let chunks = chunk(content, ChunkingStrategy::Timestamp, &config);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "Hello and welcome.");
        assert_eq!(chunks[0].source_ref.as_deref(), Some("timestamp:0:00"));
        assert_eq!(chunks[1].text, "Let's discuss ML.");
        assert_eq!(chunks[1].source_ref.as_deref(), Some("timestamp:3:00"));
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(ChunkingStrategy::for_content_type("youtube"), ChunkingStrategy::Timestamp);
        assert_eq!(ChunkingStrategy::for_content_type("bookmark"), ChunkingStrategy::Paragraph);
        assert_eq!(ChunkingStrategy::for_content_type("note"), ChunkingStrategy::Paragraph);
        assert_eq!(ChunkingStrategy::for_content_type("PDF"), ChunkingStrategy::Page);
        assert_eq!(ChunkingStrategy::for_content_type("file"), ChunkingStrategy::General);
        assert_eq!(ChunkingStrategy::for_content_type("podcast"), ChunkingStrategy::General);
    }

    #[test]
    fn test_default_configs() {
        assert_eq!(
            ChunkingStrategy::Timestamp.default_config(),
            ChunkingConfig::new(500, 50, 100)
        );
        assert_eq!(
            ChunkingStrategy::Paragraph.default_config(),
            ChunkingConfig::new(512, 77, 100)
        );
        assert_eq!(ChunkingStrategy::Page.default_config(), ChunkingConfig::new(1000, 100, 200));
        assert_eq!(ChunkingStrategy::General.default_config(), ChunkingConfig::new(400, 60, 50));
    }

    #[test]
    fn test_merge_folds_small_chunks_forward() {
        let chunks = vec![
            chunk_at("tiny", 0, Some("timestamp:0:00")),
            chunk_at("a long enough chunk", 1, Some("timestamp:0:30")),
            chunk_at("another long chunk", 2, Some("timestamp:1:00")),
        ];

        let merged = merge_small_chunks(chunks, 10);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "tiny\n\na long enough chunk");
        assert_eq!(merged[0].source_ref.as_deref(), Some("timestamp:0:00"));
        assert_eq!(merged[0].start, Some(0));
        assert_eq!(merged[0].end, Some(100 + "a long enough chunk".len()));
        assert_merge_invariant(&merged, 10);
    }

    #[test]
    fn test_merge_all_small_collapses_to_one() {
        let chunks = vec![chunk_at("a", 0, None), chunk_at("b", 1, None), chunk_at("c", 2, None)];
        let merged = merge_small_chunks(chunks, 50);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "a\n\nb\n\nc");
        assert_eq!(merged[0].index, 0);
    }

    #[test]
    fn test_merge_empty_and_small_tail() {
        assert!(merge_small_chunks(Vec::new(), 10).is_empty());

        let chunks = vec![chunk_at("long enough text", 0, None), chunk_at("x", 1, None)];
        let merged = merge_small_chunks(chunks, 10);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].text, "x");
    }

    #[test]
    fn test_merge_invariant_across_strategies() {
        let transcript = (0..40)
            .map(|i| format!("[{}:{:02}] segment {} {}", i / 2, (i % 2) * 30, i, "word ".repeat(i % 7)))
            .collect::<Vec<_>>()
            .join(" ");
        let article = (0..30)
            .map(|i| "sentence. ".repeat(i % 9 + 1))
            .collect::<Vec<_>>()
            .join("\n\n");

        for min in [1, 20, 80, 400] {
            let config = ChunkingConfig::new(30, 5, min);
            let timestamped = chunk(&transcript, ChunkingStrategy::Timestamp, &config);
            assert_merge_invariant(&timestamped, min);

            let paragraphs = chunk(&article, ChunkingStrategy::Paragraph, &config);
            assert_merge_invariant(&paragraphs, min);
        }
    }

    #[test]
    fn test_chunker_uses_loaded_sizes() {
        let mut defaults = ChunkingDefaults::default();
        defaults.general = ChunkingConfig::new(5, 0, 1);
        let chunker = Chunker::new(defaults);

        let text = "one two three four five six seven eight nine ten eleven twelve";
        let (strategy, chunks) = chunker.chunk_content(text, "file");

        assert_eq!(strategy, ChunkingStrategy::General);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.char_count() <= 20));
    }

    #[test]
    fn test_chunk_serializes_for_output() {
        let chunk = chunk_at("text", 0, Some("page:1"));
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["source_ref"], "page:1");
        assert_eq!(json["index"], 0);
    }
}
