//! Strategy implementations

use super::{merge_small_chunks, reindex, Chunk, ChunkingConfig};
use regex_lite::Regex;
use std::sync::LazyLock;
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::warn;

/// Separator inserted between pages by the PDF extractor
pub const PAGE_SEPARATOR: &str = "\n---PAGE BREAK---\n";

/// `[m:ss]`, `[mm:ss]` or `[h:mm:ss]` followed by optional whitespace
static TIMESTAMP_MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[(\d{1,2}:\d{2}(?::\d{2})?)\]\s*").ok());

static PARAGRAPH_BREAK: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\n\s*\n").ok());

/// Size budget in characters
fn char_budget(config: &ChunkingConfig) -> usize {
    (config.chunk_size * 4).max(1)
}

/// Trim `content[from..to]`, returning the trimmed span's byte range
fn trimmed_span(content: &str, from: usize, to: usize) -> Option<(usize, usize)> {
    let span = &content[from..to];
    let trimmed = span.trim();
    if trimmed.is_empty() {
        return None;
    }
    let start = from + (span.len() - span.trim_start().len());
    Some((start, start + trimmed.len()))
}

fn span_chunk(content: &str, start: usize, end: usize, source_ref: Option<String>) -> Chunk {
    Chunk {
        text: content[start..end].to_string(),
        index: 0,
        source_ref,
        start: Some(start),
        end: Some(end),
    }
}

/// Split a sub-span with the general strategy and shift offsets into the
/// coordinates of the full content
fn split_span(content: &str, start: usize, end: usize, config: &ChunkingConfig) -> Vec<Chunk> {
    general(&content[start..end], config)
        .into_iter()
        .map(|mut chunk| {
            chunk.start = chunk.start.map(|s| s + start);
            chunk.end = chunk.end.map(|e| e + start);
            chunk
        })
        .collect()
}

/// One chunk per timestamp marker; text before the first marker is `0:00`
pub(super) fn timestamp(content: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let Some(marker) = TIMESTAMP_MARKER.as_ref() else {
        return general(content, config);
    };

    let markers: Vec<_> = marker.captures_iter(content).collect();
    if markers.is_empty() {
        return general(content, config);
    }

    let mut chunks = Vec::new();
    let mut push = |tag: &str, from: usize, to: usize| {
        if let Some((start, end)) = trimmed_span(content, from, to) {
            chunks.push(span_chunk(content, start, end, Some(format!("timestamp:{}", tag))));
        }
    };

    let first_start = markers[0].get(0).map_or(0, |m| m.start());
    push("0:00", 0, first_start);

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(tag)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let body_end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(content.len(), |m| m.start());
        push(tag.as_str(), whole.end(), body_end);
    }

    reindex(&mut chunks);
    merge_small_chunks(chunks, config.min_chunk_size)
}

/// Byte ranges of non-empty paragraphs, trimmed
fn paragraph_spans(content: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut from = 0;
    if let Some(breaks) = PARAGRAPH_BREAK.as_ref() {
        for sep in breaks.find_iter(content) {
            spans.extend(trimmed_span(content, from, sep.start()));
            from = sep.end();
        }
    }
    spans.extend(trimmed_span(content, from, content.len()));
    spans
}

/// Accumulate paragraphs up to the character budget
pub(super) fn paragraph(content: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let budget = char_budget(config);
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Option<Chunk> = None;

    for (start, end) in paragraph_spans(content) {
        let para = &content[start..end];
        let para_chars = para.chars().count();

        if para_chars > budget {
            // Flush first so output stays in document order
            chunks.extend(current.take());
            chunks.extend(split_span(content, start, end, config));
            continue;
        }

        let fits = current
            .as_ref()
            .is_some_and(|cur| cur.char_count() + 2 + para_chars <= budget);

        if fits {
            if let Some(cur) = current.as_mut() {
                cur.text.push_str("\n\n");
                cur.text.push_str(para);
                cur.end = Some(end);
            }
        } else {
            chunks.extend(current.take());
            current = Some(span_chunk(content, start, end, None));
        }
    }
    chunks.extend(current);

    reindex(&mut chunks);
    merge_small_chunks(chunks, config.min_chunk_size)
}

/// One chunk per page tagged `page:N`; oversized pages are split but keep
/// their page tag. Pages are not merged across boundaries.
pub(super) fn page(content: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let budget = char_budget(config);
    let mut chunks = Vec::new();
    let mut offset = 0;

    for (i, page) in content.split(PAGE_SEPARATOR).enumerate() {
        let page_ref = format!("page:{}", i + 1);

        if let Some((start, end)) = trimmed_span(content, offset, offset + page.len()) {
            if content[start..end].chars().count() > budget {
                chunks.extend(split_span(content, start, end, config).into_iter().map(|mut c| {
                    c.source_ref = Some(page_ref.clone());
                    c
                }));
            } else {
                chunks.push(span_chunk(content, start, end, Some(page_ref)));
            }
        }

        offset += page.len() + PAGE_SEPARATOR.len();
    }

    reindex(&mut chunks);
    chunks
}

/// Boundary-aware splitting: paragraph, line, sentence, word, then character
pub(super) fn general(content: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let capacity = char_budget(config);
    let overlap = config.chunk_overlap * 4;

    let chunk_config = match ChunkConfig::new(capacity).with_overlap(overlap) {
        Ok(chunk_config) => chunk_config,
        Err(e) => {
            warn!(capacity, overlap, error = %e, "Invalid chunk overlap, splitting without overlap");
            ChunkConfig::new(capacity)
        }
    };
    let splitter = TextSplitter::new(chunk_config);

    splitter
        .chunk_indices(content)
        .enumerate()
        .map(|(index, (start, text))| Chunk {
            text: text.to_string(),
            index,
            source_ref: None,
            start: Some(start),
            end: Some(start + text.len()),
        })
        .collect()
}
