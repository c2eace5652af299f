//! Document chunking.
//!
//! [`TextChunker`] splits text into overlapping character windows and pulls
//! each window's end back to the last sentence or paragraph boundary when one
//! sits late enough in the window. Offsets are counted in `char`s, so
//! multi-byte text is never split inside a code point.

use crate::config::RagConfig;
use crate::error::{RagError, Result};

/// A boundary must end past this share (in tenths) of `chunk_size` to be used.
const SNAP_MIN_TENTHS: usize = 7;

/// A strategy for splitting document text into chunk strings.
///
/// Implementations must be pure: identical input yields identical output.
pub trait Chunker: Send + Sync {
    /// Split text into ordered chunks. Empty or whitespace-only text yields none.
    fn chunk(&self, text: &str) -> Vec<String>;
}

/// A half-open window `[start, end)` of character offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
}

impl ChunkSpan {
    /// Window length in characters.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Boundary-aware sliding-window chunker.
///
/// Windows are `chunk_size` characters long and each one starts `chunk_overlap`
/// characters before the previous one ended, so the stride is
/// `chunk_size - chunk_overlap` unless the end was snapped to a boundary.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{Chunker, TextChunker};
///
/// let chunker = TextChunker::new(1000, 200)?;
/// let chunks = chunker.chunk(&document.content);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    /// Create a new `TextChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of overlapping characters between consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] unless `0 <= chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    /// Create a chunker from the chunking fields of a [`RagConfig`].
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Compute the character windows [`chunk`](Chunker::chunk) would return.
    pub fn chunk_spans(&self, text: &str) -> Vec<ChunkSpan> {
        let chars: Vec<char> = text.chars().collect();
        self.spans_of(&chars)
    }

    fn spans_of(&self, chars: &[char]) -> Vec<ChunkSpan> {
        let len = chars.len();
        let mut spans = Vec::new();
        if chars.iter().all(|c| c.is_whitespace()) {
            return spans;
        }

        let mut start = 0;
        loop {
            let raw_end = (start + self.chunk_size).min(len);
            let end = if raw_end < len { self.snap_end(chars, start, raw_end) } else { raw_end };

            if chars[start..end].iter().any(|c| !c.is_whitespace()) {
                spans.push(ChunkSpan { start, end });
            }
            if end >= len {
                break;
            }
            start = end - self.chunk_overlap;
        }

        spans
    }

    /// Pull `raw_end` back to the last sentence or paragraph boundary that ends
    /// past 70% of the window and still lets the next window advance.
    fn snap_end(&self, chars: &[char], start: usize, raw_end: usize) -> usize {
        for i in (start..raw_end).rev() {
            let is_sentence_end = matches!(chars[i], '.' | '!' | '?')
                && chars.get(i + 1).is_some_and(|c| c.is_whitespace());
            let is_paragraph_break = chars[i] == '\n' && i > start && chars[i - 1] == '\n';
            if !(is_sentence_end || is_paragraph_break) {
                continue;
            }

            let end = i + 1;
            if (end - start) * 10 <= self.chunk_size * SNAP_MIN_TENTHS {
                break;
            }
            if end > start + self.chunk_overlap {
                return end;
            }
            break;
        }
        raw_end
    }
}

impl Chunker for TextChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        self.spans_of(&chars)
            .into_iter()
            .map(|span| chars[span.start..span.end].iter().collect())
            .collect()
    }
}

/// Split `text` with a one-off [`TextChunker`].
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] unless `overlap < chunk_size`.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>> {
    Ok(TextChunker::new(chunk_size, overlap)?.chunk(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_not_below_chunk_size_is_a_config_error() {
        assert!(matches!(TextChunker::new(100, 100), Err(RagError::ConfigError(_))));
        assert!(matches!(TextChunker::new(0, 0), Err(RagError::ConfigError(_))));
        assert!(chunk_text("abc", 10, 20).is_err());
    }

    #[test]
    fn empty_and_blank_text_yield_no_chunks() {
        let chunker = TextChunker::new(10, 2).unwrap();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\t  ").is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("Just one sentence.", 100, 10).unwrap();
        assert_eq!(chunks, vec!["Just one sentence.".to_string()]);
    }

    #[test]
    fn unpunctuated_text_advances_by_stride() {
        let text = "x".repeat(2500);
        let chunker = TextChunker::new(1000, 200).unwrap();
        let spans = chunker.chunk_spans(&text);
        assert_eq!(
            spans,
            vec![
                ChunkSpan { start: 0, end: 1000 },
                ChunkSpan { start: 800, end: 1800 },
                ChunkSpan { start: 1600, end: 2500 },
            ]
        );
    }

    #[test]
    fn window_end_snaps_to_late_sentence_boundary() {
        // Sentence ends at char 17 of a 20-char window: past 70%.
        let text = "aaaaaaaaaaaaaaaa. bbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
        let chunks = chunk_text(text, 20, 5).unwrap();
        assert_eq!(chunks[0], "aaaaaaaaaaaaaaaa.");
    }

    #[test]
    fn early_boundaries_are_ignored() {
        // Sentence ends at char 5 of a 20-char window: too early to snap.
        let text = "aaaa. bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
        let chunks = chunk_text(text, 20, 5).unwrap();
        assert_eq!(chunks[0].chars().count(), 20);
    }

    #[test]
    fn paragraph_breaks_are_boundaries() {
        let text = format!("{}\n\n{}", "a".repeat(15), "b".repeat(40));
        let chunks = chunk_text(&text, 20, 4).unwrap();
        assert_eq!(chunks[0], format!("{}\n\n", "a".repeat(15)));
    }

    #[test]
    fn snapping_never_stalls_the_window() {
        // With a large overlap the boundary at 15 would restart the next window at 0.
        let text = format!("{}. {}", "a".repeat(14), "b".repeat(60));
        let chunker = TextChunker::new(20, 15).unwrap();
        let spans = chunker.chunk_spans(&text);
        for pair in spans.windows(2) {
            assert!(pair[1].start > pair[0].start);
        }
        assert_eq!(spans.last().unwrap().end, text.chars().count());
    }

    #[test]
    fn multibyte_text_is_split_on_char_offsets() {
        let text = "é".repeat(25);
        let chunks = chunk_text(&text, 10, 2).unwrap();
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks[0], "é".repeat(10));
    }
}
