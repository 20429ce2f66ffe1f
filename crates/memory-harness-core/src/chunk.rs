//! Line-based overlapping text chunker.
//!
//! Splits note text into [`MemoryChunk`]s that respect an approximate token
//! budget. Splitting happens on line boundaries, and each chunk after the
//! first is seeded with the trailing lines of its predecessor so that a
//! passage cut at a boundary is still retrievable as a whole.
//!
//! Each chunk carries the 1-based line range it was cut from plus a SHA-256
//! hash of its exact text. The hash is the embedding cache key, so identical
//! text in two different files shares one cached vector.
//!
//! # Algorithm
//!
//! 1. Convert `tokens` to `max_chars` using a 4 chars/token ratio (minimum
//!    32) and `overlap` to `overlap_chars` the same way.
//! 2. Walk the text line by line. A line longer than `max_chars` is cut
//!    into `max_chars`-sized segments that all keep the line's number.
//! 3. Each segment costs `len + 1` characters (its newline). Before a
//!    segment would push the buffer past `max_chars`, flush the buffer as a
//!    chunk.
//! 4. After a flush, keep the trailing buffer entries whose combined cost
//!    fits in `overlap_chars` and continue from there.
//! 5. Flush whatever remains at the end.
//!
//! The 4 chars/token ratio is a heuristic, not a tokenizer. Lengths are
//! counted in Unicode scalar values so multi-byte text is never split
//! inside a character.
//!
//! # Example
//!
//! ```rust
//! use memory_harness_core::chunk::{chunk_markdown, ChunkingParams};
//!
//! let chunks = chunk_markdown("Buy milk", ChunkingParams::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 1));
//! ```

use sha2::{Digest, Sha256};

use crate::models::MemoryChunk;

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Lower bound on the per-chunk character budget.
const MIN_CHUNK_CHARS: usize = 32;

/// Chunk sizing in approximate tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    /// Token budget per chunk.
    pub tokens: usize,
    /// Token budget carried over from the end of one chunk into the next.
    pub overlap: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            tokens: 400,
            overlap: 80,
        }
    }
}

struct Entry {
    text: String,
    chars: usize,
    line_no: i64,
}

/// Split markdown content into overlapping, line-addressed chunks.
///
/// Deterministic and pure: the same input always yields the same chunks.
/// Empty input yields a single empty chunk on line 1, matching the line
/// structure of the file (`"".split('\n')` is one empty line).
pub fn chunk_markdown(content: &str, params: ChunkingParams) -> Vec<MemoryChunk> {
    let max_chars = (params.tokens * CHARS_PER_TOKEN).max(MIN_CHUNK_CHARS);
    let overlap_chars = params.overlap * CHARS_PER_TOKEN;

    let mut chunks = Vec::new();
    let mut current: Vec<Entry> = Vec::new();
    let mut current_chars = 0usize;

    for (idx, line) in content.split('\n').enumerate() {
        let line_no = idx as i64 + 1;

        for segment in split_segments(line, max_chars) {
            let size = segment.chars + 1;
            if current_chars + size > max_chars && !current.is_empty() {
                chunks.push(flush(&current));
                current_chars = carry_overlap(&mut current, overlap_chars);
            }
            current_chars += size;
            current.push(Entry {
                text: segment.text,
                chars: segment.chars,
                line_no,
            });
        }
    }

    if !current.is_empty() {
        chunks.push(flush(&current));
    }

    chunks
}

/// SHA-256 hex digest of `value`.
pub fn hash_text(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct Segment {
    text: String,
    chars: usize,
}

/// Cut one line into segments of at most `max_chars` characters.
fn split_segments(line: &str, max_chars: usize) -> Vec<Segment> {
    if line.is_empty() {
        return vec![Segment {
            text: String::new(),
            chars: 0,
        }];
    }

    let chars: Vec<char> = line.chars().collect();
    chars
        .chunks(max_chars)
        .map(|piece| Segment {
            text: piece.iter().collect(),
            chars: piece.len(),
        })
        .collect()
}

fn flush(entries: &[Entry]) -> MemoryChunk {
    let text = entries
        .iter()
        .map(|e| e.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    // Callers only flush a non-empty buffer.
    let start_line = entries.first().map(|e| e.line_no).unwrap_or(1);
    let end_line = entries.last().map(|e| e.line_no).unwrap_or(start_line);
    let hash = hash_text(&text);

    MemoryChunk {
        start_line,
        end_line,
        text,
        hash,
    }
}

/// Keep the trailing entries that fit in `overlap_chars`; returns their cost.
fn carry_overlap(current: &mut Vec<Entry>, overlap_chars: usize) -> usize {
    let mut carried_chars = 0usize;
    let mut keep_from = current.len();

    for (i, entry) in current.iter().enumerate().rev() {
        let size = entry.chars + 1;
        if carried_chars + size > overlap_chars {
            break;
        }
        carried_chars += size;
        keep_from = i;
    }

    current.drain(..keep_from);
    carried_chars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(tokens: usize, overlap: usize) -> ChunkingParams {
        ChunkingParams { tokens, overlap }
    }

    #[test]
    fn test_single_line_single_chunk() {
        let chunks = chunk_markdown("Buy milk", ChunkingParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
        assert_eq!(chunks[0].text, "Buy milk");
        assert_eq!(chunks[0].hash, hash_text("Buy milk"));
    }

    #[test]
    fn test_empty_content() {
        let chunks = chunk_markdown("", ChunkingParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "");
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 1));
    }

    #[test]
    fn test_hash_known_value() {
        assert_eq!(
            hash_text(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_deterministic() {
        let text = (1..=200)
            .map(|i| format!("line number {} with some words", i))
            .collect::<Vec<_>>()
            .join("\n");
        let a = chunk_markdown(&text, params(40, 8));
        let b = chunk_markdown(&text, params(40, 8));
        assert_eq!(a, b);
        assert!(a.len() > 1);
    }

    #[test]
    fn test_chunks_respect_budget_without_hard_split() {
        let text = (1..=100)
            .map(|i| format!("entry {:03}", i))
            .collect::<Vec<_>>()
            .join("\n");
        // 8 tokens => 32 chars; each line costs 10 chars.
        let chunks = chunk_markdown(&text, params(8, 0));
        for c in &chunks {
            let cost: usize = c.text.split('\n').map(|l| l.chars().count() + 1).sum();
            assert!(cost <= 32, "chunk over budget: {:?}", c.text);
        }
        assert_eq!(chunks.first().map(|c| c.start_line), Some(1));
        assert_eq!(chunks.last().map(|c| c.end_line), Some(100));
    }

    #[test]
    fn test_no_overlap_lines_are_contiguous() {
        let text = (1..=30)
            .map(|i| format!("row {:02}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_markdown(&text, params(8, 0));
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line + 1);
        }
    }

    #[test]
    fn test_overlap_tail_becomes_next_head() {
        let text = (1..=40)
            .map(|i| format!("item {:02}", i))
            .collect::<Vec<_>>()
            .join("\n");
        // 16 tokens => 64 chars per chunk, 4 tokens => 16 chars overlap.
        // Each line costs 8 chars, so exactly two lines carry over.
        let chunks = chunk_markdown(&text, params(16, 4));
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let prev: Vec<&str> = pair[0].text.split('\n').collect();
            let next: Vec<&str> = pair[1].text.split('\n').collect();
            let tail = &prev[prev.len() - 2..];
            assert_eq!(&next[..2], tail);
            assert_eq!(pair[1].start_line, pair[0].end_line - 1);
        }
    }

    #[test]
    fn test_long_line_hard_split_keeps_line_number() {
        let long = "x".repeat(100);
        let text = format!("intro\n{}\noutro", long);
        let chunks = chunk_markdown(&text, params(8, 0));
        let from_long: Vec<&MemoryChunk> = chunks
            .iter()
            .filter(|c| c.text.contains('x'))
            .collect();
        assert!(from_long.len() >= 3);
        for c in &from_long {
            assert!(c.start_line <= 2 && c.end_line >= 2);
        }
        for c in &chunks {
            for line in c.text.split('\n') {
                assert!(line.chars().count() <= 32);
            }
        }
    }

    #[test]
    fn test_multibyte_split_on_char_boundary() {
        let line = "é".repeat(70);
        let chunks = chunk_markdown(&line, params(8, 0));
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, line);
        assert!(chunks.iter().all(|c| c.start_line == 1 && c.end_line == 1));
    }

    #[test]
    fn test_identical_text_hashes_identically() {
        let a = chunk_markdown("shared note", ChunkingParams::default());
        let b = chunk_markdown("shared note", params(100, 10));
        assert_eq!(a[0].hash, b[0].hash);
    }

    #[test]
    fn test_minimum_budget_applies() {
        // tokens = 1 would be 4 chars; the floor keeps chunks at 32.
        let text = "abcdefghij\nabcdefghij";
        let chunks = chunk_markdown(text, params(1, 0));
        assert_eq!(chunks.len(), 1);
    }
}
