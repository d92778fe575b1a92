//! Character-window text splitter
//!
//! Windows are at most `chunk_size` characters. Inside a window the split
//! point prefers a paragraph break, then a line break, then a space; the
//! separator stays with the chunk it ends. When no separator leaves room for
//! progress the window is cut at exactly `chunk_size` characters. The next
//! window starts `chunk_overlap` characters before the previous end.
//!
//! Offsets are character (not byte) offsets, end exclusive.

use crate::error::{ChunkingError, ChunkingResult};
use crate::hash::hash_content;
use crate::language::detect_language;
use serde::Serialize;

/// Default window size in characters
pub const DEFAULT_CHUNK_SIZE: usize = 700;

/// Default overlap between consecutive windows in characters
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// A contiguous segment of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub source_path: String,
    pub sequence_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub content_hash: String,
    pub language: &'static str,
    pub content: String,
}

/// Splitter configured with a window size and overlap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    /// # Errors
    /// Returns `ChunkingError::InvalidParameters` unless `0 <= overlap < size`
    pub const fn new(chunk_size: usize, chunk_overlap: usize) -> ChunkingResult<Self> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(ChunkingError::InvalidParameters {
                chunk_size,
                chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub const fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Lazily split `content`; calling again restarts from the beginning
    pub fn split<'a>(&self, content: &'a str, path: &'a str) -> Chunks<'a> {
        let mut boundaries: Vec<usize> = content.char_indices().map(|(i, _)| i).collect();
        boundaries.push(content.len());

        Chunks {
            content,
            path,
            language: detect_language(path),
            boundaries,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            next_start: (!content.trim().is_empty()).then_some(0),
            sequence_index: 0,
        }
    }

    /// Number of chunks `split` yields for `content`
    pub fn count(&self, content: &str) -> usize {
        self.split(content, "").count()
    }
}

/// Iterator returned by [`Chunker::split`]
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    content: &'a str,
    path: &'a str,
    language: &'static str,
    /// Byte offset of every character, plus `content.len()` as the final entry
    boundaries: Vec<usize>,
    chunk_size: usize,
    chunk_overlap: usize,
    next_start: Option<usize>,
    sequence_index: usize,
}

impl Chunks<'_> {
    fn total_chars(&self) -> usize {
        self.boundaries.len().saturating_sub(1)
    }

    fn byte_at(&self, char_index: usize) -> usize {
        self.boundaries
            .get(char_index)
            .copied()
            .unwrap_or(self.content.len())
    }

    fn text(&self, start: usize, end: usize) -> &str {
        self.content
            .get(self.byte_at(start)..self.byte_at(end))
            .unwrap_or_default()
    }

    /// End (exclusive) of the window starting at `start`
    fn window_end(&self, start: usize) -> usize {
        let total = self.total_chars();
        let hard_end = start.saturating_add(self.chunk_size).min(total);
        if hard_end == total {
            return total;
        }

        let window = self.text(start, hard_end);
        let window_byte_start = self.byte_at(start);
        let min_end = start.saturating_add(self.chunk_overlap);

        for separator in SEPARATORS {
            let Some(found) = window.rfind(separator) else {
                continue;
            };
            let byte_end = window_byte_start
                .saturating_add(found)
                .saturating_add(separator.len());
            if let Ok(char_end) = self.boundaries.binary_search(&byte_end) {
                if char_end > min_end {
                    return char_end;
                }
            }
        }

        hard_end
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        loop {
            let start = self.next_start?;
            let total = self.total_chars();
            if start >= total {
                self.next_start = None;
                return None;
            }

            let end = self.window_end(start);
            self.next_start = (end < total).then(|| end.saturating_sub(self.chunk_overlap));

            let text = self.text(start, end);
            if text.trim().is_empty() {
                continue;
            }

            let chunk = Chunk {
                source_path: self.path.to_string(),
                sequence_index: self.sequence_index,
                start_offset: start,
                end_offset: end,
                content_hash: hash_content(text),
                language: self.language,
                content: text.to_string(),
            };
            self.sequence_index = self.sequence_index.saturating_add(1);
            return Some(chunk);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn prose(words: usize) -> String {
        (0..words)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        assert!(Chunker::new(0, 0).is_err());
        assert!(Chunker::new(100, 100).is_err());
        assert!(Chunker::new(100, 150).is_err());
        assert!(Chunker::new(100, 99).is_ok());
    }

    #[test]
    fn test_empty_and_whitespace_content_yield_nothing() {
        let chunker = Chunker::default();
        assert_eq!(chunker.count(""), 0);
        assert_eq!(chunker.count("  \n\n\t  "), 0);
    }

    #[test]
    fn test_short_content_is_single_chunk() {
        let chunker = Chunker::default();
        let chunks: Vec<Chunk> = chunker.split("fn main() {}\n", "src/main.rs").collect();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 13);
        assert_eq!(chunks[0].language, "rust");
        assert_eq!(chunks[0].content_hash, hash_content("fn main() {}\n"));
    }

    #[test]
    fn test_hard_cut_without_separators() {
        let chunker = Chunker::new(10, 3).unwrap();
        let content = "a".repeat(24);
        let chunks: Vec<Chunk> = chunker.split(&content, "blob.txt").collect();

        let spans: Vec<(usize, usize)> =
            chunks.iter().map(|c| (c.start_offset, c.end_offset)).collect();
        assert_eq!(spans, vec![(0, 10), (7, 17), (14, 24)]);
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let chunker = Chunker::new(30, 5).unwrap();
        let content = "first paragraph here\n\nsecond paragraph that is long";
        let first = chunker.split(content, "notes.md").next().unwrap();

        assert_eq!(first.content, "first paragraph here\n\n");
        assert_eq!(first.end_offset, 22);
    }

    #[test]
    fn test_chunks_cover_content_in_order_with_exact_overlap() {
        let chunker = Chunker::new(50, 10).unwrap();
        let content = prose(200);
        let chunks: Vec<Chunk> = chunker.split(&content, "prose.txt").collect();

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks.last().unwrap().end_offset, content.chars().count());
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset > pair[0].start_offset);
            assert_eq!(pair[1].start_offset, pair[0].end_offset - 10);
            assert_eq!(pair[1].sequence_index, pair[0].sequence_index + 1);
        }
        assert!(chunks.iter().all(|c| c.end_offset - c.start_offset <= 50));
    }

    #[test]
    fn test_offsets_are_characters_not_bytes() {
        let chunker = Chunker::new(4, 1).unwrap();
        let content = "ééééééé";
        let chunks: Vec<Chunk> = chunker.split(content, "accents.txt").collect();

        assert_eq!(chunks[0].content, "éééé");
        assert_eq!((chunks[0].start_offset, chunks[0].end_offset), (0, 4));
        assert_eq!((chunks[1].start_offset, chunks[1].end_offset), (3, 7));
    }

    #[test]
    fn test_split_is_deterministic_and_restartable() {
        let chunker = Chunker::new(64, 16).unwrap();
        let content = prose(120);

        let first: Vec<Chunk> = chunker.split(&content, "a.txt").collect();
        let second: Vec<Chunk> = chunker.split(&content, "a.txt").collect();
        assert_eq!(first, second);

        let mut partial = chunker.split(&content, "a.txt");
        let head: Vec<Chunk> = partial.by_ref().take(2).collect();
        let tail: Vec<Chunk> = partial.collect();
        assert_eq!([head, tail].concat(), first);
        assert_eq!(chunker.count(&content), first.len());
    }

    #[test]
    fn test_always_makes_progress_with_separator_near_start() {
        let chunker = Chunker::new(10, 8).unwrap();
        let content = format!(" {}", "x".repeat(40));
        let chunks: Vec<Chunk> = chunker.split(&content, "edge.txt").collect();

        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset > pair[0].start_offset);
        }
        assert_eq!(chunks.last().unwrap().end_offset, 41);
    }
}
