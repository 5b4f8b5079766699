//! Sentence-aligned text chunking with position tracking

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// A span of document text sent to the section classifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    /// Byte offset of `text` in the source
    pub start: usize,
    pub end: usize,
}

/// Text chunker with configurable size and overlap
pub struct TextChunker {
    /// Target chunk size in bytes
    chunk_size: usize,
    /// Overlap between consecutive chunks
    overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap: overlap.min(chunk_size / 2),
        }
    }

    /// Split `text` on sentence bounds into chunks of at most `chunk_size`
    /// bytes. A single sentence longer than that becomes its own chunk.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let bounds: Vec<(usize, &str)> = text.split_sentence_bound_indices().collect();
        let mut chunks = Vec::new();
        let mut first = 0usize;

        while first < bounds.len() {
            let start = bounds[first].0;
            let mut end = start;
            let mut next = first;

            while next < bounds.len() {
                let sentence_end = bounds[next].0 + bounds[next].1.len();
                if next > first && sentence_end - start > self.chunk_size {
                    break;
                }
                end = sentence_end;
                next += 1;
            }

            if let Some(chunk) = trimmed_chunk(text, start, end, chunks.len()) {
                chunks.push(chunk);
            }
            if next >= bounds.len() {
                break;
            }

            // Restart at the earliest sentence inside the overlap window
            let overlap_from = end.saturating_sub(self.overlap);
            first = (first + 1..next)
                .find(|&k| bounds[k].0 >= overlap_from)
                .unwrap_or(next);
        }

        chunks
    }
}

fn trimmed_chunk(text: &str, start: usize, end: usize, index: usize) -> Option<TextChunk> {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lead = slice.len() - slice.trim_start().len();
    Some(TextChunk {
        index,
        text: trimmed.to_string(),
        start: start + lead,
        end: start + lead + trimmed.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = TextChunker::new(2000, 200).chunk("  Executive summary. We propose a migration.  ");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Executive summary. We propose a migration.");
        assert_eq!(chunks[0].start, 2);
    }

    #[test]
    fn test_chunks_respect_size_and_offsets() {
        let text = "Sentence number one is here. ".repeat(40);
        let chunks = TextChunker::new(200, 0).chunk(&text);

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.text.len() <= 200);
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text: String = (0..30).map(|i| format!("This is sentence {}. ", i)).collect();
        let chunks = TextChunker::new(150, 60).chunk(&text);

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].start < pair[0].end, "chunks should overlap");
            assert!(pair[1].start > pair[0].start, "chunks should advance");
        }
        assert!(chunks.last().unwrap().text.ends_with("sentence 29."));
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(TextChunker::new(100, 10).chunk("   \n ").is_empty());
    }
}
