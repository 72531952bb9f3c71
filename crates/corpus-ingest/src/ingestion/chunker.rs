//! Text chunking with page tracking

use async_trait::async_trait;
use serde_json::json;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::providers::Chunker;
use crate::types::{Chunk, Page};

/// Sentence-aware chunker with configurable size and overlap
pub struct TextChunker {
    /// Target chunk size in characters
    chunk_size: usize,
    /// Overlap between chunks
    overlap: usize,
    /// Minimum chunk size
    min_size: usize,
}

impl TextChunker {
    /// Create a new chunker
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            min_size: 16,
        }
    }

    /// Create from config
    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            overlap: config.chunk_overlap,
            min_size: config.min_chunk_size,
        }
    }

    /// Split one page into chunk texts
    fn chunk_page(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current = String::new();

        for sentence in text.split_sentence_bounds() {
            if !current.is_empty() && current.len() + sentence.len() > self.chunk_size {
                if current.trim().len() >= self.min_size {
                    pieces.push(current.trim().to_string());
                }
                current = self.overlap_text(&current);
            }

            // A single sentence longer than the target is cut on char boundaries
            if sentence.len() > self.chunk_size {
                for part in split_long(sentence, self.chunk_size) {
                    if !current.is_empty() && current.len() + part.len() > self.chunk_size {
                        if current.trim().len() >= self.min_size {
                            pieces.push(current.trim().to_string());
                        }
                        current = self.overlap_text(&current);
                    }
                    current.push_str(part);
                }
            } else {
                current.push_str(sentence);
            }
        }

        if current.trim().len() >= self.min_size {
            pieces.push(current.trim().to_string());
        }

        pieces
    }

    /// Get overlap text from the end of a chunk
    fn overlap_text(&self, text: &str) -> String {
        if self.overlap == 0 {
            return String::new();
        }
        if text.len() <= self.overlap {
            return text.to_string();
        }

        let mut start = text.len() - self.overlap;
        while start > 0 && !text.is_char_boundary(start) {
            start -= 1;
        }
        let tail = &text[start..];

        // Prefer to start the overlap on a word boundary
        match tail.find(' ') {
            Some(pos) => tail[pos + 1..].to_string(),
            None => tail.to_string(),
        }
    }
}

/// Cut `text` into pieces of at most `max` bytes on char boundaries
fn split_long(text: &str, max: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + max).min(text.len());
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // max is smaller than one char; take the whole char
            end = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
        parts.push(&text[start..end]);
        start = end;
    }
    parts
}

#[async_trait]
impl Chunker for TextChunker {
    async fn chunk(&self, pages: &[Page], document_id: &Uuid) -> Result<Vec<Chunk>> {
        if self.chunk_size == 0 {
            return Err(Error::chunking("chunk size must be > 0"));
        }

        let mut chunks = Vec::new();
        for page in pages {
            for text in self.chunk_page(&page.text) {
                let mut chunk = Chunk::new(
                    *document_id,
                    chunks.len() as u32,
                    text,
                    Some(page.page_number),
                );
                chunk
                    .metadata
                    .insert("char_count".to_string(), json!(chunk.text.chars().count()));
                chunks.push(chunk);
            }
        }

        Ok(chunks)
    }

    fn name(&self) -> &str {
        "text-chunker"
    }
}
