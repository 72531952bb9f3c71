//! Chunking contract

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Chunk, Page};

/// Splits extracted pages into chunks
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Chunker: Send + Sync {
    /// Chunk pages of the given document
    async fn chunk(&self, pages: &[Page], document_id: &Uuid) -> Result<Vec<Chunk>>;

    /// Get chunker name for logging
    fn name(&self) -> &str;
}
