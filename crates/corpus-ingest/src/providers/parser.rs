//! Text extraction contract

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{FileType, Page};

/// What the parser knows about the bytes it receives
#[derive(Debug, Clone)]
pub struct ParseHint {
    pub file_name: String,
    pub file_type: FileType,
}

/// Extracts page text from document bytes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Extract pages; implementations return an error when nothing can be extracted
    async fn extract_text(&self, bytes: &[u8], hint: &ParseHint) -> Result<Vec<Page>>;

    /// Get parser name for logging
    fn name(&self) -> &str;
}
