//! Vector index contract

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::Metadata;

/// Tenant-scoped vector index
///
/// Implementations:
/// - `MemoryVectorIndex`: in-process collections backed by `DashMap`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not exist yet
    async fn ensure_collection(&self, _collection: &str, _dimensions: usize) -> Result<()> {
        Ok(())
    }

    /// Insert entries; `ids`, `vectors` and `metadata` are parallel slices.
    /// Returns the number of entries actually inserted.
    async fn insert(
        &self,
        collection: &str,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadata: &[Metadata],
    ) -> Result<usize>;

    /// Delete every entry of a document, returning how many were removed
    async fn delete_by_document_id(&self, collection: &str, document_id: &Uuid) -> Result<usize>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
