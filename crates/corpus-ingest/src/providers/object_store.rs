//! Object store contract for originals and chunk payloads

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Metadata, Scope};

/// Archive of original files and chunk payloads.
///
/// Object paths are fixed by [`Scope::document_path`] and [`Scope::chunk_path`];
/// implementations map them onto their own namespace. The boolean returned by
/// the put methods reports whether the object was actually written.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the original file as `{prefix}/{document_id}/file.{extension}`
    async fn put_document(
        &self,
        scope: &Scope,
        document_id: &Uuid,
        extension: &str,
        bytes: &[u8],
        metadata: &Metadata,
    ) -> Result<bool>;

    /// Store one chunk as `{prefix}/{document_id}/{chunk_id}.json`
    async fn put_chunk(
        &self,
        scope: &Scope,
        document_id: &Uuid,
        chunk_id: &str,
        text: &str,
        metadata: &Metadata,
    ) -> Result<bool>;

    /// Delete everything stored for a document
    async fn delete_document(&self, scope: &Scope, document_id: &Uuid) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
