use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::pipeline::{PipelineContext, Stage, StageResult};
use crate::providers::VectorIndex;
use crate::types::{IndexInsertResult, Metadata};

use super::INDEXING;

/// Stage that writes chunk vectors into the scope's collection
///
/// This is the first stage with a durable side effect. A partial or failed
/// insert is cleaned up by the stage itself before it reports failure; its
/// `rollback` only runs after a successful insert.
///
/// # Context Requirements
/// - `chunks`, `embeddings` (same length), `validation` for the file hash
///
/// # Context Outputs
/// - `index_insert`
pub struct IndexingStage {
    index: Arc<dyn VectorIndex>,
}

impl IndexingStage {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }

    /// Remove whatever a failed insert left behind
    async fn cleanup(&self, collection: &str, document_id: &Uuid) {
        match self.index.delete_by_document_id(collection, document_id).await {
            Ok(removed) => tracing::info!(
                "Removed {} partial index entries of {} from '{}'",
                removed,
                document_id,
                collection
            ),
            Err(e) => tracing::error!(
                "Failed to clean up partial index entries of {} in '{}': {}",
                document_id,
                collection,
                e
            ),
        }
    }
}

#[async_trait]
impl Stage for IndexingStage {
    fn name(&self) -> &str {
        INDEXING
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<StageResult> {
        let document_id = *ctx.document_id();
        let collection = ctx.scope().collection_name();
        let chunks = ctx.require_chunks()?;
        let embeddings = ctx.require_embeddings()?;
        let file_hash = ctx.require_validation()?.file_hash.clone();

        if chunks.len() != embeddings.len() {
            return Ok(StageResult::failure(
                INDEXING,
                format!(
                    "{} chunks but {} embeddings; refusing to index",
                    chunks.len(),
                    embeddings.len()
                ),
            ));
        }
        let expected = chunks.len();
        let dimensions = embeddings.first().map_or(0, Vec::len);

        if let Err(e) = self.index.ensure_collection(&collection, dimensions).await {
            return Ok(StageResult::failure(
                INDEXING,
                format!("Could not prepare collection '{}': {}", collection, e),
            ));
        }

        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let metadata: Vec<Metadata> = chunks
            .iter()
            .map(|chunk| {
                let mut meta = chunk.metadata.clone();
                meta.insert("document_id".to_string(), json!(document_id.to_string()));
                meta.insert("chunk_id".to_string(), json!(chunk.id));
                meta.insert("chunk_index".to_string(), json!(chunk.index));
                meta.insert("page_number".to_string(), json!(chunk.page_number));
                meta.insert("file_name".to_string(), json!(ctx.file_name()));
                meta.insert("file_hash".to_string(), json!(file_hash));
                meta.insert("text".to_string(), json!(chunk.text));
                meta
            })
            .collect();

        let inserted = match self
            .index
            .insert(&collection, &ids, embeddings, &metadata)
            .await
        {
            Ok(inserted) if inserted == expected => inserted,
            Ok(inserted) => {
                tracing::error!(
                    "Partial insert into '{}': {} of {} entries",
                    collection,
                    inserted,
                    expected
                );
                self.cleanup(&collection, &document_id).await;
                return Ok(StageResult::failure(
                    INDEXING,
                    format!(
                        "Partial insert into '{}': {} of {} entries written",
                        collection, inserted, expected
                    ),
                )
                .with_metadata("inserted", inserted));
            }
            Err(e) => {
                tracing::error!("Insert into '{}' failed: {}", collection, e);
                self.cleanup(&collection, &document_id).await;
                return Ok(StageResult::failure(INDEXING, e.to_string()));
            }
        };

        tracing::info!(
            "Indexed {} chunks into '{}' with {}",
            inserted,
            collection,
            self.index.name()
        );
        ctx.record_metric("indexed_chunks", inserted);
        ctx.set_index_insert(IndexInsertResult {
            collection: collection.clone(),
            inserted,
        })?;

        Ok(
            StageResult::success(INDEXING, format!("Indexed {} chunks", inserted))
                .with_metadata("collection", collection)
                .with_metadata("inserted", inserted),
        )
    }

    async fn rollback(&self, ctx: &PipelineContext) -> Result<()> {
        let collection = ctx.scope().collection_name();
        let removed = self
            .index
            .delete_by_document_id(&collection, ctx.document_id())
            .await?;
        tracing::info!(
            "Rolled back {} index entries of {} from '{}'",
            removed,
            ctx.document_id(),
            collection
        );
        Ok(())
    }
}
