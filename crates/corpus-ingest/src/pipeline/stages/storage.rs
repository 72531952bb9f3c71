use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::error::Result;
use crate::pipeline::{FailurePolicy, PipelineContext, Stage, StageResult};
use crate::providers::ObjectStore;
use crate::types::{extension_of, FileType, Metadata, StoragePaths};

use super::STORAGE;

/// Stage that archives the original file and chunk payloads
///
/// Non-blocking: upload failures are counted and logged, never fatal. The
/// index is the record of truth; the archive is best effort.
///
/// # Context Outputs
/// - `storage_paths`: only the objects that were actually written
///
/// # Metrics
/// - `pdf_uploaded`, `chunks_uploaded`, `chunks_failed`
pub struct StorageStage {
    store: Arc<dyn ObjectStore>,
}

impl StorageStage {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

/// Extension used for the archived original
fn original_extension(ctx: &PipelineContext) -> String {
    match ctx.validation().map(|v| v.document_type) {
        Some(file_type) if file_type != FileType::Unknown => file_type.extension().to_string(),
        _ => {
            let ext = extension_of(ctx.file_name());
            if ext.is_empty() {
                "bin".to_string()
            } else {
                ext
            }
        }
    }
}

#[async_trait]
impl Stage for StorageStage {
    fn name(&self) -> &str {
        STORAGE
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::NonBlocking
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<StageResult> {
        let document_id = *ctx.document_id();
        let scope = ctx.scope().clone();
        let extension = original_extension(ctx);

        let mut doc_meta = Metadata::new();
        doc_meta.insert("document_id".to_string(), json!(document_id.to_string()));
        doc_meta.insert("file_name".to_string(), json!(ctx.file_name()));
        if let Some(report) = ctx.validation() {
            doc_meta.insert("file_hash".to_string(), json!(report.file_hash));
        }

        let mut paths = StoragePaths::default();
        match self
            .store
            .put_document(&scope, &document_id, &extension, ctx.file_bytes(), &doc_meta)
            .await
        {
            Ok(true) => paths.document = Some(scope.document_path(&document_id, &extension)),
            Ok(false) => tracing::warn!(
                "Object store {} did not write original of {}",
                self.store.name(),
                document_id
            ),
            Err(e) => tracing::warn!("Failed to store original of {}: {}", document_id, e),
        }

        let chunks = ctx.chunks().unwrap_or_default();
        for chunk in chunks {
            let mut meta = chunk.metadata.clone();
            meta.insert("document_id".to_string(), json!(document_id.to_string()));
            meta.insert("chunk_index".to_string(), json!(chunk.index));
            meta.insert("page_number".to_string(), json!(chunk.page_number));

            match self
                .store
                .put_chunk(&scope, &document_id, &chunk.id, &chunk.text, &meta)
                .await
            {
                Ok(true) => paths.chunks.push(scope.chunk_path(&document_id, &chunk.id)),
                Ok(false) => paths.chunks_failed += 1,
                Err(e) => {
                    tracing::warn!("Failed to store chunk {}: {}", chunk.id, e);
                    paths.chunks_failed += 1;
                }
            }
        }

        let pdf_uploaded = paths.document.is_some();
        let chunks_uploaded = paths.chunks.len();
        let chunks_failed = paths.chunks_failed;
        if chunks_failed > 0 {
            tracing::warn!(
                "{} of {} chunk uploads failed for {}",
                chunks_failed,
                chunks_failed + chunks_uploaded,
                document_id
            );
        }

        ctx.record_metric("pdf_uploaded", pdf_uploaded);
        ctx.record_metric("chunks_uploaded", chunks_uploaded);
        ctx.record_metric("chunks_failed", chunks_failed);
        ctx.set_storage_paths(paths)?;

        Ok(StageResult::success(
            STORAGE,
            format!(
                "Stored {} of {} chunks{}",
                chunks_uploaded,
                chunks_uploaded + chunks_failed,
                if pdf_uploaded { " and the original file" } else { "" }
            ),
        )
        .with_metadata("pdf_uploaded", pdf_uploaded)
        .with_metadata("chunks_uploaded", chunks_uploaded)
        .with_metadata("chunks_failed", chunks_failed))
    }

    async fn rollback(&self, ctx: &PipelineContext) -> Result<()> {
        let wrote = ctx.storage_paths().is_some_and(StoragePaths::wrote_anything);
        if !wrote {
            tracing::debug!("Nothing stored for {}, skipping delete", ctx.document_id());
            return Ok(());
        }

        if self.store.delete_document(ctx.scope(), ctx.document_id()).await? {
            tracing::info!("Deleted stored objects of {}", ctx.document_id());
        } else {
            tracing::warn!("Object store found nothing to delete for {}", ctx.document_id());
        }
        Ok(())
    }
}
