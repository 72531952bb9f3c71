use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::pipeline::{PipelineContext, Stage, StageResult};
use crate::providers::Chunker;
use crate::types::Chunk;

use super::CHUNKING;

/// Stage that splits pages into chunks
///
/// Chunks are re-keyed after chunking: `index` is the position in the run's
/// chunk list and `id` is `{document_id}_{index:04}`, whatever the chunker
/// produced. Index entries and stored objects rely on these ids.
///
/// # Context Requirements
/// - `pages`
///
/// # Context Outputs
/// - `chunks`
pub struct ChunkingStage {
    chunker: Arc<dyn Chunker>,
}

impl ChunkingStage {
    pub fn new(chunker: Arc<dyn Chunker>) -> Self {
        Self { chunker }
    }
}

#[async_trait]
impl Stage for ChunkingStage {
    fn name(&self) -> &str {
        CHUNKING
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<StageResult> {
        let document_id = *ctx.document_id();
        let pages = ctx.require_pages()?;

        let mut chunks: Vec<Chunk> = self
            .chunker
            .chunk(pages, &document_id)
            .await?
            .into_iter()
            .filter(|c| !c.text.trim().is_empty())
            .collect();

        if chunks.is_empty() {
            return Ok(StageResult::failure(
                CHUNKING,
                format!("Chunking produced no chunks for '{}'", ctx.file_name()),
            ));
        }

        for (i, chunk) in chunks.iter_mut().enumerate() {
            let index = i as u32;
            chunk.document_id = document_id;
            chunk.index = index;
            chunk.id = Chunk::chunk_id(&document_id, index);
        }

        let chunk_count = chunks.len();
        let avg_chars = chunks.iter().map(|c| c.text.chars().count()).sum::<usize>() / chunk_count;
        tracing::info!(
            "Created {} chunks (avg {} chars) with {}",
            chunk_count,
            avg_chars,
            self.chunker.name()
        );

        ctx.record_metric("chunk_count", chunk_count);
        ctx.set_chunks(chunks)?;

        Ok(StageResult::success(CHUNKING, format!("Created {} chunks", chunk_count))
            .with_metadata("chunk_count", chunk_count)
            .with_metadata("avg_chunk_chars", avg_chars)
            .with_metadata("chunker", self.chunker.name()))
    }
}
