use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::pipeline::{PipelineContext, Stage, StageResult};
use crate::providers::EmbeddingProvider;

use super::EMBEDDING;

/// Class of an embedding provider failure, for operator diagnosis
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingErrorKind {
    Authentication,
    RateLimit,
    Timeout,
    Other,
}

impl EmbeddingErrorKind {
    /// Classify a provider error message
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["401", "403", "unauthorized", "forbidden", "api key", "authentication"]) {
            Self::Authentication
        } else if has(&["429", "rate limit", "too many requests", "quota"]) {
            Self::RateLimit
        } else if has(&["timeout", "timed out"]) {
            Self::Timeout
        } else {
            Self::Other
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::Authentication => {
                "Authentication error: check the embedding provider credentials (API key)"
            }
            Self::RateLimit => "Rate limit exceeded: retry later or lower the embedding batch size",
            Self::Timeout => "Embedding request timed out: the provider may be overloaded",
            Self::Other => "Embedding provider error",
        }
    }
}

impl fmt::Display for EmbeddingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Other => "other",
        };
        f.write_str(label)
    }
}

/// Stage that embeds every chunk text
///
/// Texts are sent in batches of `batch_size`. Each batch must come back with
/// one vector per text, and every vector must have the provider's dimensions.
///
/// # Context Requirements
/// - `chunks`
///
/// # Context Outputs
/// - `embeddings`: one vector per chunk, in chunk order
pub struct EmbeddingStage {
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl EmbeddingStage {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    fn provider_failure(&self, error: &crate::error::Error) -> StageResult {
        let message = error.to_string();
        let kind = EmbeddingErrorKind::classify(&message);
        tracing::error!("Embedding with {} failed ({}): {}", self.embedder.name(), kind, message);
        StageResult::failure(EMBEDDING, format!("{}. {}", kind.hint(), message))
            .with_metadata("error_kind", kind.to_string())
            .with_metadata("model", self.embedder.model())
    }
}

#[async_trait]
impl Stage for EmbeddingStage {
    fn name(&self) -> &str {
        EMBEDDING
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<StageResult> {
        let texts: Vec<String> = ctx.require_chunks()?.iter().map(|c| c.text.clone()).collect();
        let dimensions = self.embedder.dimensions();
        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        let mut batches = 0;

        for batch in texts.chunks(self.batch_size) {
            let vectors = match self.embedder.embed_batch(batch).await {
                Ok(vectors) => vectors,
                Err(e) => return Ok(self.provider_failure(&e)),
            };
            batches += 1;

            if vectors.len() != batch.len() {
                return Ok(StageResult::failure(
                    EMBEDDING,
                    format!(
                        "Embedding count mismatch: expected {} vectors, got {}",
                        batch.len(),
                        vectors.len()
                    ),
                ));
            }
            if let Some(bad) = vectors.iter().find(|v| dimensions > 0 && v.len() != dimensions) {
                return Ok(StageResult::failure(
                    EMBEDDING,
                    format!(
                        "Embedding dimension mismatch: expected {}, got {}",
                        dimensions,
                        bad.len()
                    ),
                ));
            }
            embeddings.extend(vectors);
        }

        let count = embeddings.len();
        tracing::info!(
            "Generated {} embeddings in {} batches with {} ({})",
            count,
            batches,
            self.embedder.name(),
            self.embedder.model()
        );

        ctx.record_metric("embedding_count", count);
        ctx.record_metric("embedding_model", self.embedder.model());
        ctx.set_embeddings(embeddings)?;

        Ok(StageResult::success(EMBEDDING, format!("Generated {} embeddings", count))
            .with_metadata("embedding_count", count)
            .with_metadata("batches", batches)
            .with_metadata("model", self.embedder.model())
            .with_metadata("dimensions", dimensions))
    }
}
