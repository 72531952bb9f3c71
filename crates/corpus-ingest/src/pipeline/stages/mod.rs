//! The seven ingestion stages
//!
//! Executed in this order by the standard orchestrator:
//! 1. ValidationStage - Reject invalid or already-ingested documents
//! 2. ParsingStage - Extract page text
//! 3. ChunkingStage - Split pages into keyed chunks
//! 4. EmbeddingStage - Embed chunk texts in batches
//! 5. IndexingStage - Insert vectors into the tenant collection (first durable write)
//! 6. StorageStage - Archive the original file and chunks (non-blocking)
//! 7. ConsumeStage - Record usage against the caller's quota (non-blocking)

pub mod chunking;
pub mod consume;
pub mod embedding;
pub mod indexing;
pub mod parsing;
pub mod storage;
pub mod validation;

pub use chunking::ChunkingStage;
pub use consume::ConsumeStage;
pub use embedding::{EmbeddingErrorKind, EmbeddingStage};
pub use indexing::IndexingStage;
pub use parsing::ParsingStage;
pub use storage::StorageStage;
pub use validation::ValidationStage;

pub const VALIDATION: &str = "validation";
pub const PARSING: &str = "parsing";
pub const CHUNKING: &str = "chunking";
pub const EMBEDDING: &str = "embedding";
pub const INDEXING: &str = "indexing";
pub const STORAGE: &str = "storage";
pub const CONSUME: &str = "consume";

/// Stage names in execution order
pub const STAGE_ORDER: [&str; 7] = [
    VALIDATION, PARSING, CHUNKING, EMBEDDING, INDEXING, STORAGE, CONSUME,
];
