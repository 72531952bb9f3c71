//! Core types for the ingestion pipeline

pub mod document;
pub mod outputs;
pub mod response;
pub mod scope;

pub use document::{estimate_tokens, extension_of, Chunk, FileType, Metadata, Page};
pub use outputs::{IndexInsertResult, StoragePaths, UsageResult};
pub use response::{ContextSummary, IngestResult, RunState};
pub use scope::{Caller, Scope, Visibility};
