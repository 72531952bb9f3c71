//! Collaborator abstractions consumed by the pipeline stages
//!
//! Every external system the pipeline coordinates sits behind one narrow
//! trait, so a run's whole collaborator graph can be swapped for local or
//! in-memory implementations.

pub mod chunker;
pub mod embedding;
pub mod local;
pub mod object_store;
pub mod ollama;
pub mod parser;
pub mod usage_meter;
pub mod validator;
pub mod vector_index;

pub use chunker::Chunker;
pub use embedding::EmbeddingProvider;
pub use local::{LocalObjectStore, LocalUsageMeter, MemoryVectorIndex};
pub use object_store::ObjectStore;
pub use ollama::OllamaEmbedder;
pub use parser::{DocumentParser, ParseHint};
pub use usage_meter::{UsageMeter, UsageReport};
pub use validator::{DuplicateDetector, ValidationReport, ValidationStatus, Validator};
pub use vector_index::VectorIndex;
