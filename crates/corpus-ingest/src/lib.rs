//! corpus-ingest: Staged document ingestion with compensating rollback
//!
//! Documents move through seven stages (validation, parsing, chunking,
//! embedding, indexing, storage, consume) against one
//! [`PipelineContext`](pipeline::PipelineContext). A critical failure rolls
//! back every completed stage in reverse order, so a failed run leaves no
//! orphaned index entries or stored objects. Storage and usage metering are
//! non-blocking and can never fail a run.
//!
//! Every external system sits behind a trait in [`providers`]; local
//! implementations are wired by [`Collaborators::local`].

pub mod config;
pub mod error;
pub mod ingestion;
pub mod pipeline;
pub mod processing;
pub mod providers;
pub mod telemetry;
pub mod types;

pub use config::IngestConfig;
pub use error::{Error, Result};
pub use pipeline::{Collaborators, IngestOrchestrator, PipelineContext, Stage, StageResult};
pub use processing::IngestWorker;
pub use types::{Caller, ContextSummary, IngestResult, Scope};
