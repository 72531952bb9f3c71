//! Staged execution with compensating rollback
//!
//! A run threads one [`PipelineContext`] through the orchestrator's stages in
//! order. Each stage goes through [`run_tracked`], which records timing and
//! turns errors and panics into failed [`StageResult`]s. The first critical
//! failure stops the run and every completed stage is rolled back, newest
//! first.

pub mod context;
pub mod orchestrator;
pub mod stage;
pub mod stages;

pub use context::{PipelineContext, StageTiming};
pub use orchestrator::{Collaborators, IngestOrchestrator, OrchestratorBuilder};
pub use stage::{run_tracked, FailurePolicy, Stage, StageResult};
pub use stages::STAGE_ORDER;
