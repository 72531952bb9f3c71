use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

use crate::config::IngestConfig;
use crate::error::Result;
use crate::ingestion::{ContentValidator, PlainTextParser, TextChunker};
use crate::providers::{
    Chunker, DocumentParser, EmbeddingProvider, LocalObjectStore, LocalUsageMeter,
    MemoryVectorIndex, ObjectStore, OllamaEmbedder, UsageMeter, Validator, VectorIndex,
};
use crate::types::{IngestResult, RunState};

use super::context::PipelineContext;
use super::stage::{panic_message, run_tracked, FailurePolicy, Stage};
use super::stages::{
    ChunkingStage, ConsumeStage, EmbeddingStage, IndexingStage, ParsingStage, StorageStage,
    ValidationStage,
};

/// The collaborator graph of the standard pipeline
#[derive(Clone)]
pub struct Collaborators {
    pub validator: Arc<dyn Validator>,
    pub parser: Arc<dyn DocumentParser>,
    pub chunker: Arc<dyn Chunker>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn VectorIndex>,
    pub object_store: Arc<dyn ObjectStore>,
    pub usage_meter: Arc<dyn UsageMeter>,
}

impl Collaborators {
    /// Local collaborators: content validator with duplicate detection over an
    /// in-memory index, plain-text parser, sentence chunker, Ollama embeddings,
    /// filesystem object store and an in-memory credit ledger.
    pub fn local(config: &IngestConfig) -> Result<Self> {
        config.validate()?;
        let index = Arc::new(MemoryVectorIndex::new());

        Ok(Self {
            validator: Arc::new(
                ContentValidator::new(config.validation.clone())
                    .with_duplicate_detector(index.clone()),
            ),
            parser: Arc::new(PlainTextParser::new()),
            chunker: Arc::new(TextChunker::from_config(&config.chunking)),
            embedder: Arc::new(OllamaEmbedder::new(&config.ollama, &config.embeddings)?),
            index,
            object_store: Arc::new(LocalObjectStore::from_config(&config.storage)?),
            usage_meter: Arc::new(LocalUsageMeter::from_config(&config.metering)),
        })
    }
}

/// Runs stages in order against one context and unwinds on critical failure
///
/// # Example
/// ```no_run
/// use corpus_ingest::pipeline::{Collaborators, IngestOrchestrator, PipelineContext};
/// use corpus_ingest::types::{Caller, Scope};
/// use corpus_ingest::IngestConfig;
/// use uuid::Uuid;
///
/// # async fn run() -> corpus_ingest::Result<()> {
/// let config = IngestConfig::default();
/// let orchestrator = IngestOrchestrator::standard(Collaborators::local(&config)?, &config);
///
/// let mut ctx = PipelineContext::new(
///     std::fs::read("notes.md")?,
///     "notes.md",
///     Uuid::new_v4(),
///     "org-A/private/user-1".parse()?,
///     Caller::new("user-1", Some(100.0)),
/// );
/// let result = orchestrator.process(&mut ctx).await;
/// println!("{}", result.message);
/// # Ok(())
/// # }
/// ```
pub struct IngestOrchestrator {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl IngestOrchestrator {
    /// Create a new orchestrator builder
    pub fn builder(name: impl Into<String>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(name)
    }

    /// The seven-stage ingestion pipeline over the given collaborators
    pub fn standard(collaborators: Collaborators, config: &IngestConfig) -> Self {
        Self::builder("document-ingestion")
            .add_stage(ValidationStage::new(collaborators.validator))
            .add_stage(ParsingStage::new(collaborators.parser))
            .add_stage(ChunkingStage::new(collaborators.chunker))
            .add_stage(EmbeddingStage::new(
                collaborators.embedder,
                config.embeddings.batch_size,
            ))
            .add_stage(IndexingStage::new(collaborators.index))
            .add_stage(StorageStage::new(collaborators.object_store))
            .add_stage(ConsumeStage::new(
                collaborators.usage_meter,
                config.metering.service_type.clone(),
            ))
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Run every stage against `ctx`.
    ///
    /// Stops at the first failed stage, rolls back the completed stages in
    /// reverse order and reports the failure. A context that already went
    /// through a run is refused without running anything.
    pub async fn process(&self, ctx: &mut PipelineContext) -> IngestResult {
        let span = tracing::info_span!(
            "ingest",
            document_id = %ctx.document_id(),
            file_name = %ctx.file_name(),
            scope = %ctx.scope()
        );
        self.run(ctx).instrument(span).await
    }

    async fn run(&self, ctx: &mut PipelineContext) -> IngestResult {
        let started = Instant::now();

        if let Err(e) = ctx.begin_run(self.stage_names()) {
            tracing::warn!("Refusing to process '{}': {}", ctx.file_name(), e);
            return IngestResult {
                success: false,
                document_id: *ctx.document_id(),
                chunks_created: 0,
                total_duration_seconds: started.elapsed().as_secs_f64(),
                message: format!("Ingestion of '{}' was not started", ctx.file_name()),
                error: Some(e.to_string()),
                failed_stage: None,
                context_summary: ctx.summary(),
            };
        }

        tracing::info!(
            "Starting pipeline '{}' with {} stages for '{}'",
            self.name,
            self.stages.len(),
            ctx.file_name()
        );

        for (index, stage) in self.stages.iter().enumerate() {
            tracing::debug!(
                "Executing stage {}/{}: {}",
                index + 1,
                self.stages.len(),
                stage.name()
            );

            let result = run_tracked(stage.as_ref(), ctx).await;
            if !result.success {
                tracing::error!(
                    "Stage '{}' failed: {}",
                    stage.name(),
                    result.error.as_deref().unwrap_or(&result.message)
                );
                ctx.mark_failed(stage.name());
                self.rollback_completed(ctx).await;
                return self.failure_result(ctx, started.elapsed().as_secs_f64());
            }
        }

        ctx.mark_succeeded();
        self.success_result(ctx, started.elapsed().as_secs_f64())
    }

    /// Settle a run its caller abandoned mid-flight, e.g. on a deadline.
    ///
    /// A non-blocking stage in flight counts as completed with `reason` as
    /// its error, and the stages after it are skipped. The run then succeeds
    /// unless a critical stage was left unrun, in which case it fails there.
    /// A critical stage in flight fails the run. Failed runs get the rollback
    /// sweep; rollbacks already invoked are not repeated.
    pub async fn settle_abandoned(
        &self,
        ctx: &mut PipelineContext,
        reason: &str,
        started: Instant,
    ) -> IngestResult {
        let in_flight = match ctx.state() {
            RunState::Running(stage) => self
                .stages
                .iter()
                .position(|s| s.name() == stage.as_str()),
            _ => None,
        };

        match in_flight {
            Some(position) if self.stages[position].policy() == FailurePolicy::NonBlocking => {
                let name = self.stages[position].name().to_string();
                tracing::warn!("Non-blocking stage '{}' abandoned: {}", name, reason);
                if let Err(e) = ctx.settle_abandoned(&name, reason) {
                    tracing::error!("Could not settle stage '{}': {}", name, e);
                    ctx.abort(reason);
                } else {
                    let remaining = &self.stages[position + 1..];
                    match remaining
                        .iter()
                        .find(|s| s.policy() == FailurePolicy::Critical)
                    {
                        Some(critical) => {
                            ctx.fail_stage(critical.name(), reason, Duration::ZERO);
                            ctx.mark_failed(critical.name());
                        }
                        None => {
                            for stage in remaining {
                                tracing::warn!("Skipping non-blocking stage '{}'", stage.name());
                                ctx.record_metric(
                                    format!("{}_error", stage.name()),
                                    format!("skipped: {}", reason),
                                );
                            }
                            ctx.mark_succeeded();
                            return self.success_result(ctx, started.elapsed().as_secs_f64());
                        }
                    }
                }
            }
            _ => ctx.abort(reason),
        }

        self.rollback_completed(ctx).await;
        self.failure_result(ctx, started.elapsed().as_secs_f64())
    }

    fn success_result(&self, ctx: &PipelineContext, total: f64) -> IngestResult {
        let chunks_created = ctx.chunks().map_or(0, <[_]>::len);
        tracing::info!(
            "Pipeline '{}' completed for '{}' in {:.2}s ({} chunks)",
            self.name,
            ctx.file_name(),
            total,
            chunks_created
        );

        IngestResult {
            success: true,
            document_id: *ctx.document_id(),
            chunks_created,
            total_duration_seconds: total,
            message: format!(
                "Document '{}' ingested: {} chunks indexed",
                ctx.file_name(),
                chunks_created
            ),
            error: None,
            failed_stage: None,
            context_summary: ctx.summary(),
        }
    }

    /// Roll back the context's completed stages in reverse order.
    ///
    /// Each rollback is isolated: an error or panic is logged and recorded in
    /// the context, and the sweep continues. Stages already rolled back are
    /// skipped, so calling this again after a run is harmless.
    pub async fn rollback_completed(&self, ctx: &mut PipelineContext) {
        let completed = ctx.completed_stages().to_vec();
        if completed.is_empty() {
            return;
        }
        tracing::info!("Rolling back {} completed stages", completed.len());

        for name in completed.iter().rev() {
            if ctx.rollback_attempted(name) {
                continue;
            }
            let Some(stage) = self.stages.iter().find(|s| s.name() == name) else {
                tracing::warn!("No stage named '{}' to roll back", name);
                continue;
            };

            ctx.begin_rollback(name);
            let outcome = AssertUnwindSafe(stage.rollback(ctx)).catch_unwind().await;
            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(format!(
                    "rollback panicked: {}",
                    panic_message(payload.as_ref())
                )),
            };
            match error {
                Some(e) => {
                    tracing::error!("Rollback of stage '{}' failed: {}", name, e);
                    ctx.record_rollback_failure(name, e);
                }
                None => tracing::debug!("Rolled back stage '{}'", name),
            }
        }
    }

    /// Failure result from the context's recorded error
    fn failure_result(&self, ctx: &PipelineContext, total_seconds: f64) -> IngestResult {
        let failed_stage = ctx.failed_stage().map(str::to_string);
        let error = ctx
            .first_error()
            .map(str::to_string)
            .unwrap_or_else(|| "unknown error".to_string());

        IngestResult {
            success: false,
            document_id: *ctx.document_id(),
            chunks_created: 0,
            total_duration_seconds: total_seconds,
            message: format!(
                "Ingestion of '{}' failed at stage '{}'",
                ctx.file_name(),
                failed_stage.as_deref().unwrap_or("unknown")
            ),
            error: Some(error),
            failed_stage,
            context_summary: ctx.summary(),
        }
    }
}

/// Builder for [`IngestOrchestrator`]
pub struct OrchestratorBuilder {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl OrchestratorBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Append a stage
    pub fn add_stage<S: Stage + 'static>(self, stage: S) -> Self {
        self.add_shared(Arc::new(stage))
    }

    /// Append a stage that is also held elsewhere
    pub fn add_shared(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> IngestOrchestrator {
        IngestOrchestrator {
            name: self.name,
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pipeline::StageResult;
    use crate::types::{Caller, Scope};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use uuid::Uuid;

    type Log = Arc<Mutex<Vec<String>>>;

    struct SuccessStage {
        name: &'static str,
        log: Log,
    }

    #[async_trait]
    impl Stage for SuccessStage {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, _ctx: &mut PipelineContext) -> Result<StageResult> {
            Ok(StageResult::success(self.name, "ok"))
        }

        async fn rollback(&self, _ctx: &PipelineContext) -> Result<()> {
            self.log.lock().push(self.name.to_string());
            Ok(())
        }
    }

    struct FailStage {
        name: &'static str,
        policy: FailurePolicy,
    }

    #[async_trait]
    impl Stage for FailStage {
        fn name(&self) -> &str {
            self.name
        }

        fn policy(&self) -> FailurePolicy {
            self.policy
        }

        async fn execute(&self, _ctx: &mut PipelineContext) -> Result<StageResult> {
            Ok(StageResult::failure(self.name, "boom"))
        }

        async fn rollback(&self, _ctx: &PipelineContext) -> Result<()> {
            panic!("rollback must not run for a failed stage");
        }
    }

    struct BrokenRollback {
        name: &'static str,
        panics: bool,
    }

    #[async_trait]
    impl Stage for BrokenRollback {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, _ctx: &mut PipelineContext) -> Result<StageResult> {
            Ok(StageResult::success(self.name, "ok"))
        }

        async fn rollback(&self, _ctx: &PipelineContext) -> Result<()> {
            if self.panics {
                panic!("rollback exploded");
            }
            Err(Error::vector_index("delete failed"))
        }
    }

    fn context() -> PipelineContext {
        PipelineContext::new(
            b"bytes".to_vec(),
            "doc.txt",
            Uuid::new_v4(),
            Scope::private("org-A", "user-1"),
            Caller::new("user-1", Some(5.0)),
        )
    }

    fn ok(name: &'static str, log: &Log) -> SuccessStage {
        SuccessStage {
            name,
            log: log.clone(),
        }
    }

    #[tokio::test]
    async fn test_all_stages_succeed() {
        let log = Log::default();
        let orchestrator = IngestOrchestrator::builder("test")
            .add_stage(ok("a", &log))
            .add_stage(ok("b", &log))
            .build();

        let mut ctx = context();
        let result = orchestrator.process(&mut ctx).await;

        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.context_summary.completed_stages, vec!["a", "b"]);
        assert_eq!(ctx.state(), &RunState::Succeeded);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failure_rolls_back_in_reverse() {
        let log = Log::default();
        let orchestrator = IngestOrchestrator::builder("test")
            .add_stage(ok("a", &log))
            .add_stage(ok("b", &log))
            .add_stage(FailStage {
                name: "c",
                policy: FailurePolicy::Critical,
            })
            .add_stage(ok("d", &log))
            .build();

        let mut ctx = context();
        let result = orchestrator.process(&mut ctx).await;

        assert!(!result.success);
        assert_eq!(result.failed_stage.as_deref(), Some("c"));
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(*log.lock(), vec!["b", "a"]);
        assert_eq!(ctx.rolled_back_stages(), &["b".to_string(), "a".to_string()]);
        assert_eq!(ctx.state(), &RunState::Failed("c".to_string()));
    }

    #[tokio::test]
    async fn test_non_blocking_failure_does_not_fail_run() {
        let log = Log::default();
        let orchestrator = IngestOrchestrator::builder("test")
            .add_stage(ok("a", &log))
            .add_stage(FailStage {
                name: "b",
                policy: FailurePolicy::NonBlocking,
            })
            .build();

        let result = orchestrator.process(&mut context()).await;

        assert!(result.success);
        assert!(result.context_summary.stats.contains_key("b_error"));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_failures_are_isolated() {
        let log = Log::default();
        let orchestrator = IngestOrchestrator::builder("test")
            .add_stage(ok("a", &log))
            .add_stage(BrokenRollback {
                name: "b",
                panics: true,
            })
            .add_stage(BrokenRollback {
                name: "c",
                panics: false,
            })
            .add_stage(FailStage {
                name: "d",
                policy: FailurePolicy::Critical,
            })
            .build();

        let mut ctx = context();
        let result = orchestrator.process(&mut ctx).await;

        assert!(!result.success);
        assert_eq!(result.failed_stage.as_deref(), Some("d"));
        assert_eq!(*log.lock(), vec!["a"]);
        assert_eq!(ctx.rolled_back_stages().len(), 3);
        assert_eq!(ctx.rollback_failures().len(), 2);
        assert!(ctx.rollback_failures()[0].starts_with("c: "));
    }

    #[tokio::test]
    async fn test_context_reuse_is_refused() {
        let log = Log::default();
        let orchestrator = IngestOrchestrator::builder("test")
            .add_stage(ok("a", &log))
            .build();

        let mut ctx = context();
        assert!(orchestrator.process(&mut ctx).await.success);

        let second = orchestrator.process(&mut ctx).await;
        assert!(!second.success);
        assert!(second.failed_stage.is_none());
        assert!(second.error.unwrap().contains("already processed"));
        assert_eq!(ctx.completed_stages().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_sweep_runs_once_per_stage() {
        let log = Log::default();
        let orchestrator = IngestOrchestrator::builder("test")
            .add_stage(ok("a", &log))
            .add_stage(FailStage {
                name: "b",
                policy: FailurePolicy::Critical,
            })
            .build();

        let mut ctx = context();
        orchestrator.process(&mut ctx).await;
        orchestrator.rollback_completed(&mut ctx).await;

        assert_eq!(*log.lock(), vec!["a"]);
    }
}
