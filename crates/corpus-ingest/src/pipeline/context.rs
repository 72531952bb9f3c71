use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::ValidationReport;
use crate::types::{
    Caller, Chunk, ContextSummary, IndexInsertResult, Page, RunState, Scope, StoragePaths,
    UsageResult,
};

/// Timing of one stage execution
#[derive(Debug, Clone)]
pub struct StageTiming {
    pub stage: String,
    pub started_at: DateTime<Utc>,
    pub duration: Option<Duration>,
}

/// The single record threaded through every stage of one run.
///
/// Input fields are fixed at construction. Each stage output slot starts
/// empty and can be written once; a second write fails with
/// [`Error::SlotAlreadySet`]. Bookkeeping is updated by the tracking wrapper
/// and the orchestrator, never by stages.
///
/// # Example
/// ```
/// use corpus_ingest::pipeline::PipelineContext;
/// use corpus_ingest::types::{Caller, Scope};
/// use uuid::Uuid;
///
/// let ctx = PipelineContext::new(
///     b"hello world".to_vec(),
///     "notes.txt",
///     Uuid::new_v4(),
///     Scope::private("org-A", "user-1"),
///     Caller::new("user-1", Some(100.0)),
/// );
/// assert!(ctx.pages().is_none());
/// assert!(ctx.completed_stages().is_empty());
/// ```
#[derive(Debug)]
pub struct PipelineContext {
    // Input
    file_bytes: Vec<u8>,
    file_name: String,
    document_id: Uuid,
    scope: Scope,
    caller: Caller,

    // Stage outputs
    validation: Option<ValidationReport>,
    pages: Option<Vec<Page>>,
    chunks: Option<Vec<Chunk>>,
    embeddings: Option<Vec<Vec<f32>>>,
    index_insert: Option<IndexInsertResult>,
    storage_paths: Option<StoragePaths>,
    usage: Option<UsageResult>,

    // Bookkeeping
    started_at: DateTime<Utc>,
    started: Instant,
    state: RunState,
    stage_order: Vec<String>,
    current_stage: Option<String>,
    completed_stages: Vec<String>,
    timings: Vec<StageTiming>,
    first_error: Option<String>,
    failed_stage: Option<String>,
    rolled_back_stages: Vec<String>,
    rollback_failures: Vec<String>,
    metrics: BTreeMap<String, Value>,
}

/// Write `value` into an empty slot
fn write_once<T>(slot: &mut Option<T>, name: &'static str, value: T) -> Result<()> {
    if slot.is_some() {
        return Err(Error::SlotAlreadySet(name));
    }
    *slot = Some(value);
    Ok(())
}

impl PipelineContext {
    /// Create a context for one run
    pub fn new(
        file_bytes: Vec<u8>,
        file_name: impl Into<String>,
        document_id: Uuid,
        scope: Scope,
        caller: Caller,
    ) -> Self {
        Self {
            file_bytes,
            file_name: file_name.into(),
            document_id,
            scope,
            caller,
            validation: None,
            pages: None,
            chunks: None,
            embeddings: None,
            index_insert: None,
            storage_paths: None,
            usage: None,
            started_at: Utc::now(),
            started: Instant::now(),
            state: RunState::Idle,
            stage_order: Vec::new(),
            current_stage: None,
            completed_stages: Vec::new(),
            timings: Vec::new(),
            first_error: None,
            failed_stage: None,
            rolled_back_stages: Vec::new(),
            rollback_failures: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    // ---- input ----

    pub fn file_bytes(&self) -> &[u8] {
        &self.file_bytes
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn document_id(&self) -> &Uuid {
        &self.document_id
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    // ---- stage outputs ----

    pub fn validation(&self) -> Option<&ValidationReport> {
        self.validation.as_ref()
    }

    pub fn require_validation(&self) -> Result<&ValidationReport> {
        self.validation().ok_or(Error::MissingInput("validation"))
    }

    pub fn set_validation(&mut self, report: ValidationReport) -> Result<()> {
        write_once(&mut self.validation, "validation", report)
    }

    pub fn pages(&self) -> Option<&[Page]> {
        self.pages.as_deref()
    }

    pub fn require_pages(&self) -> Result<&[Page]> {
        self.pages().ok_or(Error::MissingInput("pages"))
    }

    pub fn set_pages(&mut self, pages: Vec<Page>) -> Result<()> {
        write_once(&mut self.pages, "pages", pages)
    }

    pub fn chunks(&self) -> Option<&[Chunk]> {
        self.chunks.as_deref()
    }

    pub fn require_chunks(&self) -> Result<&[Chunk]> {
        self.chunks().ok_or(Error::MissingInput("chunks"))
    }

    pub fn set_chunks(&mut self, chunks: Vec<Chunk>) -> Result<()> {
        write_once(&mut self.chunks, "chunks", chunks)
    }

    pub fn embeddings(&self) -> Option<&[Vec<f32>]> {
        self.embeddings.as_deref()
    }

    pub fn require_embeddings(&self) -> Result<&[Vec<f32>]> {
        self.embeddings().ok_or(Error::MissingInput("embeddings"))
    }

    pub fn set_embeddings(&mut self, embeddings: Vec<Vec<f32>>) -> Result<()> {
        write_once(&mut self.embeddings, "embeddings", embeddings)
    }

    pub fn index_insert(&self) -> Option<&IndexInsertResult> {
        self.index_insert.as_ref()
    }

    pub fn set_index_insert(&mut self, result: IndexInsertResult) -> Result<()> {
        write_once(&mut self.index_insert, "index_insert", result)
    }

    pub fn storage_paths(&self) -> Option<&StoragePaths> {
        self.storage_paths.as_ref()
    }

    pub fn set_storage_paths(&mut self, paths: StoragePaths) -> Result<()> {
        write_once(&mut self.storage_paths, "storage_paths", paths)
    }

    pub fn usage(&self) -> Option<&UsageResult> {
        self.usage.as_ref()
    }

    pub fn set_usage(&mut self, usage: UsageResult) -> Result<()> {
        write_once(&mut self.usage, "usage", usage)
    }

    // ---- metrics ----

    /// Record a metric. Metrics are never removed; a repeated key keeps the
    /// latest value.
    pub fn record_metric(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metrics.insert(key.into(), value.into());
    }

    pub fn metric(&self, key: &str) -> Option<&Value> {
        self.metrics.get(key)
    }

    pub fn metrics(&self) -> &BTreeMap<String, Value> {
        &self.metrics
    }

    // ---- bookkeeping ----

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time since the context was created
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn current_stage(&self) -> Option<&str> {
        self.current_stage.as_deref()
    }

    pub fn completed_stages(&self) -> &[String] {
        &self.completed_stages
    }

    pub fn first_error(&self) -> Option<&str> {
        self.first_error.as_deref()
    }

    pub fn failed_stage(&self) -> Option<&str> {
        self.failed_stage.as_deref()
    }

    pub fn rolled_back_stages(&self) -> &[String] {
        &self.rolled_back_stages
    }

    pub fn rollback_failures(&self) -> &[String] {
        &self.rollback_failures
    }

    pub fn timings(&self) -> &[StageTiming] {
        &self.timings
    }

    /// Duration of a finished stage
    pub fn stage_duration(&self, stage: &str) -> Option<Duration> {
        self.timings
            .iter()
            .find(|t| t.stage == stage)
            .and_then(|t| t.duration)
    }

    /// Start a run with the given stage order. Fails if the context already ran.
    pub(crate) fn begin_run(&mut self, stage_order: Vec<String>) -> Result<()> {
        if self.state != RunState::Idle {
            return Err(Error::ContextReused);
        }
        self.stage_order = stage_order;
        Ok(())
    }

    pub(crate) fn begin_stage(&mut self, stage: &str) {
        self.current_stage = Some(stage.to_string());
        self.state = RunState::Running(stage.to_string());
        self.timings.push(StageTiming {
            stage: stage.to_string(),
            started_at: Utc::now(),
            duration: None,
        });
    }

    fn finish_timing(&mut self, stage: &str, duration: Duration) {
        if let Some(timing) = self
            .timings
            .iter_mut()
            .rev()
            .find(|t| t.stage == stage && t.duration.is_none())
        {
            timing.duration = Some(duration);
        }
    }

    /// Mark a stage complete; it must be the next one in the run's order
    pub(crate) fn complete_stage(&mut self, stage: &str, duration: Duration) -> Result<()> {
        let expected = self.stage_order.get(self.completed_stages.len());
        if expected.map(String::as_str) != Some(stage) {
            return Err(Error::StageOrder {
                expected: expected.cloned().unwrap_or_else(|| "no further stage".to_string()),
                actual: stage.to_string(),
            });
        }
        self.finish_timing(stage, duration);
        self.completed_stages.push(stage.to_string());
        Ok(())
    }

    /// Record a stage failure; only the first failure of a run is kept
    pub(crate) fn fail_stage(&mut self, stage: &str, error: impl Into<String>, duration: Duration) {
        self.finish_timing(stage, duration);
        if self.first_error.is_none() {
            self.first_error = Some(error.into());
            self.failed_stage = Some(stage.to_string());
        }
    }

    pub(crate) fn mark_succeeded(&mut self) {
        self.current_stage = None;
        self.state = RunState::Succeeded;
    }

    pub(crate) fn mark_failed(&mut self, stage: &str) {
        self.state = RunState::Failed(stage.to_string());
    }

    /// Fail a run from outside the orchestrator, e.g. on a caller deadline.
    /// The in-flight stage, if any, is reported as the failed stage.
    pub(crate) fn abort(&mut self, reason: impl Into<String>) {
        let stage = self
            .current_stage
            .clone()
            .unwrap_or_else(|| "unstarted".to_string());
        if self.first_error.is_none() {
            self.first_error = Some(reason.into());
            self.failed_stage = Some(stage.clone());
        }
        self.state = RunState::Failed(stage);
    }

    /// Settle a non-blocking stage that was abandoned mid-flight: it counts as
    /// completed, with the reason recorded as its `{stage}_error` metric.
    pub(crate) fn settle_abandoned(&mut self, stage: &str, reason: &str) -> Result<()> {
        let elapsed = self
            .timings
            .iter()
            .rev()
            .find(|t| t.stage == stage && t.duration.is_none())
            .and_then(|t| (Utc::now() - t.started_at).to_std().ok())
            .unwrap_or_default();
        self.record_metric(format!("{}_error", stage), reason);
        self.complete_stage(stage, elapsed)
    }

    /// Whether a stage's rollback was already invoked in this run
    pub fn rollback_attempted(&self, stage: &str) -> bool {
        self.rolled_back_stages.iter().any(|s| s == stage)
    }

    /// Note a rollback before it is awaited, so an interrupted rollback is
    /// never invoked a second time
    pub(crate) fn begin_rollback(&mut self, stage: &str) {
        self.rolled_back_stages.push(stage.to_string());
    }

    pub(crate) fn record_rollback_failure(&mut self, stage: &str, error: impl Into<String>) {
        self.rollback_failures
            .push(format!("{}: {}", stage, error.into()));
    }

    /// Snapshot for reporting
    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            document_id: self.document_id,
            file_name: self.file_name.clone(),
            scope: self.scope.to_string(),
            state: self.state.clone(),
            started_at: self.started_at,
            current_stage: self.current_stage.clone(),
            completed_stages: self.completed_stages.clone(),
            stage_durations: self
                .timings
                .iter()
                .filter_map(|t| t.duration.map(|d| (t.stage.clone(), d.as_secs_f64())))
                .collect(),
            failed_stage: self.failed_stage.clone(),
            error: self.first_error.clone(),
            rolled_back_stages: self.rolled_back_stages.clone(),
            rollback_failures: self.rollback_failures.clone(),
            page_count: self.pages.as_ref().map_or(0, Vec::len),
            chunk_count: self.chunks.as_ref().map_or(0, Vec::len),
            embedding_count: self.embeddings.as_ref().map_or(0, Vec::len),
            stats: self.metrics.clone(),
        }
    }
}
