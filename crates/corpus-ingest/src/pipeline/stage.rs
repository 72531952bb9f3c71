//! Stage contract, stage outcomes and the tracking wrapper

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use crate::error::Result;
use crate::types::Metadata;

use super::context::PipelineContext;

/// How a stage failure affects the run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Failure halts the run and rolls back completed stages
    Critical,
    /// Failure is recorded but the stage still reports success
    NonBlocking,
}

/// Outcome of one stage execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub success: bool,
    pub stage_name: String,
    pub message: String,
    /// Present iff `success` is false
    pub error: Option<String>,
    /// Diagnostics such as counts or model names
    pub metadata: Metadata,
}

impl StageResult {
    /// Create a successful stage result
    pub fn success(stage_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            stage_name: stage_name.into(),
            message: message.into(),
            error: None,
            metadata: Metadata::new(),
        }
    }

    /// Create a failed stage result
    pub fn failure(stage_name: impl Into<String>, error: impl Into<String>) -> Self {
        let stage_name = stage_name.into();
        Self {
            success: false,
            message: format!("Stage '{}' failed", stage_name),
            stage_name,
            error: Some(error.into()),
            metadata: Metadata::new(),
        }
    }

    /// Attach a diagnostic attribute
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A single unit of work in the ingestion pipeline.
///
/// `execute` reads earlier outputs from the context and writes its own slot.
/// Expected failures are returned as `Ok(StageResult::failure(..))`; an `Err`
/// or a panic is converted by [`run_tracked`] into a failure tagged with the
/// stage name.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use corpus_ingest::pipeline::{PipelineContext, Stage, StageResult};
/// use corpus_ingest::Result;
///
/// struct CountPages;
///
/// #[async_trait]
/// impl Stage for CountPages {
///     fn name(&self) -> &str {
///         "count_pages"
///     }
///
///     async fn execute(&self, ctx: &mut PipelineContext) -> Result<StageResult> {
///         let pages = ctx.require_pages()?.len();
///         ctx.record_metric("pages_counted", pages);
///         Ok(StageResult::success(self.name(), format!("{} pages", pages)))
///     }
/// }
/// ```
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable identifier used for tracking and rollback matching
    fn name(&self) -> &str;

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Critical
    }

    /// Perform the stage's work against the context
    async fn execute(&self, ctx: &mut PipelineContext) -> Result<StageResult>;

    /// Compensate a successful `execute`. Called at most once per run.
    /// Errors are logged by the orchestrator and never propagated.
    async fn rollback(&self, _ctx: &PipelineContext) -> Result<()> {
        Ok(())
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one stage with bookkeeping.
///
/// Marks the stage current, times it, converts `Err` and panics into failed
/// results, applies the stage's [`FailurePolicy`], then either appends the
/// stage to the completed list or records the run's first error.
pub async fn run_tracked(stage: &dyn Stage, ctx: &mut PipelineContext) -> StageResult {
    let name = stage.name().to_string();
    ctx.begin_stage(&name);
    let start = Instant::now();

    let outcome = AssertUnwindSafe(stage.execute(ctx)).catch_unwind().await;
    let mut result = match outcome {
        Ok(Ok(mut result)) => {
            if result.stage_name != name {
                result.stage_name = name.clone();
            }
            if !result.success && result.error.is_none() {
                result.error = Some(result.message.clone());
            }
            result
        }
        Ok(Err(e)) => StageResult::failure(&name, e.to_string()),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!("Stage '{}' panicked: {}", name, message);
            StageResult::failure(&name, format!("Stage panicked: {}", message))
        }
    };
    let duration = start.elapsed();

    if !result.success && stage.policy() == FailurePolicy::NonBlocking {
        let error = result.error.take().unwrap_or_default();
        tracing::warn!("Non-blocking stage '{}' failed, continuing: {}", name, error);
        ctx.record_metric(format!("{}_error", name), error.clone());
        let mut downgraded = StageResult::success(&name, "Completed with a non-blocking error")
            .with_metadata("non_blocking_error", error);
        downgraded.metadata.extend(result.metadata);
        result = downgraded;
    }

    if result.success {
        match ctx.complete_stage(&name, duration) {
            Ok(()) => {
                tracing::debug!(
                    "Stage '{}' completed in {:.3}s: {}",
                    name,
                    duration.as_secs_f64(),
                    result.message
                );
                result
            }
            Err(e) => {
                ctx.fail_stage(&name, e.to_string(), duration);
                StageResult::failure(&name, e.to_string())
            }
        }
    } else {
        let error = result.error.clone().unwrap_or_default();
        ctx.fail_stage(&name, error, duration);
        result
    }
}
