//! Caller-level execution: deadlines and bounded parallel runs

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::config::ProcessingConfig;
use crate::pipeline::{IngestOrchestrator, PipelineContext};
use crate::types::IngestResult;

/// Drives independent runs through a shared orchestrator
pub struct IngestWorker {
    orchestrator: Arc<IngestOrchestrator>,
    file_timeout: Duration,
    parallel_files: usize,
}

impl IngestWorker {
    pub fn new(orchestrator: Arc<IngestOrchestrator>, config: &ProcessingConfig) -> Self {
        Self {
            orchestrator,
            file_timeout: Duration::from_secs(config.file_timeout_secs),
            parallel_files: config.parallelism(),
        }
    }

    /// Override the per-document deadline
    pub fn with_timeout(mut self, file_timeout: Duration) -> Self {
        self.file_timeout = file_timeout;
        self
    }

    pub fn file_timeout(&self) -> Duration {
        self.file_timeout
    }

    pub fn parallel_files(&self) -> usize {
        self.parallel_files
    }

    /// Run one context under the per-document deadline.
    ///
    /// When the deadline fires the in-flight stage is abandoned and the run is
    /// settled by the orchestrator: a critical stage fails the run and the
    /// completed stages are rolled back, a non-blocking one is recorded as a
    /// stage error and the indexed document stands.
    pub async fn process_with_deadline(&self, ctx: &mut PipelineContext) -> IngestResult {
        let start_time = Instant::now();
        let outcome = timeout(self.file_timeout, self.orchestrator.process(ctx)).await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                let elapsed = start_time.elapsed();
                let reason = format!(
                    "Processing timed out after {}s (limit: {}s)",
                    elapsed.as_secs(),
                    self.file_timeout.as_secs()
                );
                tracing::error!(
                    "TIMEOUT processing '{}' during stage '{}' after {:.1}s ({} bytes)",
                    ctx.file_name(),
                    ctx.current_stage().unwrap_or("none"),
                    elapsed.as_secs_f64(),
                    ctx.file_bytes().len()
                );

                self.orchestrator
                    .settle_abandoned(ctx, &reason, start_time)
                    .await
            }
        }
    }

    /// Run independent contexts concurrently, at most `parallel_files` at a
    /// time. Results come back in input order.
    pub async fn process_all(&self, contexts: Vec<PipelineContext>) -> Vec<IngestResult> {
        let semaphore = Semaphore::new(self.parallel_files);
        let semaphore = &semaphore;
        tracing::info!(
            "Processing {} documents ({} in parallel)",
            contexts.len(),
            self.parallel_files
        );

        let futures = contexts.into_iter().map(|mut ctx| async move {
            // The semaphore is never closed, so acquire cannot fail
            let _permit = semaphore.acquire().await.ok();
            self.process_with_deadline(&mut ctx).await
        });
        let results = join_all(futures).await;

        let failed = results.iter().filter(|r| !r.success).count();
        if failed > 0 {
            tracing::warn!("{} of {} documents failed", failed, results.len());
        }
        results
    }
}
