use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::error::Result;
use crate::pipeline::{FailurePolicy, PipelineContext, Stage, StageResult};
use crate::providers::UsageMeter;
use crate::types::{Metadata, UsageResult};

use super::CONSUME;

/// Stage that records the run's usage against the caller's quota
///
/// Non-blocking. When the metering call errors, the caller's remaining-credit
/// snapshot is reported instead and the result is flagged `fallback`. The
/// snapshot may be stale. A meter that answers but refuses the charge is not
/// a fallback: its balance is reported with `success: false`.
///
/// # Context Outputs
/// - `usage`
///
/// # Metrics
/// - `tokens_used`, `remaining_credits`, `usage_fallback`
pub struct ConsumeStage {
    meter: Arc<dyn UsageMeter>,
    service_type: String,
}

impl ConsumeStage {
    pub fn new(meter: Arc<dyn UsageMeter>, service_type: impl Into<String>) -> Self {
        Self {
            meter,
            service_type: service_type.into(),
        }
    }
}

#[async_trait]
impl Stage for ConsumeStage {
    fn name(&self) -> &str {
        CONSUME
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::NonBlocking
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<StageResult> {
        let chunks = ctx.chunks().unwrap_or_default();
        let tokens_used: u64 = chunks.iter().map(|c| c.estimated_tokens()).sum();
        let duration_seconds = ctx.elapsed().as_secs_f64();

        let mut meta = Metadata::new();
        meta.insert("document_id".to_string(), json!(ctx.document_id().to_string()));
        meta.insert("file_name".to_string(), json!(ctx.file_name()));
        meta.insert("chunk_count".to_string(), json!(chunks.len()));
        meta.insert("scope".to_string(), json!(ctx.scope().to_string()));

        let caller_id = ctx.caller().id.clone();
        let snapshot = ctx.caller().remaining_credits;

        let mut metering_error = None;
        let usage = match self
            .meter
            .consume(&caller_id, &self.service_type, tokens_used, duration_seconds, &meta)
            .await
        {
            Ok(report) => {
                if !report.success {
                    tracing::warn!(
                        "Usage meter {} refused {} tokens for {} (remaining {:.2})",
                        self.meter.name(),
                        tokens_used,
                        caller_id,
                        report.remaining_credits
                    );
                }
                UsageResult {
                    tokens_used,
                    remaining_credits: report.remaining_credits,
                    usage_id: report.usage_id,
                    success: report.success,
                    fallback: false,
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Usage metering failed for {}, reporting last known quota: {}",
                    caller_id,
                    e
                );
                metering_error = Some(e.to_string());
                UsageResult {
                    tokens_used,
                    remaining_credits: snapshot.unwrap_or(0.0),
                    usage_id: None,
                    success: false,
                    fallback: true,
                }
            }
        };

        ctx.record_metric("tokens_used", usage.tokens_used);
        ctx.record_metric("remaining_credits", usage.remaining_credits);
        ctx.record_metric("usage_fallback", usage.fallback);

        let mut result = StageResult::success(
            CONSUME,
            format!("Recorded {} tokens for {}", tokens_used, caller_id),
        )
        .with_metadata("tokens_used", usage.tokens_used)
        .with_metadata("remaining_credits", usage.remaining_credits)
        .with_metadata("metered", usage.success)
        .with_metadata("fallback", usage.fallback);
        if let Some(error) = metering_error {
            result = result.with_metadata("metering_error", error);
        }

        ctx.set_usage(usage)?;
        Ok(result)
    }
}
