use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::pipeline::{PipelineContext, Stage, StageResult};
use crate::providers::{ValidationStatus, Validator};

use super::VALIDATION;

/// Stage that validates the raw input before any side effect
///
/// # Context Outputs
/// - `validation`: the validator's report, written even when the document is rejected
pub struct ValidationStage {
    validator: Arc<dyn Validator>,
}

impl ValidationStage {
    pub fn new(validator: Arc<dyn Validator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Stage for ValidationStage {
    fn name(&self) -> &str {
        VALIDATION
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<StageResult> {
        tracing::info!(
            "Validating '{}' ({} bytes) with {}",
            ctx.file_name(),
            ctx.file_bytes().len(),
            self.validator.name()
        );

        let report = self
            .validator
            .validate(ctx.file_bytes(), ctx.file_name(), ctx.scope())
            .await?;

        let status = report.status;
        let status_label = serde_json::to_value(status)?;
        ctx.record_metric("validation_status", status_label.clone());

        if !status.is_accepted() {
            let detail = if report.errors.is_empty() {
                "no detail provided".to_string()
            } else {
                report.errors.join("; ")
            };
            let error = match status {
                ValidationStatus::AlreadyExists => format!("Document already exists: {}", detail),
                _ => format!("Document is invalid: {}", detail),
            };
            let duplicate_of = report.duplicate_of.map(|id| id.to_string());
            ctx.set_validation(report)?;

            let mut result = StageResult::failure(VALIDATION, error)
                .with_metadata("status", status_label);
            if let Some(existing) = duplicate_of {
                result = result.with_metadata("duplicate_of", existing);
            }
            return Ok(result);
        }

        for warning in &report.warnings {
            tracing::warn!("Validation warning for '{}': {}", ctx.file_name(), warning);
        }

        let document_type = report.document_type;
        let warnings = report.warnings.len();
        ctx.record_metric("file_hash", report.file_hash.clone());
        ctx.set_validation(report)?;

        Ok(StageResult::success(
            VALIDATION,
            format!("Validated {} document", document_type.extension()),
        )
        .with_metadata("status", status_label)
        .with_metadata("document_type", document_type.extension())
        .with_metadata("warnings", warnings))
    }
}
