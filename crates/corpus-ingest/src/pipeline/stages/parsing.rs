use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::pipeline::{PipelineContext, Stage, StageResult};
use crate::providers::{DocumentParser, ParseHint};
use crate::types::Page;

use super::PARSING;

/// Stage that extracts page text
///
/// # Context Requirements
/// - `validation`: parses the validator's `extracted_bytes` when present, the raw input otherwise
///
/// # Context Outputs
/// - `pages`: pages that carry text
pub struct ParsingStage {
    parser: Arc<dyn DocumentParser>,
}

impl ParsingStage {
    pub fn new(parser: Arc<dyn DocumentParser>) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl Stage for ParsingStage {
    fn name(&self) -> &str {
        PARSING
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<StageResult> {
        let report = ctx.require_validation()?;
        let hint = ParseHint {
            file_name: ctx.file_name().to_string(),
            file_type: report.document_type,
        };
        let bytes = report.extracted_bytes.as_deref().unwrap_or(ctx.file_bytes());

        let pages: Vec<Page> = self
            .parser
            .extract_text(bytes, &hint)
            .await?
            .into_iter()
            .filter(Page::has_text)
            .collect();

        if pages.is_empty() {
            return Ok(StageResult::failure(
                PARSING,
                format!("No text could be extracted from '{}'", hint.file_name),
            ));
        }

        let page_count = pages.len();
        let char_count: usize = pages.iter().map(|p| p.text.chars().count()).sum();
        tracing::info!(
            "Extracted {} pages ({} chars) from '{}' with {}",
            page_count,
            char_count,
            hint.file_name,
            self.parser.name()
        );

        ctx.record_metric("page_count", page_count);
        ctx.record_metric("char_count", char_count);
        ctx.set_pages(pages)?;

        Ok(StageResult::success(PARSING, format!("Extracted {} pages", page_count))
            .with_metadata("page_count", page_count)
            .with_metadata("char_count", char_count)
            .with_metadata("parser", self.parser.name()))
    }
}
