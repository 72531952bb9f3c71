//! Run outcome returned to callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lifecycle of one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running(String),
    Succeeded,
    Failed(String),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

/// Serializable snapshot of a context after (or during) a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    pub document_id: Uuid,
    pub file_name: String,
    pub scope: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub current_stage: Option<String>,
    pub completed_stages: Vec<String>,
    /// Seconds spent in each stage that finished, failed ones included
    pub stage_durations: BTreeMap<String, f64>,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
    pub rolled_back_stages: Vec<String>,
    pub rollback_failures: Vec<String>,
    pub page_count: usize,
    pub chunk_count: usize,
    pub embedding_count: usize,
    /// Metrics recorded by the stages
    pub stats: BTreeMap<String, Value>,
}

/// Result of one `process` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResult {
    pub success: bool,
    pub document_id: Uuid,
    pub chunks_created: usize,
    pub total_duration_seconds: f64,
    pub message: String,
    /// Present iff the run failed
    pub error: Option<String>,
    /// Stage that failed the run
    pub failed_stage: Option<String>,
    pub context_summary: ContextSummary,
}
