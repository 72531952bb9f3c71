//! Records written by the indexing, storage and consume stages

use serde::{Deserialize, Serialize};

/// What the Indexing stage wrote
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexInsertResult {
    pub collection: String,
    pub inserted: usize,
}

/// Objects the Storage stage actually wrote
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoragePaths {
    /// Path of the original file, when its upload succeeded
    pub document: Option<String>,
    /// Paths of the chunks whose upload succeeded
    pub chunks: Vec<String>,
    /// Number of chunk uploads that failed
    pub chunks_failed: usize,
}

impl StoragePaths {
    /// Whether anything reached the object store
    pub fn wrote_anything(&self) -> bool {
        self.document.is_some() || !self.chunks.is_empty()
    }
}

/// Usage accounting outcome of the Consume stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageResult {
    pub tokens_used: u64,
    pub remaining_credits: f64,
    pub usage_id: Option<String>,
    /// Whether the metering service acknowledged the usage
    pub success: bool,
    /// `remaining_credits` is the caller's snapshot, not a metering response
    pub fallback: bool,
}
