//! Document validation and duplicate detection contracts

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{FileType, Scope};

/// Outcome class of a validation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Document accepted
    Valid,
    /// Document accepted with warnings
    Warning,
    /// Document rejected
    Invalid,
    /// The same content is already indexed in this scope
    AlreadyExists,
}

impl ValidationStatus {
    /// Whether ingestion may proceed
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Valid | Self::Warning)
    }
}

/// Result of validating one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub status: ValidationStatus,
    pub document_type: FileType,
    /// Hex SHA-256 of the submitted bytes
    pub file_hash: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Normalised bytes to parse instead of the raw input, when the validator produced any
    #[serde(skip)]
    pub extracted_bytes: Option<Vec<u8>>,
    /// Existing document holding the same content (`AlreadyExists` only)
    pub duplicate_of: Option<Uuid>,
}

/// Validates raw input before anything is extracted or written
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Validator: Send + Sync {
    /// Validate the submitted bytes for the given scope
    async fn validate(
        &self,
        file_bytes: &[u8],
        file_name: &str,
        scope: &Scope,
    ) -> Result<ValidationReport>;

    /// Get validator name for logging
    fn name(&self) -> &str;
}

/// Looks up already-ingested content by hash
#[async_trait]
pub trait DuplicateDetector: Send + Sync {
    /// Document id already holding `file_hash` in `collection`, if any
    async fn find_by_hash(&self, collection: &str, file_hash: &str) -> Result<Option<Uuid>>;
}
