//! Content validation: size, type, magic bytes, hashing and duplicates

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::ValidationConfig;
use crate::error::Result;
use crate::providers::{DuplicateDetector, ValidationReport, ValidationStatus, Validator};
use crate::types::{extension_of, FileType, Scope};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Validator checking limits and format before any extraction happens
pub struct ContentValidator {
    config: ValidationConfig,
    duplicates: Option<Arc<dyn DuplicateDetector>>,
}

impl ContentValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            duplicates: None,
        }
    }

    /// Report `AlreadyExists` for content the detector already knows
    pub fn with_duplicate_detector(mut self, detector: Arc<dyn DuplicateDetector>) -> Self {
        self.duplicates = Some(detector);
        self
    }
}

/// Hex SHA-256 of a byte slice
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[async_trait]
impl Validator for ContentValidator {
    async fn validate(
        &self,
        file_bytes: &[u8],
        file_name: &str,
        scope: &Scope,
    ) -> Result<ValidationReport> {
        let extension = extension_of(file_name);
        let document_type = FileType::from_extension(&extension);
        let file_hash = content_hash(file_bytes);

        let mut report = ValidationReport {
            status: ValidationStatus::Valid,
            document_type,
            file_hash,
            errors: Vec::new(),
            warnings: Vec::new(),
            extracted_bytes: None,
            duplicate_of: None,
        };

        if file_bytes.is_empty() {
            report.errors.push("File is empty".to_string());
        }
        if file_bytes.len() as u64 > self.config.max_file_size {
            report.errors.push(format!(
                "File size {} bytes exceeds the limit of {} bytes",
                file_bytes.len(),
                self.config.max_file_size
            ));
        }
        if !self.config.allowed_extensions.iter().any(|e| e == &extension)
            || document_type == FileType::Unknown
        {
            report.errors.push(format!(
                "Unsupported file type '{}'",
                if extension.is_empty() { file_name } else { extension.as_str() }
            ));
        }
        if !report.errors.is_empty() {
            report.status = ValidationStatus::Invalid;
            return Ok(report);
        }

        if document_type == FileType::Pdf && !file_bytes.starts_with(b"%PDF-") {
            report.errors.push("File has a .pdf extension but no PDF header".to_string());
            report.status = ValidationStatus::Invalid;
            return Ok(report);
        }

        if document_type.is_text() {
            let body = file_bytes.strip_prefix(UTF8_BOM).unwrap_or(file_bytes);
            if body.len() != file_bytes.len() {
                report.extracted_bytes = Some(body.to_vec());
            }
            if std::str::from_utf8(body).is_err() {
                report
                    .warnings
                    .push("File is not valid UTF-8; invalid sequences will be replaced".to_string());
            }
        }

        if let Some(detector) = &self.duplicates {
            if let Some(existing) = detector
                .find_by_hash(&scope.collection_name(), &report.file_hash)
                .await?
            {
                report.status = ValidationStatus::AlreadyExists;
                report.duplicate_of = Some(existing);
                report
                    .errors
                    .push(format!("Identical content already ingested as document {}", existing));
                return Ok(report);
            }
        }

        if !report.warnings.is_empty() {
            report.status = ValidationStatus::Warning;
        }
        Ok(report)
    }

    fn name(&self) -> &str {
        "content-validator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{MemoryVectorIndex, VectorIndex};
    use crate::types::Metadata;
    use serde_json::json;
    use uuid::Uuid;

    fn scope() -> Scope {
        Scope::private("org-A", "user-1")
    }

    #[tokio::test]
    async fn test_empty_file_is_invalid() {
        let validator = ContentValidator::new(ValidationConfig::default());
        let report = validator.validate(b"", "empty.txt", &scope()).await.unwrap();
        assert_eq!(report.status, ValidationStatus::Invalid);
        assert!(report.errors[0].contains("empty"));
    }

    #[tokio::test]
    async fn test_unknown_extension_and_size_limit() {
        let config = ValidationConfig {
            max_file_size: 4,
            ..ValidationConfig::default()
        };
        let validator = ContentValidator::new(config);
        let report = validator.validate(b"hello", "a.exe", &scope()).await.unwrap();
        assert_eq!(report.status, ValidationStatus::Invalid);
        assert_eq!(report.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_pdf_header_required() {
        let validator = ContentValidator::new(ValidationConfig::default());
        let report = validator
            .validate(b"plain text", "fake.pdf", &scope())
            .await
            .unwrap();
        assert_eq!(report.status, ValidationStatus::Invalid);

        let report = validator
            .validate(b"%PDF-1.7\n...", "real.pdf", &scope())
            .await
            .unwrap();
        assert_eq!(report.status, ValidationStatus::Valid);
        assert_eq!(report.document_type, FileType::Pdf);
        assert_eq!(report.file_hash.len(), 64);
    }

    #[tokio::test]
    async fn test_bom_is_stripped_and_invalid_utf8_warns() {
        let validator = ContentValidator::new(ValidationConfig::default());
        let report = validator
            .validate(b"\xEF\xBB\xBFhello", "bom.txt", &scope())
            .await
            .unwrap();
        assert_eq!(report.status, ValidationStatus::Valid);
        assert_eq!(report.extracted_bytes.as_deref(), Some(&b"hello"[..]));

        let report = validator
            .validate(b"caf\xE9", "latin1.txt", &scope())
            .await
            .unwrap();
        assert_eq!(report.status, ValidationStatus::Warning);
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_content_detected() {
        let index = Arc::new(MemoryVectorIndex::new());
        let existing = Uuid::new_v4();
        let bytes = b"some document";

        let mut meta = Metadata::new();
        meta.insert("document_id".to_string(), json!(existing.to_string()));
        meta.insert("file_hash".to_string(), json!(content_hash(bytes)));
        index
            .insert(
                &scope().collection_name(),
                &["x_0000".to_string()],
                &[vec![0.0]],
                &[meta],
            )
            .await
            .unwrap();

        let validator =
            ContentValidator::new(ValidationConfig::default()).with_duplicate_detector(index);
        let report = validator.validate(bytes, "doc.txt", &scope()).await.unwrap();
        assert_eq!(report.status, ValidationStatus::AlreadyExists);
        assert_eq!(report.duplicate_of, Some(existing));

        // Same content in another tenant is not a duplicate
        let other = Scope::organization("org-B");
        let report = validator.validate(bytes, "doc.txt", &other).await.unwrap();
        assert_eq!(report.status, ValidationStatus::Valid);
    }
}
