//! Error types for the ingestion pipeline

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ingestion errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Document rejected by validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// File parsing error
    #[error("Failed to parse file '{filename}': {message}")]
    FileParse { filename: String, message: String },

    /// Unsupported file type
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Chunking error
    #[error("Chunking failed: {0}")]
    Chunking(String),

    /// Embedding error
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// Vector index error
    #[error("Vector index error: {0}")]
    VectorIndex(String),

    /// Object store error
    #[error("Object store error: {0}")]
    ObjectStore(String),

    /// Usage metering error
    #[error("Usage metering error: {0}")]
    UsageMeter(String),

    /// A stage tried to write an output slot that was already written in this run
    #[error("Context slot '{0}' was already written")]
    SlotAlreadySet(&'static str),

    /// A stage needed an output slot that no earlier stage produced
    #[error("Context slot '{0}' is not set; an earlier stage did not produce it")]
    MissingInput(&'static str),

    /// A stage completed out of the orchestrator's order
    #[error("Stage '{actual}' completed out of order (expected {expected})")]
    StageOrder { expected: String, actual: String },

    /// The context already went through a run
    #[error("Pipeline context was already processed; create a fresh context per run")]
    ContextReused,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a file parse error
    pub fn file_parse(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileParse {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Create a chunking error
    pub fn chunking(message: impl Into<String>) -> Self {
        Self::Chunking(message.into())
    }

    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Create a vector index error
    pub fn vector_index(message: impl Into<String>) -> Self {
        Self::VectorIndex(message.into())
    }

    /// Create an object store error
    pub fn object_store(message: impl Into<String>) -> Self {
        Self::ObjectStore(message.into())
    }

    /// Create a usage metering error
    pub fn usage_meter(message: impl Into<String>) -> Self {
        Self::UsageMeter(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
