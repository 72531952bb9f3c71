//! Configuration for the ingestion pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Validation limits
    pub validation: ValidationConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Embedding configuration
    pub embeddings: EmbeddingConfig,
    /// Ollama embedding backend
    pub ollama: OllamaConfig,
    /// Object storage configuration
    pub storage: StorageConfig,
    /// Usage metering configuration
    pub metering: MeteringConfig,
    /// Caller-level processing configuration
    pub processing: ProcessingConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl IngestConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(Error::Config("chunking.chunk_size must be > 0".to_string()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::Config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.embeddings.batch_size == 0 {
            return Err(Error::Config("embeddings.batch_size must be > 0".to_string()));
        }
        if self.embeddings.dimensions == 0 {
            return Err(Error::Config("embeddings.dimensions must be > 0".to_string()));
        }
        if self.processing.file_timeout_secs == 0 {
            return Err(Error::Config(
                "processing.file_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Document validation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Maximum accepted file size in bytes (default: 50MB)
    pub max_file_size: u64,
    /// Accepted file extensions, lowercase without the dot
    pub allowed_extensions: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            allowed_extensions: ["pdf", "txt", "md", "markdown", "csv", "json", "html", "htm"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between chunks in characters
    pub chunk_overlap: usize,
    /// Minimum chunk size (skip smaller chunks)
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            chunk_overlap: 200,
            min_chunk_size: 16,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding model name
    pub model: String,
    /// Embedding dimensions (768 for nomic-embed-text)
    pub dimensions: usize,
    /// Number of texts sent per provider call
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            batch_size: 32,
        }
    }
}

/// Ollama server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for transient failures
    pub max_retries: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the local object store
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("corpus-ingest")
            .join("objects");

        Self { root_dir }
    }
}

/// Usage metering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeteringConfig {
    /// Service type reported with every usage record
    pub service_type: String,
    /// Credits granted to an unknown caller by the local meter
    pub initial_credits: f64,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            service_type: "document_ingestion".to_string(),
            initial_credits: 100_000.0,
        }
    }
}

/// Caller-level processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Deadline for a single document run in seconds (default: 300 = 5 minutes)
    pub file_timeout_secs: u64,
    /// Number of documents processed concurrently (default: CPU count, max 8)
    pub parallel_files: Option<usize>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            file_timeout_secs: 300,
            parallel_files: None,
        }
    }
}

impl ProcessingConfig {
    /// Resolved number of concurrent runs
    pub fn parallelism(&self) -> usize {
        self.parallel_files
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "corpus_ingest=info".to_string(),
        }
    }
}
