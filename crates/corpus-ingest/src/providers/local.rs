//! Local provider implementations using the filesystem and in-process maps

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::config::{MeteringConfig, StorageConfig};
use crate::error::{Error, Result};
use crate::types::{Metadata, Scope};

use super::object_store::ObjectStore;
use super::usage_meter::{UsageMeter, UsageReport};
use super::validator::DuplicateDetector;
use super::vector_index::VectorIndex;

/// One stored vector
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

impl IndexEntry {
    fn document_id(&self) -> Option<Uuid> {
        self.metadata
            .get("document_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// In-memory vector index keyed by collection name
#[derive(Default)]
pub struct MemoryVectorIndex {
    collections: DashMap<String, Vec<IndexEntry>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Number of entries belonging to one document
    pub fn count_document(&self, collection: &str, document_id: &Uuid) -> usize {
        self.collections
            .get(collection)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.document_id().as_ref() == Some(document_id))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Snapshot of a collection's entries
    pub fn entries(&self, collection: &str) -> Vec<IndexEntry> {
        self.collections
            .get(collection)
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn ensure_collection(&self, collection: &str, _dimensions: usize) -> Result<()> {
        self.collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn insert(
        &self,
        collection: &str,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadata: &[Metadata],
    ) -> Result<usize> {
        if ids.len() != vectors.len() || ids.len() != metadata.len() {
            return Err(Error::vector_index(format!(
                "mismatched insert batch: {} ids, {} vectors, {} metadata",
                ids.len(),
                vectors.len(),
                metadata.len()
            )));
        }

        let mut entries = self.collections.entry(collection.to_string()).or_default();
        for ((id, vector), meta) in ids.iter().zip(vectors).zip(metadata) {
            // Upsert by id so a retried document does not duplicate entries
            entries.retain(|e| &e.id != id);
            entries.push(IndexEntry {
                id: id.clone(),
                vector: vector.clone(),
                metadata: meta.clone(),
            });
        }

        Ok(ids.len())
    }

    async fn delete_by_document_id(&self, collection: &str, document_id: &Uuid) -> Result<usize> {
        let Some(mut entries) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|e| e.document_id().as_ref() != Some(document_id));
        Ok(before - entries.len())
    }

    fn name(&self) -> &str {
        "memory-index"
    }
}

#[async_trait]
impl DuplicateDetector for MemoryVectorIndex {
    async fn find_by_hash(&self, collection: &str, file_hash: &str) -> Result<Option<Uuid>> {
        Ok(self.collections.get(collection).and_then(|entries| {
            entries
                .iter()
                .find(|e| e.metadata.get("file_hash").and_then(|v| v.as_str()) == Some(file_hash))
                .and_then(IndexEntry::document_id)
        }))
    }
}

/// Chunk payload as written to the object store
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub document_id: Uuid,
    pub text: String,
    pub metadata: Metadata,
}

/// Object store on the local filesystem
pub struct LocalObjectStore {
    /// Root directory; object paths are resolved below it
    root_dir: PathBuf,
}

impl LocalObjectStore {
    /// Create a new local object store
    pub fn new(root_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root_dir)?;
        Ok(Self { root_dir })
    }

    /// Create from config
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::new(config.root_dir.clone())
    }

    /// Root directory of the store
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Filesystem location of an object path. Only plain relative paths are
    /// accepted, so no object lands outside the root.
    pub fn resolve(&self, object_path: &str) -> Result<PathBuf> {
        let relative = Path::new(object_path);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !plain || object_path.is_empty() {
            return Err(Error::object_store(format!(
                "object path '{}' escapes the store root",
                object_path
            )));
        }
        Ok(self.root_dir.join(relative))
    }

    async fn write_object(&self, object_path: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(object_path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_document(
        &self,
        scope: &Scope,
        document_id: &Uuid,
        extension: &str,
        bytes: &[u8],
        metadata: &Metadata,
    ) -> Result<bool> {
        let object_path = scope.document_path(document_id, extension);
        self.write_object(&object_path, bytes).await?;

        let content_type = mime_guess::from_ext(extension).first_or_octet_stream();
        let mut meta = metadata.clone();
        meta.insert("content_type".to_string(), content_type.to_string().into());
        meta.insert("size".to_string(), bytes.len().into());
        let meta_json = serde_json::to_vec_pretty(&meta)?;
        self.write_object(&format!("{}.meta.json", object_path), &meta_json)
            .await?;

        Ok(true)
    }

    async fn put_chunk(
        &self,
        scope: &Scope,
        document_id: &Uuid,
        chunk_id: &str,
        text: &str,
        metadata: &Metadata,
    ) -> Result<bool> {
        let payload = StoredChunk {
            chunk_id: chunk_id.to_string(),
            document_id: *document_id,
            text: text.to_string(),
            metadata: metadata.clone(),
        };
        let json = serde_json::to_vec_pretty(&payload)?;
        self.write_object(&scope.chunk_path(document_id, chunk_id), &json)
            .await?;
        Ok(true)
    }

    async fn delete_document(&self, scope: &Scope, document_id: &Uuid) -> Result<bool> {
        let dir = self.resolve(&scope.document_prefix(document_id))?;
        if !dir.exists() {
            return Ok(false);
        }
        tokio::fs::remove_dir_all(&dir).await?;
        Ok(true)
    }

    fn name(&self) -> &str {
        "local-filesystem"
    }
}

/// Credit ledger kept in memory
pub struct LocalUsageMeter {
    balances: DashMap<String, f64>,
    initial_credits: f64,
    /// Credits charged per 1000 tokens
    credits_per_thousand_tokens: f64,
}

impl LocalUsageMeter {
    pub fn new(initial_credits: f64) -> Self {
        Self {
            balances: DashMap::new(),
            initial_credits,
            credits_per_thousand_tokens: 1.0,
        }
    }

    /// Create from config
    pub fn from_config(config: &MeteringConfig) -> Self {
        Self::new(config.initial_credits)
    }

    /// Current balance of a caller
    pub fn balance(&self, caller_id: &str) -> f64 {
        self.balances
            .get(caller_id)
            .map(|b| *b)
            .unwrap_or(self.initial_credits)
    }
}

#[async_trait]
impl UsageMeter for LocalUsageMeter {
    async fn consume(
        &self,
        caller_id: &str,
        service_type: &str,
        tokens_used: u64,
        _duration_seconds: f64,
        _metadata: &Metadata,
    ) -> Result<UsageReport> {
        let cost = tokens_used as f64 / 1000.0 * self.credits_per_thousand_tokens;
        let mut balance = self
            .balances
            .entry(caller_id.to_string())
            .or_insert(self.initial_credits);

        if *balance < cost {
            return Ok(UsageReport {
                remaining_credits: *balance,
                usage_id: None,
                success: false,
            });
        }

        *balance -= cost;
        tracing::debug!(
            "Charged {:.3} credits to {} for {} ({} tokens)",
            cost,
            caller_id,
            service_type,
            tokens_used
        );

        Ok(UsageReport {
            remaining_credits: *balance,
            usage_id: Some(Uuid::new_v4().to_string()),
            success: true,
        })
    }

    fn name(&self) -> &str {
        "local-ledger"
    }
}
