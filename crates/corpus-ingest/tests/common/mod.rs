//! Recording fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use corpus_ingest::config::{IngestConfig, ValidationConfig};
use corpus_ingest::ingestion::{ContentValidator, PlainTextParser, TextChunker};
use corpus_ingest::providers::{
    DocumentParser, EmbeddingProvider, MemoryVectorIndex, ObjectStore, ParseHint, UsageMeter,
    UsageReport, VectorIndex,
};
use corpus_ingest::types::{Caller, FileType, Metadata, Page, Scope};
use corpus_ingest::{Collaborators, Error, IngestOrchestrator, PipelineContext, Result};

pub const DIMENSIONS: usize = 8;

/// Ordered record of collaborator calls
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| e.as_str() == entry).count()
    }
}

/// Faults injected into the fake collaborators
#[derive(Clone, Default)]
pub struct Faults {
    /// Every embedding call fails with this message
    pub embed_error: Option<String>,
    /// Embedding batches come back one vector short
    pub embed_short: bool,
    /// The index writes the first entry of an insert, then fails
    pub index_partial: bool,
    /// `put_document` returns an error
    pub store_document_error: bool,
    /// The usage meter is unreachable
    pub meter_down: bool,
}

/// Parser that understands the test PDF layout: a `%PDF-` header line, then
/// pages separated by form feeds. Other formats go to the plain-text parser.
pub struct FakePdfParser {
    text: PlainTextParser,
}

#[async_trait]
impl DocumentParser for FakePdfParser {
    async fn extract_text(&self, bytes: &[u8], hint: &ParseHint) -> Result<Vec<Page>> {
        if hint.file_type != FileType::Pdf {
            return self.text.extract_text(bytes, hint).await;
        }
        let body = String::from_utf8_lossy(bytes);
        let body = body.split_once('\n').map_or("", |(_, rest)| rest);
        let pages: Vec<Page> = body
            .split('\u{000C}')
            .enumerate()
            .map(|(i, text)| Page::new(i as u32 + 1, text.trim()))
            .filter(Page::has_text)
            .collect();
        if pages.is_empty() {
            return Err(Error::file_parse(&hint.file_name, "no text layer"));
        }
        Ok(pages)
    }

    fn name(&self) -> &str {
        "fake-pdf"
    }
}

/// Deterministic embedder: vectors derived from text length
pub struct FakeEmbedder {
    journal: Journal,
    faults: Faults,
}

impl FakeEmbedder {
    pub fn new(journal: Journal, faults: Faults) -> Self {
        Self { journal, faults }
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.journal.push("embed.batch");
        if let Some(message) = &self.faults.embed_error {
            return Err(Error::embedding(message.clone()));
        }
        let mut vectors: Vec<Vec<f32>> = texts
            .iter()
            .map(|t| {
                (0..DIMENSIONS)
                    .map(|d| ((t.len() + d) % 7) as f32 / 7.0)
                    .collect()
            })
            .collect();
        if self.faults.embed_short {
            vectors.pop();
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn model(&self) -> &str {
        "fake-embed"
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// In-memory index that journals calls and can fail mid-insert
pub struct RecordingIndex {
    pub inner: Arc<MemoryVectorIndex>,
    journal: Journal,
    faults: Faults,
}

#[async_trait]
impl VectorIndex for RecordingIndex {
    async fn ensure_collection(&self, collection: &str, dimensions: usize) -> Result<()> {
        self.inner.ensure_collection(collection, dimensions).await
    }

    async fn insert(
        &self,
        collection: &str,
        ids: &[String],
        vectors: &[Vec<f32>],
        metadata: &[Metadata],
    ) -> Result<usize> {
        self.journal.push("index.insert");
        if self.faults.index_partial {
            self.inner
                .insert(collection, &ids[..1], &vectors[..1], &metadata[..1])
                .await?;
            return Err(Error::vector_index("connection reset after 1 entry"));
        }
        self.inner.insert(collection, ids, vectors, metadata).await
    }

    async fn delete_by_document_id(&self, collection: &str, document_id: &Uuid) -> Result<usize> {
        self.journal.push("index.delete");
        self.inner.delete_by_document_id(collection, document_id).await
    }

    fn name(&self) -> &str {
        "recording-index"
    }
}

/// Object store that journals calls and keeps written paths in memory
pub struct RecordingStore {
    pub objects: Mutex<Vec<String>>,
    journal: Journal,
    faults: Faults,
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn put_document(
        &self,
        scope: &Scope,
        document_id: &Uuid,
        extension: &str,
        _bytes: &[u8],
        _metadata: &Metadata,
    ) -> Result<bool> {
        self.journal.push("store.put_document");
        if self.faults.store_document_error {
            return Err(Error::object_store("bucket not found"));
        }
        self.objects
            .lock()
            .push(scope.document_path(document_id, extension));
        Ok(true)
    }

    async fn put_chunk(
        &self,
        scope: &Scope,
        document_id: &Uuid,
        chunk_id: &str,
        _text: &str,
        _metadata: &Metadata,
    ) -> Result<bool> {
        self.journal.push("store.put_chunk");
        self.objects
            .lock()
            .push(scope.chunk_path(document_id, chunk_id));
        Ok(true)
    }

    async fn delete_document(&self, scope: &Scope, document_id: &Uuid) -> Result<bool> {
        self.journal.push("store.delete");
        let prefix = scope.document_prefix(document_id);
        let mut objects = self.objects.lock();
        let before = objects.len();
        objects.retain(|p| !p.starts_with(&prefix));
        Ok(objects.len() != before)
    }

    fn name(&self) -> &str {
        "recording-store"
    }
}

/// Usage meter with a fixed balance that can be taken offline
pub struct FakeMeter {
    journal: Journal,
    faults: Faults,
}

#[async_trait]
impl UsageMeter for FakeMeter {
    async fn consume(
        &self,
        _caller_id: &str,
        _service_type: &str,
        tokens_used: u64,
        _duration_seconds: f64,
        _metadata: &Metadata,
    ) -> Result<UsageReport> {
        self.journal.push("meter.consume");
        if self.faults.meter_down {
            return Err(Error::usage_meter("metering service unavailable"));
        }
        Ok(UsageReport {
            remaining_credits: 1000.0 - tokens_used as f64 / 1000.0,
            usage_id: Some("usage-1".to_string()),
            success: true,
        })
    }

    fn name(&self) -> &str {
        "fake-meter"
    }
}

/// A standard orchestrator wired to recording fakes
pub struct Harness {
    pub journal: Journal,
    pub index: Arc<RecordingIndex>,
    pub store: Arc<RecordingStore>,
    pub orchestrator: IngestOrchestrator,
}

impl Harness {
    pub fn new(faults: Faults) -> Self {
        let journal = Journal::default();
        let memory = Arc::new(MemoryVectorIndex::new());
        let index = Arc::new(RecordingIndex {
            inner: memory.clone(),
            journal: journal.clone(),
            faults: faults.clone(),
        });
        let store = Arc::new(RecordingStore {
            objects: Mutex::new(Vec::new()),
            journal: journal.clone(),
            faults: faults.clone(),
        });

        let mut config = IngestConfig::default();
        config.embeddings.dimensions = DIMENSIONS;
        config.embeddings.batch_size = 4;

        let collaborators = Collaborators {
            validator: Arc::new(
                ContentValidator::new(ValidationConfig::default()).with_duplicate_detector(memory),
            ),
            parser: Arc::new(FakePdfParser {
                text: PlainTextParser::new(),
            }),
            chunker: Arc::new(TextChunker::new(120, 20)),
            embedder: Arc::new(FakeEmbedder::new(journal.clone(), faults.clone())),
            index: index.clone(),
            object_store: store.clone(),
            usage_meter: Arc::new(FakeMeter {
                journal: journal.clone(),
                faults,
            }),
        };

        Self {
            journal,
            index,
            store,
            orchestrator: IngestOrchestrator::standard(collaborators, &config),
        }
    }

    /// Entries left in the scope's collection for a document
    pub fn indexed(&self, ctx: &PipelineContext) -> usize {
        self.index
            .inner
            .count_document(&ctx.scope().collection_name(), ctx.document_id())
    }
}

pub fn scope() -> Scope {
    "org-A/private/user-1".parse().expect("valid scope")
}

pub fn caller() -> Caller {
    Caller::new("user-1", Some(250.0))
}

/// PDF bytes in the layout `FakePdfParser` reads
pub fn three_page_pdf() -> Vec<u8> {
    let pages = [
        "Quarterly revenue grew in every region. The northern region led with strong retail sales.",
        "Operating costs stayed flat. Hiring slowed in the second half of the quarter.",
        "The outlook for next year is cautious. Management expects modest growth overall.",
    ];
    format!("%PDF-1.7\n{}", pages.join("\u{000C}")).into_bytes()
}

pub fn context(bytes: Vec<u8>, file_name: &str) -> PipelineContext {
    PipelineContext::new(bytes, file_name, Uuid::new_v4(), scope(), caller())
}

/// Same input and document id, fresh context
pub fn context_with_id(bytes: Vec<u8>, file_name: &str, document_id: Uuid) -> PipelineContext {
    PipelineContext::new(bytes, file_name, document_id, scope(), caller())
}
