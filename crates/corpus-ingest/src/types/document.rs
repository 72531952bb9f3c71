//! Document, page and chunk types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Open key/value metadata attached to pages, chunks and stored objects
pub type Metadata = HashMap<String, Value>;

/// Supported file types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// PDF document
    Pdf,
    /// Plain text file
    Txt,
    /// Markdown file
    Markdown,
    /// CSV file
    Csv,
    /// JSON document
    Json,
    /// HTML document
    Html,
    /// Unknown file type
    Unknown,
}

impl FileType {
    /// Detect file type from extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "txt" | "text" => Self::Txt,
            "md" | "markdown" => Self::Markdown,
            "csv" => Self::Csv,
            "json" => Self::Json,
            "html" | "htm" => Self::Html,
            _ => Self::Unknown,
        }
    }

    /// Detect file type from a file name
    pub fn from_filename(filename: &str) -> Self {
        Self::from_extension(&extension_of(filename))
    }

    /// Canonical extension used for the stored original
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Txt => "txt",
            Self::Markdown => "md",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Html => "html",
            Self::Unknown => "bin",
        }
    }

    /// Whether the file is expected to be UTF-8 text
    pub fn is_text(&self) -> bool {
        !matches!(self, Self::Pdf | Self::Unknown)
    }
}

/// Lowercased extension of a file name, empty when there is none
pub fn extension_of(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// One page of extracted text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    /// 1-based page number
    pub page_number: u32,
    /// Extracted text
    pub text: String,
    /// Extractor-specific metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Page {
    /// Create a page without metadata
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    /// Whether the page carries any non-whitespace text
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// A chunk of document text, the unit that is embedded and indexed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Deterministic id, `{document_id}_{index:04}`
    pub id: String,
    /// Parent document
    pub document_id: Uuid,
    /// Chunk text
    pub text: String,
    /// Page the chunk starts on
    pub page_number: Option<u32>,
    /// Position of the chunk within the document
    pub index: u32,
    /// Chunker-specific metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    /// Create a chunk with its deterministic id
    pub fn new(
        document_id: Uuid,
        index: u32,
        text: impl Into<String>,
        page_number: Option<u32>,
    ) -> Self {
        Self {
            id: Self::chunk_id(&document_id, index),
            document_id,
            text: text.into(),
            page_number,
            index,
            metadata: Metadata::new(),
        }
    }

    /// Index and object-store key of the chunk at `index`
    pub fn chunk_id(document_id: &Uuid, index: u32) -> String {
        format!("{}_{:04}", document_id, index)
    }

    /// Rough token count used for metering
    pub fn estimated_tokens(&self) -> u64 {
        estimate_tokens(&self.text)
    }
}

/// Approximate token count of a text, four characters per token
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}
