//! Default collaborator implementations for validation, extraction and chunking

mod chunker;
mod parser;
mod validator;

pub use chunker::TextChunker;
pub use parser::PlainTextParser;
pub use validator::{content_hash, ContentValidator};
