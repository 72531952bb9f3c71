//! Plain-text extraction for UTF-8 document formats

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::providers::{DocumentParser, ParseHint};
use crate::types::{FileType, Page};

/// Page separator in paginated text exports
const FORM_FEED: char = '\u{000C}';

/// Parser for text formats.
///
/// Pages are split on form feeds; blank pages are dropped but keep their
/// numbering so page numbers still match the source. Binary formats such as
/// PDF need an external parser.
#[derive(Debug, Default)]
pub struct PlainTextParser;

impl PlainTextParser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentParser for PlainTextParser {
    async fn extract_text(&self, bytes: &[u8], hint: &ParseHint) -> Result<Vec<Page>> {
        if !hint.file_type.is_text() {
            return Err(Error::UnsupportedFileType(format!(
                "{} requires an external parser",
                hint.file_type.extension()
            )));
        }

        let content = String::from_utf8_lossy(bytes);
        let content = if hint.file_type == FileType::Html {
            strip_tags(&content)
        } else {
            content.into_owned()
        };

        let pages: Vec<Page> = content
            .split(FORM_FEED)
            .enumerate()
            .map(|(i, text)| Page::new(i as u32 + 1, text.trim()))
            .filter(Page::has_text)
            .collect();

        if pages.is_empty() {
            return Err(Error::file_parse(&hint.file_name, "no text could be extracted"));
        }

        tracing::debug!(
            "Extracted {} pages from '{}'",
            pages.len(),
            hint.file_name
        );
        Ok(pages)
    }

    fn name(&self) -> &str {
        "plain-text"
    }
}

/// Drop markup, keeping the text between tags
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(name: &str) -> ParseHint {
        ParseHint {
            file_name: name.to_string(),
            file_type: FileType::from_filename(name),
        }
    }

    #[tokio::test]
    async fn test_pages_split_on_form_feed() {
        let parser = PlainTextParser::new();
        let pages = parser
            .extract_text(b"first page\x0c\x0c third page ", &hint("doc.txt"))
            .await
            .unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[1].page_number, 3);
        assert_eq!(pages[1].text, "third page");
    }

    #[tokio::test]
    async fn test_blank_text_fails() {
        let parser = PlainTextParser::new();
        let result = parser.extract_text(b"  \n\t ", &hint("blank.md")).await;
        assert!(matches!(result, Err(Error::FileParse { .. })));
    }

    #[tokio::test]
    async fn test_pdf_needs_external_parser() {
        let parser = PlainTextParser::new();
        let result = parser.extract_text(b"%PDF-1.4", &hint("doc.pdf")).await;
        assert!(matches!(result, Err(Error::UnsupportedFileType(_))));
    }

    #[tokio::test]
    async fn test_html_markup_removed() {
        let parser = PlainTextParser::new();
        let pages = parser
            .extract_text(b"<html><body><h1>Title</h1><p>Body text</p></body></html>", &hint("a.html"))
            .await
            .unwrap();
        assert_eq!(pages[0].text, "Title Body text");
    }
}
