//! Document-level types.

use super::{Outline, Page};
use crate::parser;
use serde::{Deserialize, Serialize};

/// Page separator recognized by [`Document::from_markdown`].
pub const PAGE_SEPARATOR: char = '\u{000C}';

/// A source or candidate document.
///
/// Documents are never mutated by the engine: a correction produces a new
/// instance through [`Document::with_page_text`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    /// Document metadata
    pub metadata: Metadata,

    /// Pages in order
    pub pages: Vec<Page>,

    /// Heading outline
    pub outline: Outline,
}

impl Document {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from pages, parsing the outline from their text.
    pub fn from_pages(pages: Vec<Page>) -> Self {
        let outline = parser::parse_outline(&pages);
        Self {
            metadata: Metadata::default(),
            pages,
            outline,
        }
    }

    /// Build a document from Markdown, splitting pages on form feeds.
    pub fn from_markdown(markdown: &str) -> Self {
        let pages = markdown
            .split(PAGE_SEPARATOR)
            .enumerate()
            .map(|(i, text)| Page::new(i as u32 + 1, text))
            .collect();
        Self::from_pages(pages)
    }

    /// Replace the outline (e.g. with an externally supplied structure).
    pub fn with_outline(mut self, outline: Outline) -> Self {
        self.outline = outline;
        self
    }

    /// Set metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// New document with one page's text replaced and the outline reparsed.
    ///
    /// Returns `None` if `index` (0-based) is out of range.
    pub fn with_page_text(&self, index: usize, text: impl Into<String>) -> Option<Self> {
        let page = self.pages.get(index)?;
        let mut pages = self.pages.clone();
        pages[index] = page.with_text(text);
        let outline = parser::parse_outline(&pages);
        Some(Self {
            metadata: self.metadata.clone(),
            pages,
            outline,
        })
    }

    /// Get the number of pages in the document.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Get a page by number (1-indexed).
    pub fn get_page(&self, page_num: u32) -> Option<&Page> {
        if page_num == 0 {
            return None;
        }
        self.pages.get((page_num - 1) as usize)
    }

    /// Check if the document has any pages.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Full text with pages joined by form feeds.
    pub fn to_markdown(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(&PAGE_SEPARATOR.to_string())
    }

    /// Plain text of the entire document.
    pub fn plain_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Total word count.
    pub fn word_count(&self) -> usize {
        self.pages.iter().map(|p| p.word_count()).sum()
    }
}

/// Document metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Document title
    pub title: Option<String>,

    /// Primary language tag (e.g. "en", "zh")
    pub language: Option<String>,

    /// Reference to the artifact this document was loaded from
    pub source_ref: Option<String>,
}

impl Metadata {
    /// Create metadata pointing at an artifact.
    pub fn with_source(source_ref: impl Into<String>) -> Self {
        Self {
            source_ref: Some(source_ref.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_new() {
        let doc = Document::new();
        assert!(doc.is_empty());
        assert_eq!(doc.page_count(), 0);
    }

    #[test]
    fn test_from_markdown_splits_pages() {
        let doc = Document::from_markdown("# One\nalpha\u{000C}# Two\nbeta");
        assert_eq!(doc.page_count(), 2);
        assert_eq!(doc.get_page(2).unwrap().number, 2);
        assert_eq!(doc.outline.len(), 2);
        assert_eq!(doc.to_markdown(), "# One\nalpha\u{000C}# Two\nbeta");
    }

    #[test]
    fn test_with_page_text_produces_new_document() {
        let doc = Document::from_markdown("# One\nalpha");
        let corrected = doc.with_page_text(0, "# Uno\n## Dos\nalpha").unwrap();

        assert_eq!(doc.outline.len(), 1);
        assert_eq!(corrected.outline.len(), 2);
        assert_eq!(doc.pages[0].text, "# One\nalpha");
        assert!(doc.with_page_text(5, "x").is_none());
    }

    #[test]
    fn test_get_page_zero() {
        let doc = Document::from_markdown("text");
        assert!(doc.get_page(0).is_none());
        assert!(doc.get_page(1).is_some());
    }
}
