//! Page-level types.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single page of a source or candidate document.
///
/// The bitmap is shared behind an `Arc` so cloning a page (and therefore a
/// whole [`Document`](super::Document)) never copies pixel data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// Page number (1-indexed)
    pub number: u32,

    /// Raw text of the page (Markdown for converted candidates)
    pub text: String,

    /// Rendered grayscale bitmap, if one was supplied or rendered
    #[serde(skip)]
    pub bitmap: Option<Arc<GrayImage>>,

    /// Upstream extractor's confidence in `text`, if it reported one
    pub text_confidence: Option<f64>,

    /// Detected language tag of the page text
    pub language: Option<String>,
}

impl Page {
    /// Create a page with the given text and no bitmap.
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
            bitmap: None,
            text_confidence: None,
            language: None,
        }
    }

    /// Attach a rendered bitmap.
    pub fn with_bitmap(mut self, bitmap: GrayImage) -> Self {
        self.bitmap = Some(Arc::new(bitmap));
        self
    }

    /// Attach an already shared bitmap.
    pub fn with_shared_bitmap(mut self, bitmap: Arc<GrayImage>) -> Self {
        self.bitmap = Some(bitmap);
        self
    }

    /// Set the upstream text confidence.
    pub fn with_text_confidence(mut self, confidence: f64) -> Self {
        self.text_confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    /// Set the language tag.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Copy of this page with different text. The bitmap is shared, not copied.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..self.clone()
        }
    }

    /// Check if a bitmap is attached.
    pub fn has_bitmap(&self) -> bool {
        self.bitmap.is_some()
    }

    /// Bitmap dimensions as (width, height).
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.bitmap.as_ref().map(|b| b.dimensions())
    }

    /// Number of whitespace-separated words.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Check if the page has neither text nor bitmap.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.bitmap.is_none()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, String::new())
    }
}
