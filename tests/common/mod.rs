//! Shared fixtures and mock capabilities for integration tests.

#![allow(dead_code)]

use docqa::error::{Error, Result};
use docqa::{
    CorrectionProvider, CorrectionRequest, CorrectionResponse, Document, Embedder, Page, PageRenderer,
    RecognitionResult, Recognizer,
};
use image::{GrayImage, Luma};
use std::sync::atomic::{AtomicU32, Ordering};

pub const GUIDE: &str = "# Guide\nUse ipmitool with the BMC over IPMI.\n## Setup\nCheck the fan sensor and CPU temperature.\n";

/// Deterministic page bitmap: one dark block per non-space character.
pub fn text_bitmap(text: &str) -> GrayImage {
    let mut img = GrayImage::from_pixel(96, 96, Luma([255]));
    for (row, line) in text.lines().take(12).enumerate() {
        for (col, ch) in line.chars().take(24).enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            let shade = 40 + (ch as u32 % 8) as u8 * 10;
            for dy in 0..6 {
                for dx in 0..3 {
                    img.put_pixel(col as u32 * 4 + dx, row as u32 * 8 + dy, Luma([shade]));
                }
            }
        }
    }
    img
}

/// Document from form-feed separated Markdown with a bitmap per page.
pub fn document_with_bitmaps(markdown: &str) -> Document {
    let pages = markdown
        .split('\u{000C}')
        .enumerate()
        .map(|(i, text)| Page::new(i as u32 + 1, text).with_bitmap(text_bitmap(text)))
        .collect();
    Document::from_pages(pages)
}

/// Renders page text with [`text_bitmap`].
pub struct TextRenderer;

impl PageRenderer for TextRenderer {
    fn render(&self, page: &Page) -> Result<GrayImage> {
        Ok(text_bitmap(&page.text))
    }
}

pub struct BrokenRenderer;

impl PageRenderer for BrokenRenderer {
    fn render(&self, _page: &Page) -> Result<GrayImage> {
        Err(Error::Render("rasterizer crashed".into()))
    }
}

pub struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::Embedding("embedding service offline".into()))
    }
}

/// Recognizer returning a fixed reading of every page.
pub struct FixedRecognizer {
    pub name: &'static str,
    pub text: Option<String>,
    pub confidence: f64,
}

impl Recognizer for FixedRecognizer {
    fn name(&self) -> &str {
        self.name
    }

    fn recognize(&self, page: &Page) -> Result<RecognitionResult> {
        let text = self.text.clone().unwrap_or_else(|| page.text.clone());
        Ok(RecognitionResult::new(self.name, text).with_uniform_confidence(self.confidence))
    }
}

/// Replaces one string with another in every snippet.
pub struct ReplacingProvider {
    pub from: &'static str,
    pub to: &'static str,
    pub confidence: f64,
    pub calls: AtomicU32,
}

impl ReplacingProvider {
    pub fn new(from: &'static str, to: &'static str, confidence: f64) -> Self {
        Self {
            from,
            to,
            confidence,
            calls: AtomicU32::new(0),
        }
    }
}

impl CorrectionProvider for ReplacingProvider {
    fn name(&self) -> &str {
        "replacing"
    }

    fn correct(&self, request: &CorrectionRequest) -> Result<CorrectionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CorrectionResponse::new(
            request.original_snippet.replace(self.from, self.to),
            self.confidence,
        ))
    }
}

/// Returns every snippet untouched.
pub struct NoopProvider;

impl CorrectionProvider for NoopProvider {
    fn correct(&self, request: &CorrectionRequest) -> Result<CorrectionResponse> {
        Ok(CorrectionResponse::new(request.original_snippet.clone(), 0.99))
    }
}

/// Appends a word to every snippet, so every answer changes the candidate.
pub struct NoisyProvider;

impl CorrectionProvider for NoisyProvider {
    fn correct(&self, request: &CorrectionRequest) -> Result<CorrectionResponse> {
        Ok(CorrectionResponse::new(format!("{} noted", request.original_snippet), 0.9))
    }
}

/// Always fails.
pub struct FailingProvider {
    pub calls: AtomicU32,
}

impl CorrectionProvider for FailingProvider {
    fn correct(&self, _request: &CorrectionRequest) -> Result<CorrectionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::CorrectionProvider("HTTP 503".into()))
    }
}

/// Provider backed by a closure.
pub struct FnProvider<F>(pub F);

impl<F> CorrectionProvider for FnProvider<F>
where
    F: Fn(&CorrectionRequest) -> CorrectionResponse + Send + Sync,
{
    fn correct(&self, request: &CorrectionRequest) -> Result<CorrectionResponse> {
        Ok((self.0)(request))
    }
}
