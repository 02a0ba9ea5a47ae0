//! Recognition consensus validation.
//!
//! Several independent recognizers read every source page. Their outputs,
//! together with the candidate's extracted text, are compared pairwise and the
//! most agreed-upon reading becomes the page's consensus text.
//!
//! Recognizer output depends only on the source document, so it is computed
//! once per run ([`RecognitionValidator::recognize_source`]) and re-scored
//! against each candidate revision ([`RecognitionValidator::validate`]).

mod consensus;
mod similarity;

pub use consensus::{build_consensus, length_divergence, PageConsensus};
pub use similarity::{edit_ratio, normalize_text, similarity_matrix, text_similarity, token_jaccard};

use crate::error::{Error, Result};
use crate::model::{Document, Page};
use crate::score::{mean, StageKind, ValidationScore};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Engine name used for the candidate's own extracted text.
pub const EXTRACTED_ENGINE: &str = "extracted";

/// Output of one recognizer for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Engine name
    pub engine: String,

    /// Recognized text
    pub text: String,

    /// Per-token confidences in [0, 1]
    pub token_confidences: Vec<f64>,

    /// Detected language tag
    pub language: Option<String>,
}

impl RecognitionResult {
    /// Create a result without confidences.
    pub fn new(engine: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            text: text.into(),
            token_confidences: Vec::new(),
            language: None,
        }
    }

    /// Set per-token confidences.
    pub fn with_token_confidences(mut self, confidences: Vec<f64>) -> Self {
        self.token_confidences = confidences.into_iter().map(|c| c.clamp(0.0, 1.0)).collect();
        self
    }

    /// Give every token the same confidence.
    ///
    /// Empty text still keeps one entry so the value is not lost.
    pub fn with_uniform_confidence(mut self, confidence: f64) -> Self {
        let tokens = self.word_count().max(1);
        self.token_confidences = vec![confidence.clamp(0.0, 1.0); tokens];
        self
    }

    /// Set the language tag.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Mean token confidence. Engines that report none count as fully confident.
    pub fn mean_confidence(&self) -> f64 {
        mean(&self.token_confidences).unwrap_or(1.0)
    }

    /// Number of whitespace-separated tokens.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// A text recognition engine.
///
/// Implementations must be usable from several threads at once: pages are
/// recognized in parallel.
pub trait Recognizer: Send + Sync {
    /// Engine name, unique within a validator.
    fn name(&self) -> &str;

    /// Read one source page.
    fn recognize(&self, page: &Page) -> Result<RecognitionResult>;
}

/// Recognizer that returns a page's embedded text layer.
///
/// Useful as a baseline engine when no OCR backend is wired in.
#[derive(Debug, Clone)]
pub struct TextLayerRecognizer {
    name: String,
    confidence: f64,
}

impl TextLayerRecognizer {
    /// Create a text-layer recognizer reporting full confidence.
    pub fn new() -> Self {
        Self {
            name: "text-layer".to_string(),
            confidence: 1.0,
        }
    }

    /// Set the engine name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Confidence reported when the page carries none of its own.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

impl Default for TextLayerRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Recognizer for TextLayerRecognizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn recognize(&self, page: &Page) -> Result<RecognitionResult> {
        // A scanned page has pixels but nothing to read from the text layer
        if page.text.trim().is_empty() && page.has_bitmap() {
            return Err(Error::Recognizer {
                engine: self.name.clone(),
                reason: format!("page {} has no text layer", page.number),
            });
        }

        let mut result = RecognitionResult::new(&self.name, &page.text)
            .with_uniform_confidence(page.text_confidence.unwrap_or(self.confidence));
        if let Some(lang) = &page.language {
            result = result.with_language(lang);
        }
        Ok(result)
    }
}

/// Options for the recognition stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionOptions {
    /// Document score below which the stage fails
    pub threshold: f64,

    /// Consensus confidence below which a page is flagged
    pub low_confidence: f64,

    /// Whether the candidate's extracted text joins the consensus
    pub include_extracted: bool,

    /// Confidence of the extracted text when the page reports none
    pub extracted_confidence: f64,

    /// Longest/shortest word-count ratio that triggers a divergence issue
    pub length_divergence_ratio: f64,

    /// Expected language tag; results in another language are flagged
    pub expected_language: Option<String>,

    /// Recognize pages in parallel
    pub parallel: bool,
}

impl RecognitionOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pass threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Include or exclude the candidate's extracted text.
    pub fn with_extracted(mut self, include: bool) -> Self {
        self.include_extracted = include;
        self
    }

    /// Set the expected language tag.
    pub fn with_expected_language(mut self, language: impl Into<String>) -> Self {
        self.expected_language = Some(language.into());
        self
    }

    /// Disable parallel recognition.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            threshold: 0.80,
            low_confidence: 0.80,
            include_extracted: true,
            extracted_confidence: 1.0,
            length_divergence_ratio: 2.0,
            expected_language: None,
            parallel: true,
        }
    }
}

/// Recognizer output for every source page of one run.
#[derive(Debug, Clone, Default)]
pub struct SourceRecognition {
    /// Results per source page, in page order
    pub pages: Vec<Vec<RecognitionResult>>,

    /// Engine failures, one line each
    pub issues: Vec<String>,
}

/// Recognition stage output.
#[derive(Debug, Clone)]
pub struct RecognitionReport {
    /// Stage score
    pub score: ValidationScore,

    /// Consensus per page that had at least one result
    pub pages: Vec<PageConsensus>,
}

/// Runs recognizers and scores their agreement.
#[derive(Clone)]
pub struct RecognitionValidator {
    recognizers: Vec<Arc<dyn Recognizer>>,
    options: RecognitionOptions,
}

impl RecognitionValidator {
    /// Create a validator with no recognizers.
    pub fn new(options: RecognitionOptions) -> Self {
        Self {
            recognizers: Vec::new(),
            options,
        }
    }

    /// Add a recognizer.
    pub fn with_recognizer<R: Recognizer + 'static>(mut self, recognizer: R) -> Self {
        self.recognizers.push(Arc::new(recognizer));
        self
    }

    /// Add a shared recognizer.
    pub fn add_recognizer(&mut self, recognizer: Arc<dyn Recognizer>) {
        self.recognizers.push(recognizer);
    }

    /// Number of configured recognizers.
    pub fn recognizer_count(&self) -> usize {
        self.recognizers.len()
    }

    /// Stage options.
    pub fn options(&self) -> &RecognitionOptions {
        &self.options
    }

    /// Run every recognizer on every source page.
    ///
    /// A recognizer failing on a page is dropped for that page and noted.
    /// The stage is unavailable when no recognizer produced anything.
    pub fn recognize_source(&self, source: &Document) -> Result<SourceRecognition> {
        if self.recognizers.is_empty() {
            return Err(Error::stage_unavailable(
                StageKind::Recognition,
                "no recognizers configured",
            ));
        }

        let run_page = |page: &Page| -> (Vec<RecognitionResult>, Vec<String>) {
            let mut results = Vec::with_capacity(self.recognizers.len());
            let mut issues = Vec::new();
            for recognizer in &self.recognizers {
                match recognizer.recognize(page) {
                    Ok(mut result) => {
                        result.engine = recognizer.name().to_string();
                        results.push(result);
                    }
                    Err(e) => {
                        log::warn!("recognizer {} failed on page {}: {}", recognizer.name(), page.number, e);
                        issues.push(format!(
                            "Page {}: engine '{}' dropped: {}",
                            page.number,
                            recognizer.name(),
                            e
                        ));
                    }
                }
            }
            (results, issues)
        };

        let per_page: Vec<(Vec<RecognitionResult>, Vec<String>)> = if self.options.parallel {
            source.pages.par_iter().map(run_page).collect()
        } else {
            source.pages.iter().map(run_page).collect()
        };

        let mut recognition = SourceRecognition::default();
        for (results, issues) in per_page {
            recognition.pages.push(results);
            recognition.issues.extend(issues);
        }

        if recognition.pages.iter().all(|r| r.is_empty()) {
            return Err(Error::stage_unavailable(
                StageKind::Recognition,
                "every recognizer failed on every page",
            ));
        }

        log::debug!(
            "recognized {} source pages with {} engines",
            recognition.pages.len(),
            self.recognizers.len()
        );
        Ok(recognition)
    }

    /// Score recognizer agreement against a candidate revision.
    pub fn validate(&self, recognized: &SourceRecognition, candidate: &Document) -> Result<RecognitionReport> {
        let mut issues = recognized.issues.clone();
        let mut pages = Vec::with_capacity(recognized.pages.len());

        for (index, engine_results) in recognized.pages.iter().enumerate() {
            let number = index as u32 + 1;
            let mut results = engine_results.clone();

            if self.options.include_extracted {
                if let Some(page) = candidate.pages.get(index) {
                    results.push(self.extracted_result(page));
                }
            }

            if let Some(ratio) = length_divergence(&results) {
                if ratio > self.options.length_divergence_ratio {
                    issues.push(format!(
                        "Page {}: recognizer outputs diverge in length (ratio {:.1})",
                        number, ratio
                    ));
                }
            }

            if let Some(expected) = &self.options.expected_language {
                for result in &results {
                    if let Some(lang) = &result.language {
                        if !language_matches(lang, expected) {
                            issues.push(format!(
                                "Page {}: engine '{}' detected language '{}', expected '{}'",
                                number, result.engine, lang, expected
                            ));
                        }
                    }
                }
            }

            let Some(consensus) = build_consensus(number, &results) else {
                issues.push(format!("Page {}: no recognition result", number));
                continue;
            };

            if consensus.consensus_confidence < self.options.low_confidence {
                let note = if consensus.is_single_engine() {
                    " (single engine)"
                } else {
                    ""
                };
                issues.push(format!(
                    "Page {}: low consensus confidence {:.2}{}",
                    number, consensus.consensus_confidence, note
                ));
            }
            pages.push(consensus);
        }

        let page_scores: Vec<f64> = pages.iter().map(|p| p.score).collect();
        let Some(document_score) = mean(&page_scores) else {
            return Err(Error::stage_unavailable(
                StageKind::Recognition,
                "no page produced a recognition result",
            ));
        };

        let mut score = ValidationScore::new(StageKind::Recognition, document_score, self.options.threshold);
        if !score.passed {
            issues.push(format!(
                "Low recognition confidence: {:.3} < {:.2}",
                score.score, self.options.threshold
            ));
        }
        score.extend_issues(issues);

        log::debug!("recognition score {:.3} over {} pages", score.score, pages.len());
        Ok(RecognitionReport { score, pages })
    }

    /// Recognize the source and score it against the candidate in one call.
    pub fn validate_documents(&self, source: &Document, candidate: &Document) -> Result<RecognitionReport> {
        let recognized = self.recognize_source(source)?;
        self.validate(&recognized, candidate)
    }

    fn extracted_result(&self, page: &Page) -> RecognitionResult {
        let confidence = page.text_confidence.unwrap_or(self.options.extracted_confidence);
        let mut result = RecognitionResult::new(EXTRACTED_ENGINE, &page.text).with_uniform_confidence(confidence);
        if let Some(lang) = &page.language {
            result = result.with_language(lang);
        }
        result
    }
}

/// Compare language tags by primary subtag, ignoring case ("en-US" ~ "en").
fn language_matches(found: &str, expected: &str) -> bool {
    let primary = |tag: &str| {
        tag.split(['-', '_'])
            .next()
            .unwrap_or("")
            .to_ascii_lowercase()
    };
    primary(found) == primary(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRecognizer {
        name: &'static str,
        text: &'static str,
        confidence: f64,
    }

    impl Recognizer for FixedRecognizer {
        fn name(&self) -> &str {
            self.name
        }

        fn recognize(&self, _page: &Page) -> Result<RecognitionResult> {
            Ok(RecognitionResult::new(self.name, self.text).with_uniform_confidence(self.confidence))
        }
    }

    struct FailingRecognizer;

    impl Recognizer for FailingRecognizer {
        fn name(&self) -> &str {
            "broken"
        }

        fn recognize(&self, _page: &Page) -> Result<RecognitionResult> {
            Err(Error::Recognizer {
                engine: "broken".into(),
                reason: "backend offline".into(),
            })
        }
    }

    #[test]
    fn test_identical_text_scores_one() {
        let doc = Document::from_markdown("# Sensors\nipmitool sdr list");
        let validator = RecognitionValidator::new(RecognitionOptions::default())
            .with_recognizer(TextLayerRecognizer::new())
            .with_recognizer(TextLayerRecognizer::new().with_name("second"));

        let report = validator.validate_documents(&doc, &doc).unwrap();
        assert_eq!(report.score.score, 1.0);
        assert!(report.score.passed);
        assert!(!report.score.has_issues());
        assert_eq!(report.pages[0].engines.len(), 3);
    }

    #[test]
    fn test_no_recognizers_unavailable() {
        let doc = Document::from_markdown("text");
        let validator = RecognitionValidator::new(RecognitionOptions::default());
        let err = validator.recognize_source(&doc).unwrap_err();
        assert!(matches!(err, Error::StageUnavailable { stage: StageKind::Recognition, .. }));
    }

    #[test]
    fn test_failing_engine_dropped() {
        let doc = Document::from_markdown("BMC firmware update");
        let validator = RecognitionValidator::new(RecognitionOptions::default())
            .with_recognizer(FailingRecognizer)
            .with_recognizer(TextLayerRecognizer::new());

        let report = validator.validate_documents(&doc, &doc).unwrap();
        assert_eq!(report.score.score, 1.0);
        assert!(report.score.issues.iter().any(|i| i.contains("'broken' dropped")));
    }

    #[test]
    fn test_all_engines_failing_unavailable() {
        let doc = Document::from_markdown("BMC firmware update");
        let validator = RecognitionValidator::new(RecognitionOptions::default())
            .with_recognizer(FailingRecognizer);
        assert!(validator.recognize_source(&doc).is_err());
    }

    #[test]
    fn test_disagreement_lowers_score() {
        let source = Document::from_markdown("Reset the BMC");
        let candidate = Document::from_markdown("Reset the BMC");
        let validator = RecognitionValidator::new(RecognitionOptions::default().with_extracted(false))
            .with_recognizer(FixedRecognizer { name: "a", text: "Reset the BMC", confidence: 0.6 })
            .with_recognizer(FixedRecognizer { name: "b", text: "qqq zzz", confidence: 0.6 });

        let report = validator.validate_documents(&source, &candidate).unwrap();
        assert!(report.score.score < 0.8);
        assert!(!report.score.passed);
        assert!(report.score.issues.iter().any(|i| i.contains("low consensus confidence")));
    }

    #[test]
    fn test_language_mismatch_flagged() {
        let source = Document::from_pages(vec![Page::new(1, "Bonjour").with_language("fr")]);
        let validator = RecognitionValidator::new(
            RecognitionOptions::default().with_expected_language("en-US"),
        )
        .with_recognizer(TextLayerRecognizer::new());

        let report = validator.validate_documents(&source, &source).unwrap();
        assert!(report.score.issues.iter().any(|i| i.contains("expected 'en-US'")));
    }

    #[test]
    fn test_scanned_page_has_no_text_layer() {
        let page = Page::new(1, "").with_bitmap(image::GrayImage::new(2, 2));
        assert!(TextLayerRecognizer::new().recognize(&page).is_err());
    }
}
