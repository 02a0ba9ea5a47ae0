//! # docqa
//!
//! Cascade validation and bounded auto-correction for machine-converted
//! technical documents.
//!
//! A candidate (typically Markdown converted or translated from a PDF) is
//! checked against its source along four independent axes, the scores are
//! combined into one verdict, and a failing candidate is repaired through a
//! pluggable correction provider under a fixed budget.
//!
//! ## Quick Start
//!
//! ```no_run
//! use docqa::{validate, Document, ValidationOptions};
//!
//! fn main() -> docqa::Result<()> {
//!     let source = Document::from_markdown(&std::fs::read_to_string("source.md")?);
//!     let candidate = Document::from_markdown(&std::fs::read_to_string("converted.md")?);
//!
//!     let verdict = validate("manual-01", &source, &candidate, None, ValidationOptions::default())?;
//!     println!("score {:.3}, passed: {}", verdict.overall_score, verdict.passed);
//!     Ok(())
//! }
//! ```
//!
//! ## Stages
//!
//! - **Recognition**: agreement between OCR engines and the extracted text
//! - **Visual**: SSIM between page bitmaps plus localized difference regions
//! - **Structure**: heading outline shape and semantics, link integrity
//! - **Content**: technical-term retention, code blocks, Markdown well-formedness
//! - **Orchestration**: weighted aggregate, bounded correction loop, audit trail

pub mod content;
pub mod correction;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod parser;
pub mod recognition;
pub mod report;
pub mod score;
pub mod structure;
pub mod visual;

// Re-export commonly used types
pub use correction::{CorrectionKind, CorrectionOptions, CorrectionProvider, CorrectionRequest, CorrectionResponse};
pub use error::{Error, Result};
pub use model::{Document, Metadata, NodeId, Outline, OutlineNode, Page};
pub use orchestrator::{CancellationToken, StageWeights, ValidationOptions, Validator};
pub use recognition::{RecognitionResult, Recognizer, TextLayerRecognizer};
pub use report::{AuditStore, JsonFormat, QualityVerdict, TerminationReason};
pub use score::{StageKind, ValidationScore};
pub use structure::{Embedder, HashingEmbedder};
pub use visual::{DifferenceRegion, PageRenderer};

use std::path::Path;

/// Validate a candidate against its source with default capabilities.
///
/// The source's own text layer serves as the recognition engine, the
/// built-in hashing embedder drives the structure stage, and no correction
/// provider is configured. Use [`Validator`] to plug in OCR engines, a page
/// renderer, or a correction provider.
///
/// `candidate_structure` replaces the outline parsed from the candidate's
/// Markdown when the caller has a better one.
pub fn validate(
    document_id: &str,
    source: &Document,
    candidate: &Document,
    candidate_structure: Option<Outline>,
    options: ValidationOptions,
) -> Result<QualityVerdict> {
    Validator::new(options)
        .with_recognizer(TextLayerRecognizer::new())
        .validate_with_structure(document_id, source, candidate, candidate_structure)
}

/// Validate two Markdown files; pages are separated by form feeds.
///
/// # Example
///
/// ```no_run
/// use docqa::{validate_files, ValidationOptions};
///
/// let verdict = validate_files("source.md", "translated.md", ValidationOptions::default()).unwrap();
/// assert!(verdict.overall_score <= 1.0);
/// ```
pub fn validate_files<P: AsRef<Path>, Q: AsRef<Path>>(
    source: P,
    candidate: Q,
    options: ValidationOptions,
) -> Result<QualityVerdict> {
    let source_path = source.as_ref();
    let source_doc = Document::from_markdown(&std::fs::read_to_string(source_path)?)
        .with_metadata(Metadata::with_source(source_path.display().to_string()));
    let candidate_doc = Document::from_markdown(&std::fs::read_to_string(candidate.as_ref())?);

    let document_id = source_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    validate(&document_id, &source_doc, &candidate_doc, None, options)
}

/// Run a validator on tokio's blocking pool.
#[cfg(feature = "async")]
pub async fn validate_async(
    validator: Validator,
    document_id: String,
    source: Document,
    candidate: Document,
) -> Result<QualityVerdict> {
    tokio::task::spawn_blocking(move || validator.validate(&document_id, &source, &candidate))
        .await
        .map_err(|e| Error::Other(format!("validation task failed: {}", e)))?
}
