//! Error types for the docqa library.

use crate::score::StageKind;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for docqa operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during validation and correction.
///
/// Only [`Error::InputMismatch`] (and [`Error::Config`] for invalid options)
/// escapes a validation run. Other variants are caught inside the engine and
/// reported as issues or skipped stages and corrections.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error when reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Source and candidate cannot be compared, even with page padding.
    #[error("Input mismatch: {0}")]
    InputMismatch(String),

    /// A scoring stage's dependency could not be reached.
    #[error("Stage {stage} unavailable: {reason}")]
    StageUnavailable {
        /// The stage that had to be skipped
        stage: StageKind,
        /// Why it was skipped
        reason: String,
    },

    /// A recognition engine failed on a page.
    #[error("Recognizer '{engine}' failed: {reason}")]
    Recognizer {
        /// Engine name
        engine: String,
        /// Failure description
        reason: String,
    },

    /// The embedding backend failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The page renderer failed.
    #[error("Render error: {0}")]
    Render(String),

    /// The correction provider returned an error.
    #[error("Correction provider error: {0}")]
    CorrectionProvider(String),

    /// An external call did not answer in time.
    #[error("External call timed out after {0:?}")]
    Timeout(Duration),

    /// Error decoding or encoding images.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Error serializing or parsing a report.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid option values.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a [`Error::StageUnavailable`] for the given stage.
    pub fn stage_unavailable(stage: StageKind, reason: impl Into<String>) -> Self {
        Error::StageUnavailable {
            stage,
            reason: reason.into(),
        }
    }

    /// Whether this error aborts a validation run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InputMismatch(_))
    }
}
