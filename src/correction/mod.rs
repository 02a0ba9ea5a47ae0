//! Typed correction requests and the provider capability.
//!
//! The orchestrator turns stage issues into [`CorrectionRequest`]s
//! ([`plan_corrections`]), sends them to a [`CorrectionProvider`]
//! on a bounded [`CallPool`] and applies accepted answers one at a time
//! ([`apply_correction`]).

mod apply;
mod budget;
mod call;
mod planner;

pub use apply::{apply_correction, ApplyOutcome};
pub use budget::CorrectionBudget;
pub use call::{CallPool, RetryPolicy};
pub use planner::{plan_corrections, PassReports};

use crate::error::Result;
use crate::model::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a correction is meant to fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    /// Text disagrees with the recognizer consensus
    Recognition,
    /// Headings or links are wrong
    Structure,
    /// Technical terms or code blocks were lost
    ContentFidelity,
    /// Markup is malformed or the layout drifted
    Formatting,
}

impl CorrectionKind {
    /// Lower runs first.
    pub fn priority(&self) -> u8 {
        match self {
            CorrectionKind::ContentFidelity => 0,
            CorrectionKind::Structure => 1,
            CorrectionKind::Recognition => 2,
            CorrectionKind::Formatting => 3,
        }
    }

    /// Stable name used in reports.
    pub fn name(&self) -> &'static str {
        match self {
            CorrectionKind::Recognition => "recognition",
            CorrectionKind::Structure => "structure",
            CorrectionKind::ContentFidelity => "content_fidelity",
            CorrectionKind::Formatting => "formatting",
        }
    }
}

impl fmt::Display for CorrectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where in the candidate a correction applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CorrectionTarget {
    /// A whole page
    Page {
        /// Page number (1-indexed)
        page: u32,
    },
    /// A rectangle on a page bitmap
    Region {
        /// Page number (1-indexed)
        page: u32,
        /// Left edge
        x: u32,
        /// Top edge
        y: u32,
        /// Width
        width: u32,
        /// Height
        height: u32,
    },
    /// An outline node of the candidate
    Node {
        /// Node id in the candidate outline
        node: NodeId,
        /// Page the node sits on
        page: Option<u32>,
    },
}

impl CorrectionTarget {
    /// Page the target lives on, if known.
    pub fn page(&self) -> Option<u32> {
        match self {
            CorrectionTarget::Page { page } | CorrectionTarget::Region { page, .. } => Some(*page),
            CorrectionTarget::Node { page, .. } => *page,
        }
    }
}

/// A request sent to the correction provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRequest {
    /// What to fix
    pub kind: CorrectionKind,

    /// Where to fix it
    pub target: CorrectionTarget,

    /// Exact candidate text to be replaced
    pub original_snippet: String,

    /// Score of the stage that raised the request
    pub confidence: f64,

    /// Free-text hint for the provider
    pub instruction: String,
}

impl CorrectionRequest {
    /// Create a request.
    pub fn new(
        kind: CorrectionKind,
        target: CorrectionTarget,
        original_snippet: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            kind,
            target,
            original_snippet: original_snippet.into(),
            confidence: confidence.clamp(0.0, 1.0),
            instruction: String::new(),
        }
    }

    /// Set the instruction hint.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }
}

/// The provider's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResponse {
    /// Replacement for the original snippet
    pub corrected_snippet: String,

    /// Provider's confidence in [0, 1]
    pub confidence: f64,
}

impl CorrectionResponse {
    /// Create a response.
    pub fn new(corrected_snippet: impl Into<String>, confidence: f64) -> Self {
        Self {
            corrected_snippet: corrected_snippet.into(),
            confidence,
        }
    }
}

/// An external service that rewrites snippets.
///
/// Calls run on a worker thread with a timeout, so implementations may block.
pub trait CorrectionProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str {
        "provider"
    }

    /// Produce a corrected snippet for the request.
    fn correct(&self, request: &CorrectionRequest) -> Result<CorrectionResponse>;
}

/// Options for the correction loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionOptions {
    /// Responses below this confidence are discarded
    pub min_confidence: f64,

    /// Provider attempts per request
    pub max_attempts: u32,

    /// Delay before the second attempt, doubled for each further one
    pub backoff_ms: u64,

    /// Per-call timeout
    pub call_timeout_ms: u64,

    /// Corrections removing a larger share of the page's words are reverted
    pub max_word_loss: f64,

    /// Worker threads for provider calls; a hung provider holds at most this many
    pub max_workers: usize,

    /// Generate recognition corrections
    pub recognition: bool,

    /// Generate structure corrections
    pub structure: bool,

    /// Generate content-fidelity corrections
    pub content: bool,

    /// Generate formatting corrections
    pub formatting: bool,
}

impl CorrectionOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum accepted confidence.
    pub fn with_min_confidence(mut self, confidence: f64) -> Self {
        self.min_confidence = confidence;
        self
    }

    /// Set the retry policy.
    pub fn with_retries(mut self, max_attempts: u32, backoff_ms: u64) -> Self {
        self.max_attempts = max_attempts;
        self.backoff_ms = backoff_ms;
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.call_timeout_ms = timeout_ms;
        self
    }

    /// Set the number of provider worker threads.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Enable or disable one kind of correction.
    pub fn with_kind(mut self, kind: CorrectionKind, enabled: bool) -> Self {
        match kind {
            CorrectionKind::Recognition => self.recognition = enabled,
            CorrectionKind::Structure => self.structure = enabled,
            CorrectionKind::ContentFidelity => self.content = enabled,
            CorrectionKind::Formatting => self.formatting = enabled,
        }
        self
    }

    /// Whether a kind of correction is enabled.
    pub fn is_enabled(&self, kind: CorrectionKind) -> bool {
        match kind {
            CorrectionKind::Recognition => self.recognition,
            CorrectionKind::Structure => self.structure,
            CorrectionKind::ContentFidelity => self.content,
            CorrectionKind::Formatting => self.formatting,
        }
    }

    /// Retry policy derived from these options.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff: std::time::Duration::from_millis(self.backoff_ms),
            timeout: std::time::Duration::from_millis(self.call_timeout_ms),
        }
    }
}

impl Default for CorrectionOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            max_attempts: 3,
            backoff_ms: 500,
            call_timeout_ms: 45_000,
            max_word_loss: 0.3,
            max_workers: 2,
            recognition: true,
            structure: true,
            content: true,
            formatting: true,
        }
    }
}
