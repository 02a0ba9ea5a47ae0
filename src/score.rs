//! Per-stage scores.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four scoring stages of the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Recognition consensus across OCR engines
    Recognition,
    /// Visual fidelity (SSIM and difference regions)
    Visual,
    /// Outline structure and semantics
    Structure,
    /// Technical content and markup
    Content,
}

impl StageKind {
    /// All stages in cascade order.
    pub const ALL: [StageKind; 4] = [
        StageKind::Recognition,
        StageKind::Visual,
        StageKind::Structure,
        StageKind::Content,
    ];

    /// Stable lowercase name used in reports.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Recognition => "recognition",
            StageKind::Visual => "visual",
            StageKind::Structure => "structure",
            StageKind::Content => "content",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named score in [0, 1] with free-text diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationScore {
    /// Stage that produced the score
    pub stage: StageKind,

    /// Score in [0, 1]
    pub score: f64,

    /// Threshold the score was judged against
    pub threshold: f64,

    /// Whether the stage passed on its own
    pub passed: bool,

    /// Issue descriptions (diagnostics, not errors)
    pub issues: Vec<String>,
}

impl ValidationScore {
    /// Create a score, clamping it to [0, 1] and judging it against `threshold`.
    pub fn new(stage: StageKind, score: f64, threshold: f64) -> Self {
        let score = clamp_unit(score);
        Self {
            stage,
            score,
            threshold,
            passed: score >= threshold,
            issues: Vec::new(),
        }
    }

    /// Append an issue.
    pub fn add_issue(&mut self, issue: impl Into<String>) {
        self.issues.push(issue.into());
    }

    /// Append several issues.
    pub fn extend_issues<I, S>(&mut self, issues: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issues.extend(issues.into_iter().map(Into::into));
    }

    /// Mark the stage failed regardless of its score.
    pub fn fail(&mut self) {
        self.passed = false;
    }

    /// Check whether any issues were recorded.
    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// Clamp a value to [0, 1], mapping NaN to 0.
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Arithmetic mean, `None` for an empty slice.
pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
