//! Correction statistics collected during a run.

use serde::{Deserialize, Serialize};

/// What happened to the correction requests of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionStats {
    /// Requests sent to the provider
    pub requested: u32,

    /// Corrections applied to the candidate
    pub applied: u32,

    /// Responses identical to the original snippet
    pub unchanged: u32,

    /// Responses discarded for low confidence
    pub low_confidence: u32,

    /// Requests whose provider calls all failed
    pub provider_failures: u32,

    /// Snippet or page no longer present in the candidate
    pub not_found: u32,

    /// Corrections reverted for removing too much text
    pub reverted: u32,
}

impl CorrectionStats {
    /// Create new empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that consumed budget.
    pub fn budget_consumed(&self) -> u32 {
        self.applied + self.unchanged
    }

    /// Requests that were dropped without touching the budget.
    pub fn discarded(&self) -> u32 {
        self.low_confidence + self.provider_failures + self.not_found + self.reverted
    }

    /// Merge statistics from another run or pass.
    pub fn merge(&mut self, other: &CorrectionStats) {
        self.requested += other.requested;
        self.applied += other.applied;
        self.unchanged += other.unchanged;
        self.low_confidence += other.low_confidence;
        self.provider_failures += other.provider_failures;
        self.not_found += other.not_found;
        self.reverted += other.reverted;
    }
}
