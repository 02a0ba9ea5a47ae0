//! The outcome of one validation run.

use super::CorrectionStats;
use crate::model::Document;
use crate::score::{StageKind, ValidationScore};
use crate::visual::DifferenceRegion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The aggregate met the threshold
    Passed,
    /// Every correction in the budget was used
    BudgetExhausted,
    /// Two consecutive passes scored (almost) the same
    Plateau,
    /// A correction phase applied nothing
    Stalled,
    /// Auto-correction is off or no provider is configured
    CorrectionDisabled,
    /// The run was cancelled
    Cancelled,
}

impl TerminationReason {
    /// Stable name used in reports.
    pub fn name(&self) -> &'static str {
        match self {
            TerminationReason::Passed => "passed",
            TerminationReason::BudgetExhausted => "budget_exhausted",
            TerminationReason::Plateau => "plateau",
            TerminationReason::Stalled => "stalled",
            TerminationReason::CorrectionDisabled => "correction_disabled",
            TerminationReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stage that could not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedStage {
    /// The stage
    pub stage: StageKind,
    /// Why it was skipped
    pub reason: String,
}

/// One scoring pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Pass number, starting at 0 for the unmodified candidate
    pub pass: u32,
    /// Aggregate score of the pass
    pub aggregate: f64,
    /// Whether the pass met the threshold
    pub passed: bool,
    /// Corrections applied before this pass, cumulative
    pub corrections_applied: u32,
}

/// Wall-clock span of one step of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    /// Step name: a stage name or "correction"
    pub step: String,
    /// Pass the step belongs to
    pub pass: u32,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
}

impl StageTiming {
    /// Duration in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Final verdict of a validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityVerdict {
    /// Unique id of the run
    pub run_id: String,

    /// Caller-supplied document id
    pub document_id: String,

    /// Source reference from the document metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,

    /// Weighted aggregate of the reported pass
    pub overall_score: f64,

    /// Whether the reported pass met the threshold without a hard failure
    pub passed: bool,

    /// Technical terms were lost outright
    pub content_loss: bool,

    /// Per-stage scores of the reported pass
    pub stages: Vec<ValidationScore>,

    /// Stages that could not run
    #[serde(default)]
    pub skipped_stages: Vec<SkippedStage>,

    /// Visual difference regions of the reported pass
    #[serde(default)]
    pub difference_regions: Vec<DifferenceRegion>,

    /// Diff visualizations written during the run
    #[serde(default)]
    pub diff_images: Vec<String>,

    /// Corrections applied over the whole run
    pub corrections_applied: u32,

    /// Detailed correction statistics
    #[serde(default)]
    pub correction_stats: CorrectionStats,

    /// Correction budget of the run
    pub budget: u32,

    /// Why the run stopped
    pub termination: TerminationReason,

    /// Every scoring pass in order
    #[serde(default)]
    pub iterations: Vec<IterationRecord>,

    /// Timeline of stages and correction phases
    #[serde(default)]
    pub processing_timeline: Vec<StageTiming>,

    /// Run-level issues (engine failures, skipped corrections)
    #[serde(default)]
    pub issues: Vec<String>,

    /// Corrected candidate, present only when corrections improved it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_document: Option<Document>,

    /// Run start
    pub started_at: DateTime<Utc>,

    /// Run end
    pub finished_at: DateTime<Utc>,
}

impl QualityVerdict {
    /// Score of a stage, if it ran.
    pub fn stage(&self, stage: StageKind) -> Option<&ValidationScore> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Check whether a stage was skipped.
    pub fn is_skipped(&self, stage: StageKind) -> bool {
        self.skipped_stages.iter().any(|s| s.stage == stage)
    }

    /// Number of scoring passes.
    pub fn pass_count(&self) -> usize {
        self.iterations.len()
    }

    /// All issues of all stages, prefixed with the stage name, then run issues.
    pub fn all_issues(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(|s| s.issues.iter().map(move |i| format!("[{}] {}", s.stage, i)))
            .chain(self.issues.iter().cloned())
            .collect()
    }

    /// Run duration in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
