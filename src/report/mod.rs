//! Verdicts and the audit trail.
//!
//! A [`QualityVerdict`] is the only artifact that outlives a run. It
//! serializes to JSON ([`to_json`]) and is persisted per run id by the
//! [`AuditStore`].

mod audit;
mod json;
mod stats;
mod verdict;

pub use audit::AuditStore;
pub use json::{from_json, to_json, JsonFormat};
pub use stats::CorrectionStats;
pub use verdict::{IterationRecord, QualityVerdict, SkippedStage, StageTiming, TerminationReason};
