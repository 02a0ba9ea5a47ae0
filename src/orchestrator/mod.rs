//! Cascade orchestration.
//!
//! A run scores the candidate with all four stages at once, decides whether
//! it passes, and otherwise asks the correction provider for fixes until the
//! candidate passes, the budget runs out, or the score stops moving.

mod cancel;
mod engine;
mod options;

pub use cancel::CancellationToken;
pub use engine::Validator;
pub use options::{StageWeights, ValidationOptions};
