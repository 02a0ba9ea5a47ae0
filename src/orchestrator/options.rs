//! Run-level options.

use crate::content::ContentOptions;
use crate::correction::CorrectionOptions;
use crate::error::{Error, Result};
use crate::recognition::RecognitionOptions;
use crate::score::StageKind;
use crate::structure::StructureOptions;
use crate::visual::VisualOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Weights of the four stages in the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageWeights {
    /// Recognition consensus
    pub recognition: f64,
    /// Visual fidelity
    pub visual: f64,
    /// Outline structure
    pub structure: f64,
    /// Technical content
    pub content: f64,
}

impl StageWeights {
    /// Equal weights.
    pub fn equal() -> Self {
        Self::default()
    }

    /// Weight of a stage.
    pub fn weight(&self, stage: StageKind) -> f64 {
        match stage {
            StageKind::Recognition => self.recognition,
            StageKind::Visual => self.visual,
            StageKind::Structure => self.structure,
            StageKind::Content => self.content,
        }
    }

    /// Set the weight of a stage.
    pub fn with(mut self, stage: StageKind, weight: f64) -> Self {
        match stage {
            StageKind::Recognition => self.recognition = weight,
            StageKind::Visual => self.visual = weight,
            StageKind::Structure => self.structure = weight,
            StageKind::Content => self.content = weight,
        }
        self
    }

    /// Weighted mean of the given scores, renormalized over the stages present.
    ///
    /// Returns 0 when no present stage carries weight.
    pub fn aggregate<'a, I>(&self, scores: I) -> f64
    where
        I: IntoIterator<Item = (StageKind, &'a f64)>,
    {
        let (sum, weight_sum) = scores.into_iter().fold((0.0, 0.0), |(sum, ws), (stage, score)| {
            let w = self.weight(stage);
            (sum + w * score, ws + w)
        });
        if weight_sum > 0.0 {
            sum / weight_sum
        } else {
            0.0
        }
    }
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            recognition: 0.25,
            visual: 0.25,
            structure: 0.25,
            content: 0.25,
        }
    }
}

/// Options for a validation run.
///
/// Every field has a default, so a JSON options file only needs the values
/// it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationOptions {
    /// Recognition stage
    pub recognition: RecognitionOptions,

    /// Visual stage
    pub visual: VisualOptions,

    /// Structure stage
    pub structure: StructureOptions,

    /// Content stage
    pub content: ContentOptions,

    /// Correction loop
    pub correction: CorrectionOptions,

    /// Stage weights in the aggregate
    pub weights: StageWeights,

    /// Aggregate score required to pass
    pub aggregate_threshold: f64,

    /// Corrections allowed per run
    pub correction_budget: usize,

    /// Run the correction loop when the first pass fails
    pub enable_auto_correction: bool,

    /// Aggregate change below which two passes count as a plateau
    pub plateau_epsilon: f64,

    /// Aggregate ceiling when technical content was lost
    pub content_loss_cap: f64,

    /// Largest tolerated page-count difference (none = unlimited)
    pub max_page_padding: Option<usize>,

    /// Run stages and per-page work in parallel
    pub parallel: bool,
}

impl ValidationOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let options: Self = serde_json::from_str(&data)?;
        options.validate()?;
        Ok(options)
    }

    /// Set the recognition threshold.
    pub fn with_recognition_threshold(mut self, threshold: f64) -> Self {
        self.recognition.threshold = threshold;
        self
    }

    /// Set the visual threshold.
    pub fn with_visual_threshold(mut self, threshold: f64) -> Self {
        self.visual.threshold = threshold;
        self
    }

    /// Set the structure threshold.
    pub fn with_structural_threshold(mut self, threshold: f64) -> Self {
        self.structure.threshold = threshold;
        self
    }

    /// Set the content threshold.
    pub fn with_content_threshold(mut self, threshold: f64) -> Self {
        self.content.threshold = threshold;
        self
    }

    /// Set the aggregate threshold.
    pub fn with_aggregate_threshold(mut self, threshold: f64) -> Self {
        self.aggregate_threshold = threshold;
        self
    }

    /// Set the correction budget.
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.correction_budget = budget;
        self
    }

    /// Enable or disable auto-correction.
    pub fn with_auto_correction(mut self, enabled: bool) -> Self {
        self.enable_auto_correction = enabled;
        self
    }

    /// Set the stage weights.
    pub fn with_weights(mut self, weights: StageWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Set the correction options.
    pub fn with_correction(mut self, correction: CorrectionOptions) -> Self {
        self.correction = correction;
        self
    }

    /// Limit the page-count difference between source and candidate.
    pub fn with_max_page_padding(mut self, pages: usize) -> Self {
        self.max_page_padding = Some(pages);
        self
    }

    /// Disable parallel processing everywhere.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self.recognition.parallel = false;
        self.visual.parallel = false;
        self
    }

    /// Check that the values make sense.
    pub fn validate(&self) -> Result<()> {
        let unit = [
            ("recognition.threshold", self.recognition.threshold),
            ("visual.threshold", self.visual.threshold),
            ("structure.threshold", self.structure.threshold),
            ("content.threshold", self.content.threshold),
            ("aggregate_threshold", self.aggregate_threshold),
            ("content_loss_cap", self.content_loss_cap),
            ("correction.min_confidence", self.correction.min_confidence),
            ("correction.max_word_loss", self.correction.max_word_loss),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be in [0, 1], got {}", name, value)));
            }
        }

        let weights = [
            self.weights.recognition,
            self.weights.visual,
            self.weights.structure,
            self.weights.content,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::Config("stage weights must be non-negative".to_string()));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(Error::Config("at least one stage weight must be positive".to_string()));
        }
        if !(self.plateau_epsilon >= 0.0) {
            return Err(Error::Config("plateau_epsilon must be non-negative".to_string()));
        }
        Ok(())
    }
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            recognition: RecognitionOptions::default(),
            visual: VisualOptions::default(),
            structure: StructureOptions::default(),
            content: ContentOptions::default(),
            correction: CorrectionOptions::default(),
            weights: StageWeights::default(),
            aggregate_threshold: 0.85,
            correction_budget: 10,
            enable_auto_correction: true,
            plateau_epsilon: 0.01,
            content_loss_cap: 0.5,
            max_page_padding: None,
            parallel: true,
        }
    }
}
