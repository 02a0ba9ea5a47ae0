//! The validation run: score, decide, correct, rescore.

use super::{CancellationToken, ValidationOptions};
use crate::content::ContentValidator;
use crate::correction::{
    apply_correction, plan_corrections, ApplyOutcome, CallPool, CorrectionBudget, CorrectionProvider,
    PassReports,
};
use crate::error::{Error, Result};
use crate::model::{Document, Outline};
use crate::recognition::{RecognitionValidator, Recognizer, SourceRecognition};
use crate::report::{
    CorrectionStats, IterationRecord, QualityVerdict, SkippedStage, StageTiming, TerminationReason,
};
use crate::score::{StageKind, ValidationScore};
use crate::structure::{Embedder, StructuralComparator};
use crate::visual::{PageRenderer, VisualComparator};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_run_id() -> String {
    let n = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "run-{}-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S%3f"),
        std::process::id(),
        n
    )
}

/// Validates candidates against sources and drives bounded auto-correction.
///
/// Capabilities are plugged in with the `with_*` builders. Without a
/// recognizer the recognition stage is skipped; without bitmaps or a renderer
/// the visual stage is skipped; without a provider no correction is tried.
///
/// # Example
///
/// ```no_run
/// use docqa::{Document, TextLayerRecognizer, ValidationOptions, Validator};
///
/// let source = Document::from_markdown("# Setup\nConnect to the BMC over IPMI.");
/// let candidate = Document::from_markdown("# Setup\nConnect to the BMC over IPMI.");
///
/// let validator = Validator::new(ValidationOptions::default()).with_recognizer(TextLayerRecognizer::new());
/// let verdict = validator.validate("manual-01", &source, &candidate).unwrap();
/// println!("{:.3} {}", verdict.overall_score, verdict.passed);
/// ```
#[derive(Clone)]
pub struct Validator {
    options: ValidationOptions,
    recognition: RecognitionValidator,
    visual: VisualComparator,
    structure: StructuralComparator,
    content: ContentValidator,
    provider: Option<Arc<dyn CorrectionProvider>>,
    cancel: CancellationToken,
}

impl Validator {
    /// Create a validator with the built-in embedder and no other capabilities.
    pub fn new(options: ValidationOptions) -> Self {
        let mut recognition = options.recognition.clone();
        let mut visual = options.visual.clone();
        if !options.parallel {
            recognition.parallel = false;
            visual.parallel = false;
        }

        Self {
            recognition: RecognitionValidator::new(recognition),
            visual: VisualComparator::new(visual),
            structure: StructuralComparator::new(options.structure.clone()),
            content: ContentValidator::new(options.content.clone()),
            provider: None,
            cancel: CancellationToken::new(),
            options,
        }
    }

    /// Add a recognition engine.
    pub fn with_recognizer<R: Recognizer + 'static>(mut self, recognizer: R) -> Self {
        self.recognition.add_recognizer(Arc::new(recognizer));
        self
    }

    /// Add a shared recognition engine.
    pub fn add_recognizer(&mut self, recognizer: Arc<dyn Recognizer>) {
        self.recognition.add_recognizer(recognizer);
    }

    /// Render pages that carry no bitmap, and re-render corrected pages.
    pub fn with_renderer<R: PageRenderer + 'static>(mut self, renderer: R) -> Self {
        self.visual.set_renderer(Arc::new(renderer));
        self
    }

    /// Use a different embedding model for the structure stage.
    pub fn with_embedder<E: Embedder + 'static>(mut self, embedder: E) -> Self {
        self.structure.set_embedder(Arc::new(embedder));
        self
    }

    /// Set the correction provider.
    pub fn with_provider<P: CorrectionProvider + 'static>(mut self, provider: P) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Set a shared correction provider.
    pub fn set_provider(&mut self, provider: Arc<dyn CorrectionProvider>) {
        self.provider = Some(provider);
    }

    /// Use an existing cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels runs of this validator.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run options.
    pub fn options(&self) -> &ValidationOptions {
        &self.options
    }

    /// Validate a candidate against its source.
    pub fn validate(&self, document_id: &str, source: &Document, candidate: &Document) -> Result<QualityVerdict> {
        self.validate_with_structure(document_id, source, candidate, None)
    }

    /// Validate with an externally extracted candidate outline.
    ///
    /// The supplied outline is used until the first applied correction, after
    /// which the outline is reparsed from the corrected text.
    ///
    /// Only [`Error::InputMismatch`] and [`Error::Config`] escape; stage and
    /// provider failures are reported in the verdict.
    pub fn validate_with_structure(
        &self,
        document_id: &str,
        source: &Document,
        candidate: &Document,
        candidate_structure: Option<Outline>,
    ) -> Result<QualityVerdict> {
        self.options.validate()?;
        check_inputs(source, candidate, self.options.max_page_padding)?;

        let candidate = match candidate_structure {
            Some(outline) => candidate.clone().with_outline(outline),
            None => candidate.clone(),
        };

        Run::new(self, document_id, source, candidate).execute()
    }
}

/// Reject inputs no pass could compare.
fn check_inputs(source: &Document, candidate: &Document, max_padding: Option<usize>) -> Result<()> {
    if source.is_empty() || source.pages.iter().all(|p| p.is_empty()) {
        return Err(Error::InputMismatch("source document is empty".to_string()));
    }

    for (side, doc) in [("source", source), ("candidate", candidate)] {
        for page in &doc.pages {
            if let Some((w, h)) = page.dimensions() {
                if w == 0 || h == 0 {
                    return Err(Error::InputMismatch(format!(
                        "{} page {} has a zero-sized bitmap",
                        side, page.number
                    )));
                }
            }
        }
    }

    if let Some(max) = max_padding {
        let diff = source.page_count().abs_diff(candidate.page_count());
        if diff > max {
            return Err(Error::InputMismatch(format!(
                "page counts differ by {} (source {}, candidate {}), at most {} can be padded",
                diff,
                source.page_count(),
                candidate.page_count(),
                max
            )));
        }
    }
    Ok(())
}

fn timed<T>(step: &str, pass: u32, f: impl FnOnce() -> T) -> (T, StageTiming) {
    let started_at = Utc::now();
    let value = f();
    let timing = StageTiming {
        step: step.to_string(),
        pass,
        started_at,
        finished_at: Utc::now(),
    };
    (value, timing)
}

/// Turn a stage error into a skipped stage; fatal errors propagate.
fn stage_outcome<T>(stage: StageKind, result: Result<T>, skipped: &mut Vec<SkippedStage>) -> Result<Option<T>> {
    match result {
        Ok(report) => Ok(Some(report)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            let reason = match e {
                Error::StageUnavailable { reason, .. } => reason,
                other => other.to_string(),
            };
            log::warn!("{} stage skipped: {}", stage, reason);
            skipped.push(SkippedStage { stage, reason });
            Ok(None)
        }
    }
}

enum RunState {
    Scoring,
    Deciding,
    Correcting,
    Rescoring,
    Done(TerminationReason),
}

/// How a correction phase ended.
enum PhaseOutcome {
    /// The candidate changed
    Applied,
    /// Every answer repeated its snippet; the candidate is as it was
    Unchanged,
    /// Nothing was planned or every request was discarded
    Nothing,
    Cancelled,
}

/// Everything one scoring pass produced.
struct ScoredPass {
    index: u32,
    reports: PassReports,
    scores: Vec<ValidationScore>,
    skipped: Vec<SkippedStage>,
    aggregate: f64,
    passed: bool,
    content_loss: bool,
    corrections_applied: u32,
    candidate: Document,
}

struct Run<'a> {
    validator: &'a Validator,
    run_id: String,
    document_id: String,
    source: &'a Document,
    candidate: Document,
    recognized: std::result::Result<SourceRecognition, String>,
    budget: CorrectionBudget,
    stats: CorrectionStats,
    calls: Option<CallPool>,
    passes: Vec<ScoredPass>,
    timeline: Vec<StageTiming>,
    issues: Vec<String>,
    diff_images: Vec<String>,
    started_at: DateTime<Utc>,
}

impl<'a> Run<'a> {
    fn new(validator: &'a Validator, document_id: &str, source: &'a Document, candidate: Document) -> Self {
        let started_at = Utc::now();
        let run_id = next_run_id();
        log::info!(
            "run {} for '{}': {} source page(s), {} candidate page(s)",
            run_id,
            document_id,
            source.page_count(),
            candidate.page_count()
        );

        // The source never changes, so its recognition runs once per run
        let (recognized, timing) = timed("source_recognition", 0, || {
            validator.recognition.recognize_source(source).map_err(|e| match e {
                Error::StageUnavailable { reason, .. } => reason,
                other => other.to_string(),
            })
        });

        Self {
            validator,
            run_id,
            document_id: document_id.to_string(),
            source,
            candidate,
            recognized,
            budget: CorrectionBudget::new(validator.options.correction_budget),
            stats: CorrectionStats::new(),
            calls: None,
            passes: Vec::new(),
            timeline: vec![timing],
            issues: Vec::new(),
            diff_images: Vec::new(),
            started_at,
        }
    }

    fn execute(mut self) -> Result<QualityVerdict> {
        let mut state = RunState::Scoring;
        let termination = loop {
            state = match state {
                RunState::Scoring => {
                    self.score_pass()?;
                    RunState::Deciding
                }
                RunState::Deciding => match self.decide() {
                    Some(reason) => RunState::Done(reason),
                    None => RunState::Correcting,
                },
                RunState::Correcting => match self.correct() {
                    PhaseOutcome::Applied => RunState::Rescoring,
                    // Rescoring an identical candidate would score the same
                    PhaseOutcome::Unchanged => RunState::Done(TerminationReason::Plateau),
                    PhaseOutcome::Nothing => RunState::Done(TerminationReason::Stalled),
                    PhaseOutcome::Cancelled => RunState::Done(TerminationReason::Cancelled),
                },
                RunState::Rescoring => {
                    log::debug!("rescoring after {} correction(s)", self.stats.applied);
                    self.score_pass()?;
                    RunState::Deciding
                }
                RunState::Done(reason) => break reason,
            };
        };
        self.finish(termination)
    }

    /// Run the four stages on the current candidate.
    fn score_pass(&mut self) -> Result<()> {
        let index = self.passes.len() as u32;
        let v = self.validator;
        let source = self.source;
        let candidate = &self.candidate;
        let recognized = &self.recognized;

        let recognition = || {
            timed(StageKind::Recognition.name(), index, || match recognized {
                Ok(r) => v.recognition.validate(r, candidate),
                Err(reason) => Err(Error::stage_unavailable(StageKind::Recognition, reason.clone())),
            })
        };
        let visual = || timed(StageKind::Visual.name(), index, || v.visual.compare(source, candidate));
        let structure = || {
            timed(StageKind::Structure.name(), index, || {
                v.structure.compare(&source.outline, &candidate.outline)
            })
        };
        let content = || timed(StageKind::Content.name(), index, || v.content.validate(source, candidate));

        let (((recognition, t_rec), (visual, t_vis)), ((structure, t_str), (content, t_con))) =
            if v.options.parallel {
                rayon::join(
                    || rayon::join(recognition, visual),
                    || rayon::join(structure, content),
                )
            } else {
                ((recognition(), visual()), (structure(), content()))
            };
        self.timeline.extend([t_rec, t_vis, t_str, t_con]);

        let mut skipped = Vec::new();
        let recognition = stage_outcome(StageKind::Recognition, recognition, &mut skipped)?;
        let visual = stage_outcome(StageKind::Visual, visual, &mut skipped)?;
        let structure = stage_outcome(StageKind::Structure, structure, &mut skipped)?;

        let mut scores = Vec::with_capacity(4);
        scores.extend(recognition.as_ref().map(|r| r.score.clone()));
        scores.extend(visual.as_ref().map(|r| r.score.clone()));
        scores.extend(structure.as_ref().map(|r| r.score.clone()));
        scores.push(content.score.clone());

        let content_loss = content.content_loss;
        let mut aggregate = v.options.weights.aggregate(scores.iter().map(|s| (s.stage, &s.score)));
        if content_loss {
            aggregate = aggregate.min(v.options.content_loss_cap);
        }
        let passed = aggregate >= v.options.aggregate_threshold && !content_loss;

        if let (Some(dir), Some(report)) = (&v.visual.options().diff_dir, &visual) {
            let dir = dir.join(&self.run_id).join(format!("pass-{}", index));
            let written = v.visual.write_diff_images(report, &dir);
            self.diff_images
                .extend(written.iter().map(|p| p.display().to_string()));
        }

        log::info!(
            "pass {}: aggregate {:.3} ({}){}",
            index,
            aggregate,
            if passed { "passed" } else { "failed" },
            if content_loss { ", content loss" } else { "" }
        );

        self.passes.push(ScoredPass {
            index,
            reports: PassReports {
                recognition,
                visual,
                structure,
                content: Some(content),
            },
            scores,
            skipped,
            aggregate,
            passed,
            content_loss,
            corrections_applied: self.stats.applied,
            candidate: self.candidate.clone(),
        });
        Ok(())
    }

    /// `None` means: go correct.
    fn decide(&self) -> Option<TerminationReason> {
        let Some(current) = self.passes.last() else {
            return Some(TerminationReason::Stalled);
        };
        let opts = &self.validator.options;

        if current.passed {
            return Some(TerminationReason::Passed);
        }
        if self.validator.cancel.is_cancelled() {
            return Some(TerminationReason::Cancelled);
        }
        if !opts.enable_auto_correction || self.validator.provider.is_none() {
            return Some(TerminationReason::CorrectionDisabled);
        }
        if self.budget.is_exhausted() {
            return Some(TerminationReason::BudgetExhausted);
        }
        if let [.., previous, _] = self.passes.as_slice() {
            let delta = (current.aggregate - previous.aggregate).abs();
            if delta < opts.plateau_epsilon {
                log::info!("plateau: aggregate moved by {:.4}", delta);
                return Some(TerminationReason::Plateau);
            }
        }
        None
    }

    /// Plan corrections for the last pass and apply them one at a time.
    fn correct(&mut self) -> PhaseOutcome {
        let v = self.validator;
        let opts = &v.options.correction;
        let Some(provider) = v.provider.clone() else {
            return PhaseOutcome::Nothing;
        };
        let Some(pass) = self.passes.last() else {
            return PhaseOutcome::Nothing;
        };
        let pass_index = pass.index;
        let requests = plan_corrections(&pass.reports, self.source, &self.candidate, opts, self.budget.remaining());
        if requests.is_empty() {
            log::info!("pass {}: no actionable corrections", pass_index);
            return PhaseOutcome::Nothing;
        }

        if self.calls.is_none() {
            match CallPool::new(opts.max_workers) {
                Ok(pool) => self.calls = Some(pool),
                Err(e) => {
                    self.issues.push(format!("corrections skipped: {}", e));
                    return PhaseOutcome::Nothing;
                }
            }
        }
        let Some(calls) = self.calls.as_ref() else {
            return PhaseOutcome::Nothing;
        };

        log::debug!("pass {}: {} correction request(s)", pass_index, requests.len());
        let started_at = Utc::now();
        let policy = opts.retry_policy();
        let mut phase = CorrectionStats::new();
        let mut cancelled = false;

        for request in &requests {
            if v.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if self.budget.is_exhausted() {
                break;
            }
            phase.requested += 1;

            let response = match calls.call(&provider, request, &policy, &v.cancel) {
                Ok(response) => response,
                Err(e) => {
                    phase.provider_failures += 1;
                    self.issues
                        .push(format!("{} correction skipped: {}", request.kind, e));
                    continue;
                }
            };
            if response.confidence < opts.min_confidence {
                log::debug!(
                    "discarding {} correction with confidence {:.2}",
                    request.kind,
                    response.confidence
                );
                phase.low_confidence += 1;
                continue;
            }

            let outcome = apply_correction(&self.candidate, request, &response, opts.max_word_loss);
            if outcome.consumes_budget() {
                self.budget.consume();
            }
            match outcome {
                ApplyOutcome::Applied(updated) => {
                    phase.applied += 1;
                    self.candidate = self.rerender_changed(updated);
                }
                ApplyOutcome::Unchanged => phase.unchanged += 1,
                ApplyOutcome::SnippetNotFound | ApplyOutcome::PageNotFound => {
                    log::debug!("{} correction target no longer present", request.kind);
                    phase.not_found += 1;
                }
                ApplyOutcome::Reverted { before, after } => {
                    phase.reverted += 1;
                    self.issues.push(format!(
                        "{} correction reverted: page would shrink from {} to {} words",
                        request.kind, before, after
                    ));
                }
            }
        }

        log::debug!(
            "pass {}: {} applied, {} unchanged, {} discarded",
            pass_index,
            phase.applied,
            phase.unchanged,
            phase.discarded()
        );
        self.stats.merge(&phase);

        self.timeline.push(StageTiming {
            step: "correction".to_string(),
            pass: pass_index,
            started_at,
            finished_at: Utc::now(),
        });

        if cancelled {
            PhaseOutcome::Cancelled
        } else if phase.applied > 0 {
            PhaseOutcome::Applied
        } else if phase.unchanged > 0 {
            PhaseOutcome::Unchanged
        } else {
            PhaseOutcome::Nothing
        }
    }

    /// Re-render pages whose text changed, if a renderer is available.
    fn rerender_changed(&self, mut updated: Document) -> Document {
        let Some(renderer) = self.validator.visual.renderer() else {
            return updated;
        };
        for (i, page) in updated.pages.iter_mut().enumerate() {
            let changed = self.candidate.pages.get(i).map_or(true, |old| old.text != page.text);
            if !changed {
                continue;
            }
            match renderer.render(page) {
                Ok(bitmap) => page.bitmap = Some(Arc::new(bitmap)),
                Err(e) => log::warn!("re-rendering page {} failed, keeping old bitmap: {}", page.number, e),
            }
        }
        updated
    }

    fn finish(self, termination: TerminationReason) -> Result<QualityVerdict> {
        // A cancelled run reports the last complete pass, others the best one
        let reported = if termination == TerminationReason::Cancelled {
            self.passes.len().checked_sub(1)
        } else {
            self.passes
                .iter()
                .enumerate()
                .fold(None, |best: Option<(usize, f64)>, (i, p)| match best {
                    Some((_, score)) if score >= p.aggregate => best,
                    _ => Some((i, p.aggregate)),
                })
                .map(|(i, _)| i)
        };
        let (Some(reported), Some(first)) = (reported, self.passes.first()) else {
            return Err(Error::Other("no scoring pass completed".to_string()));
        };
        let pass = &self.passes[reported];

        let corrected_document =
            (reported > 0 && pass.aggregate > first.aggregate).then(|| pass.candidate.clone());
        let difference_regions = pass
            .reports
            .visual
            .as_ref()
            .map(|r| r.regions().cloned().collect())
            .unwrap_or_default();
        let iterations = self
            .passes
            .iter()
            .map(|p| IterationRecord {
                pass: p.index,
                aggregate: p.aggregate,
                passed: p.passed,
                corrections_applied: p.corrections_applied,
            })
            .collect();

        log::info!(
            "run {} finished ({}): score {:.3}, {}, {} correction(s) over {} pass(es)",
            self.run_id,
            termination,
            pass.aggregate,
            if pass.passed { "passed" } else { "failed" },
            self.stats.applied,
            self.passes.len()
        );

        Ok(QualityVerdict {
            run_id: self.run_id.clone(),
            document_id: self.document_id.clone(),
            source_ref: self.source.metadata.source_ref.clone(),
            overall_score: pass.aggregate,
            passed: pass.passed,
            content_loss: pass.content_loss,
            stages: pass.scores.clone(),
            skipped_stages: pass.skipped.clone(),
            difference_regions,
            diff_images: self.diff_images.clone(),
            corrections_applied: self.stats.applied,
            correction_stats: self.stats,
            budget: self.budget.limit() as u32,
            termination,
            iterations,
            processing_timeline: self.timeline.clone(),
            issues: self.issues.clone(),
            corrected_document,
            started_at: self.started_at,
            finished_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Page;
    use image::GrayImage;

    #[test]
    fn test_run_ids_are_unique() {
        let a = next_run_id();
        let b = next_run_id();
        assert_ne!(a, b);
        assert!(a.starts_with("run-"));
    }

    #[test]
    fn test_empty_source_rejected() {
        let source = Document::new();
        let candidate = Document::from_markdown("# Title");
        let err = check_inputs(&source, &candidate, None).unwrap_err();
        assert!(matches!(err, Error::InputMismatch(_)));

        let blank = Document::from_markdown("   ");
        assert!(check_inputs(&blank, &candidate, None).is_err());
    }

    #[test]
    fn test_zero_sized_bitmap_rejected() {
        let source = Document::from_pages(vec![Page::new(1, "text").with_bitmap(GrayImage::new(0, 10))]);
        let candidate = Document::from_markdown("text");
        assert!(matches!(check_inputs(&source, &candidate, None), Err(Error::InputMismatch(_))));
    }

    #[test]
    fn test_page_padding_limit() {
        let source = Document::from_markdown("a\u{000C}b\u{000C}c");
        let candidate = Document::from_markdown("a");
        assert!(check_inputs(&source, &candidate, None).is_ok());
        assert!(check_inputs(&source, &candidate, Some(2)).is_ok());
        assert!(check_inputs(&source, &candidate, Some(1)).is_err());
    }

    #[test]
    fn test_config_error_escapes() {
        let source = Document::from_markdown("# A");
        let validator = Validator::new(ValidationOptions::new().with_aggregate_threshold(2.0));
        assert!(matches!(validator.validate("d", &source, &source), Err(Error::Config(_))));
    }

    #[test]
    fn test_skipped_stages_recorded() {
        let source = Document::from_markdown("# Setup\nUse ipmitool over IPMI to read the BMC fan sensor.");
        let verdict = Validator::new(ValidationOptions::default())
            .validate("d", &source, &source)
            .unwrap();

        // No recognizer and no bitmaps
        assert!(verdict.is_skipped(StageKind::Recognition));
        assert!(verdict.is_skipped(StageKind::Visual));
        assert!(verdict.passed);
        assert_eq!(verdict.overall_score, 1.0);
        assert_eq!(verdict.termination, TerminationReason::Passed);
        assert_eq!(verdict.stages.len(), 2);
    }
}
