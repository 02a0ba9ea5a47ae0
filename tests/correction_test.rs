//! Integration tests for the auto-correction loop.

mod common;

use common::*;
use docqa::{
    CancellationToken, CorrectionKind, CorrectionOptions, CorrectionProvider, CorrectionRequest,
    CorrectionResponse, Document, StageKind, StageWeights, TerminationReason, ValidationOptions,
    Validator,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const USAGE: &str = "## Usage\nRun ipmitool sensor list to read every voltage.\n";
const LIMITS: &str = "## Limits\nThe firmware caps fan power at boot.\n";

fn options() -> ValidationOptions {
    ValidationOptions::default().with_correction(CorrectionOptions::default().with_retries(3, 0))
}

/// Source and a candidate whose second-level headings lost their space.
fn squashed_headings(pages: &[&str]) -> (Document, Document) {
    let source = pages.join("\u{000C}");
    let candidate = source.replace("## ", "##");
    (Document::from_markdown(&source), Document::from_markdown(&candidate))
}

fn fix_headings(request: &CorrectionRequest) -> CorrectionResponse {
    let fixed = request
        .original_snippet
        .replace("##Setup", "## Setup")
        .replace("##Usage", "## Usage")
        .replace("##Limits", "## Limits");
    CorrectionResponse::new(fixed, 0.9)
}

fn structure_only() -> ValidationOptions {
    let weights = StageWeights {
        recognition: 0.0,
        visual: 0.0,
        structure: 1.0,
        content: 0.0,
    };
    options().with_weights(weights)
}

#[test]
fn test_correction_repairs_candidate() {
    let (source, candidate) = squashed_headings(&[GUIDE]);
    let provider = Arc::new(ReplacingProvider::new("##Setup", "## Setup", 0.95));
    let mut validator = Validator::new(options());
    validator.set_provider(provider.clone());

    let verdict = validator.validate("guide", &source, &candidate).unwrap();

    assert!(verdict.passed);
    assert_eq!(verdict.termination, TerminationReason::Passed);
    assert_eq!(verdict.pass_count(), 2);
    assert!(!verdict.iterations[0].passed);
    assert!(verdict.iterations[1].passed);
    assert_eq!(verdict.corrections_applied, 1);

    // The follow-up formatting request targets a line that is already fixed
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert_eq!(verdict.correction_stats.not_found, 1);

    let corrected = verdict.corrected_document.as_ref().unwrap();
    assert_eq!(corrected.to_markdown(), GUIDE);
}

#[test]
fn test_corrected_pages_are_rerendered() {
    let (source, candidate) = squashed_headings(&[GUIDE]);
    let validator = Validator::new(options())
        .with_renderer(TextRenderer)
        .with_provider(FnProvider(fix_headings));

    let verdict = validator.validate("guide", &source, &candidate).unwrap();

    assert!(verdict.passed);
    assert_eq!(verdict.stage(StageKind::Visual).unwrap().score, 1.0);
    let corrected = verdict.corrected_document.unwrap();
    assert!(corrected.pages[0].has_bitmap());
}

#[test]
fn test_noop_provider_plateaus() {
    let (source, candidate) = squashed_headings(&[GUIDE]);
    let validator = Validator::new(options()).with_provider(NoopProvider);

    let verdict = validator.validate("guide", &source, &candidate).unwrap();

    assert!(!verdict.passed);
    assert_eq!(verdict.termination, TerminationReason::Plateau);
    assert_eq!(verdict.pass_count(), 1);
    assert_eq!(verdict.corrections_applied, 0);
    assert!(verdict.correction_stats.unchanged > 0);
    assert!(verdict.corrected_document.is_none());
}

#[test]
fn test_low_confidence_answers_discarded() {
    let (source, candidate) = squashed_headings(&[GUIDE]);
    let validator = Validator::new(options()).with_provider(ReplacingProvider::new("##Setup", "## Setup", 0.5));

    let verdict = validator.validate("guide", &source, &candidate).unwrap();

    assert!(!verdict.passed);
    assert_eq!(verdict.termination, TerminationReason::Stalled);
    assert_eq!(verdict.corrections_applied, 0);
    assert_eq!(verdict.correction_stats.budget_consumed(), 0);
    assert_eq!(verdict.correction_stats.low_confidence, verdict.correction_stats.requested);
}

#[test]
fn test_failing_provider_retried_then_skipped() {
    let (source, candidate) = squashed_headings(&[GUIDE]);
    let provider = Arc::new(FailingProvider { calls: AtomicU32::new(0) });
    let mut validator = Validator::new(options());
    validator.set_provider(provider.clone());

    let verdict = validator.validate("guide", &source, &candidate).unwrap();

    let requested = verdict.correction_stats.requested;
    assert!(requested > 0);
    assert_eq!(provider.calls.load(Ordering::SeqCst), requested * 3);
    assert_eq!(verdict.correction_stats.provider_failures, requested);
    assert_eq!(verdict.termination, TerminationReason::Stalled);
    assert!(verdict.issues.iter().any(|i| i.contains("HTTP 503")));
}

/// Blocks until the test releases it.
struct HangingProvider {
    started: AtomicU32,
    release: crossbeam_channel::Receiver<()>,
}

impl CorrectionProvider for HangingProvider {
    fn correct(&self, request: &CorrectionRequest) -> docqa::Result<CorrectionResponse> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _ = self.release.recv_timeout(Duration::from_secs(10));
        Ok(fix_headings(request))
    }
}

#[test]
fn test_hanging_provider_holds_bounded_workers() {
    let (source, candidate) = squashed_headings(&[GUIDE, USAGE, LIMITS]);
    let (release, rx) = crossbeam_channel::unbounded::<()>();
    let provider = Arc::new(HangingProvider {
        started: AtomicU32::new(0),
        release: rx,
    });
    let correction = CorrectionOptions::default()
        .with_retries(3, 0)
        .with_timeout_ms(20)
        .with_max_workers(1);
    let mut validator = Validator::new(options().with_correction(correction));
    validator.set_provider(provider.clone());

    let verdict = validator.validate("manual", &source, &candidate).unwrap();

    let requested = verdict.correction_stats.requested;
    assert!(requested > 1);
    assert_eq!(verdict.correction_stats.provider_failures, requested);
    assert_eq!(verdict.termination, TerminationReason::Stalled);
    // Every attempt timed out, yet only one worker ever entered the provider
    assert!(provider.started.load(Ordering::SeqCst) <= 1);
    drop(release);
}

#[test]
fn test_auto_correction_disabled() {
    let (source, candidate) = squashed_headings(&[GUIDE]);
    let provider = Arc::new(ReplacingProvider::new("##Setup", "## Setup", 0.95));
    let mut validator = Validator::new(options().with_auto_correction(false));
    validator.set_provider(provider.clone());

    let verdict = validator.validate("guide", &source, &candidate).unwrap();

    assert!(!verdict.passed);
    assert_eq!(verdict.termination, TerminationReason::CorrectionDisabled);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_destructive_correction_reverted() {
    let (source, candidate) = squashed_headings(&[GUIDE]);
    let correction = CorrectionOptions::default()
        .with_retries(1, 0)
        .with_kind(CorrectionKind::Formatting, false);
    let validator = Validator::new(options().with_correction(correction))
        .with_provider(FnProvider(|_: &CorrectionRequest| CorrectionResponse::new("", 0.99)));

    let verdict = validator.validate("guide", &source, &candidate).unwrap();

    assert_eq!(verdict.corrections_applied, 0);
    assert!(verdict.correction_stats.reverted > 0);
    assert!(verdict.issues.iter().any(|i| i.contains("reverted")));
    assert_eq!(verdict.termination, TerminationReason::Stalled);
}

#[test]
fn test_budget_exhaustion_ends_run() {
    let (source, candidate) = squashed_headings(&[GUIDE, USAGE, LIMITS]);
    let validator = Validator::new(structure_only().with_budget(1)).with_provider(FnProvider(fix_headings));

    let verdict = validator.validate("guide", &source, &candidate).unwrap();

    assert!(!verdict.passed);
    assert_eq!(verdict.termination, TerminationReason::BudgetExhausted);
    assert_eq!(verdict.corrections_applied, 1);
    assert_eq!(verdict.pass_count(), 2);
    assert!(verdict.iterations[1].aggregate > verdict.iterations[0].aggregate);
    assert!(verdict.corrected_document.is_some());
}

#[test]
fn test_budget_bounds_hold_for_any_provider() {
    let (source, candidate) = squashed_headings(&[GUIDE, USAGE, LIMITS]);
    let providers: Vec<Arc<dyn CorrectionProvider>> = vec![
        Arc::new(NoopProvider),
        Arc::new(NoisyProvider),
        Arc::new(FnProvider(fix_headings)),
        Arc::new(FailingProvider { calls: AtomicU32::new(0) }),
    ];

    for budget in 0..=3usize {
        for provider in &providers {
            let mut validator = Validator::new(structure_only().with_budget(budget));
            validator.set_provider(Arc::clone(provider));
            let verdict = validator.validate("guide", &source, &candidate).unwrap();

            assert!(verdict.corrections_applied as usize <= budget);
            assert!(verdict.correction_stats.budget_consumed() as usize <= budget);
            assert!(verdict.pass_count() <= budget + 1);
        }
    }
}

#[test]
fn test_zero_budget_never_calls_provider() {
    let (source, candidate) = squashed_headings(&[GUIDE]);
    let provider = Arc::new(ReplacingProvider::new("##Setup", "## Setup", 0.95));
    let mut validator = Validator::new(options().with_budget(0));
    validator.set_provider(provider.clone());

    let verdict = validator.validate("guide", &source, &candidate).unwrap();

    assert_eq!(verdict.termination, TerminationReason::BudgetExhausted);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

/// Cancels the run from inside its first call.
struct CancellingProvider {
    token: CancellationToken,
}

impl CorrectionProvider for CancellingProvider {
    fn correct(&self, request: &CorrectionRequest) -> docqa::Result<CorrectionResponse> {
        self.token.cancel();
        Ok(fix_headings(request))
    }
}

#[test]
fn test_cancellation_reports_last_complete_pass() {
    let (source, candidate) = squashed_headings(&[GUIDE]);
    let token = CancellationToken::new();
    let validator = Validator::new(options())
        .with_cancellation(token.clone())
        .with_provider(CancellingProvider { token });

    let verdict = validator.validate("guide", &source, &candidate).unwrap();

    assert_eq!(verdict.termination, TerminationReason::Cancelled);
    assert_eq!(verdict.pass_count(), 1);
    assert!(!verdict.passed);
    assert_eq!(verdict.overall_score, verdict.iterations[0].aggregate);
    assert!(verdict.corrected_document.is_none());
}

#[test]
fn test_cancelled_before_start_still_scores() {
    let (source, candidate) = squashed_headings(&[GUIDE]);
    let validator = Validator::new(options()).with_provider(NoisyProvider);
    validator.cancellation_token().cancel();

    let verdict = validator.validate("guide", &source, &candidate).unwrap();

    assert_eq!(verdict.termination, TerminationReason::Cancelled);
    assert_eq!(verdict.pass_count(), 1);
    assert_eq!(verdict.correction_stats.requested, 0);
}
