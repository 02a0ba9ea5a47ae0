//! Integration tests for scoring and verdicts.

mod common;

use common::*;
use docqa::report::{from_json, to_json, AuditStore, JsonFormat};
use docqa::visual::document_score;
use docqa::{
    Document, Error, Page, StageKind, StageWeights, TerminationReason, ValidationOptions, Validator,
};
use image::{GrayImage, Luma};
use tempfile::TempDir;

const USAGE: &str = "## Usage\nRun ipmitool sensor list to read every voltage.\n";

fn two_page_manual() -> Document {
    document_with_bitmaps(&format!("{}\u{000C}{}", GUIDE, USAGE))
}

fn validator() -> Validator {
    Validator::new(ValidationOptions::default()).with_recognizer(FixedRecognizer {
        name: "ocr-a",
        text: None,
        confidence: 1.0,
    })
}

fn numbered_pages(count: u32) -> String {
    (1..=count)
        .map(|i| format!("## Section {}\nThe BMC reports sensor {} over IPMI.\n", i, i))
        .collect::<Vec<_>>()
        .join("\u{000C}")
}

#[test]
fn test_identical_documents_score_perfectly() {
    let doc = two_page_manual();
    let verdict = validator().validate("manual", &doc, &doc).unwrap();

    assert!(verdict.passed);
    assert_eq!(verdict.overall_score, 1.0);
    assert_eq!(verdict.stages.len(), 4);
    for stage in &verdict.stages {
        assert_eq!(stage.score, 1.0, "{} stage", stage.stage);
        assert!(stage.passed);
    }
    assert!(verdict.skipped_stages.is_empty());
    assert!(verdict.difference_regions.is_empty());
    assert_eq!(verdict.corrections_applied, 0);
    assert_eq!(verdict.pass_count(), 1);
    assert_eq!(verdict.termination, TerminationReason::Passed);
    assert!(verdict.corrected_document.is_none());
}

#[test]
fn test_timeline_covers_every_stage() {
    let doc = two_page_manual();
    let verdict = validator().validate("manual", &doc, &doc).unwrap();

    for stage in StageKind::ALL {
        assert!(
            verdict
                .processing_timeline
                .iter()
                .any(|t| t.step == stage.name() && t.pass == 0),
            "missing timing for {}",
            stage
        );
    }
    assert!(verdict.processing_timeline.iter().all(|t| t.duration_ms() >= 0));
    assert!(verdict.finished_at >= verdict.started_at);
}

#[test]
fn test_candidate_without_pages_fails() {
    let source = two_page_manual();
    let verdict = validator().validate("manual", &source, &Document::new()).unwrap();

    let visual = verdict.stage(StageKind::Visual).unwrap();
    assert_eq!(visual.score, 0.0);
    assert!(!visual.passed);
    assert!(!verdict.passed);
}

#[test]
fn test_missing_pages_penalized() {
    let source = document_with_bitmaps(&numbered_pages(10));
    let candidate = document_with_bitmaps(&numbered_pages(8));
    let verdict = validator().validate("manual", &source, &candidate).unwrap();

    let visual = verdict.stage(StageKind::Visual).unwrap();
    // Eight perfect pages out of ten, minus 0.05 per missing page
    assert!((visual.score - 0.7).abs() < 1e-9);
    assert!(!visual.passed);
    assert!(visual.issues.iter().any(|i| i.contains("unmatched")));

    assert!((document_score(&[0.97; 8], 10, 8, 0.05) - 0.676).abs() < 1e-9);
}

#[test]
fn test_page_padding_limit_is_fatal() {
    let source = document_with_bitmaps(&numbered_pages(10));
    let candidate = document_with_bitmaps(&numbered_pages(8));
    let validator = Validator::new(ValidationOptions::new().with_max_page_padding(1));

    let err = validator.validate("manual", &source, &candidate).unwrap_err();
    assert!(matches!(err, Error::InputMismatch(_)));
}

#[test]
fn test_content_loss_overrides_perfect_visuals() {
    let source = two_page_manual();
    let pages = source
        .pages
        .iter()
        .map(|p| {
            let text = if p.number == 1 { "# Guide\nUse the tool.\n" } else { "## Usage\nRun it.\n" };
            let bitmap = p.bitmap.clone().unwrap();
            Page::new(p.number, text).with_shared_bitmap(bitmap)
        })
        .collect();
    let candidate = Document::from_pages(pages);

    let verdict = validator().validate("manual", &source, &candidate).unwrap();

    assert_eq!(verdict.stage(StageKind::Visual).unwrap().score, 1.0);
    assert!(verdict.content_loss);
    assert!(!verdict.stage(StageKind::Content).unwrap().passed);
    assert!(verdict.overall_score <= 0.5);
    assert!(!verdict.passed);
    assert_eq!(verdict.termination, TerminationReason::CorrectionDisabled);
}

#[test]
fn test_document_without_terms_fails_despite_perfect_visuals() {
    let doc = document_with_bitmaps("# Notes\nThe weather was pleasant today.\n");
    let verdict = validator().validate("notes", &doc, &doc).unwrap();

    assert_eq!(verdict.stage(StageKind::Visual).unwrap().score, 1.0);
    assert_eq!(verdict.stage(StageKind::Structure).unwrap().score, 1.0);
    assert!(verdict.content_loss);
    assert!(!verdict.passed);
    assert!(verdict.overall_score <= 0.5);
}

#[test]
fn test_source_relative_minimum_is_opt_in() {
    let doc = document_with_bitmaps("# Notes\nReset the BMC.\n");
    let mut options = ValidationOptions::default();
    options.content = options.content.with_min_terms_from_source(true);
    let verdict = Validator::new(options)
        .with_recognizer(FixedRecognizer {
            name: "ocr-a",
            text: None,
            confidence: 1.0,
        })
        .validate("notes", &doc, &doc)
        .unwrap();

    assert!(!verdict.content_loss);
    assert!(verdict.passed);
}

#[test]
fn test_disagreeing_engine_lowers_recognition() {
    let doc = two_page_manual();
    let validator = Validator::new(ValidationOptions::default())
        .with_recognizer(FixedRecognizer {
            name: "ocr-a",
            text: None,
            confidence: 0.95,
        })
        .with_recognizer(FixedRecognizer {
            name: "ocr-b",
            text: Some("#### ~~~ ####".to_string()),
            confidence: 0.4,
        });

    let verdict = validator.validate("manual", &doc, &doc).unwrap();
    let recognition = verdict.stage(StageKind::Recognition).unwrap();
    assert!(recognition.score < 1.0);
    assert!(recognition.score > 0.5);
}

#[test]
fn test_broken_embedder_skips_structure() {
    let doc = two_page_manual();
    let verdict = validator().with_embedder(BrokenEmbedder).validate("manual", &doc, &doc).unwrap();

    assert!(verdict.is_skipped(StageKind::Structure));
    assert!(verdict.stage(StageKind::Structure).is_none());
    // Remaining weights are renormalized
    assert_eq!(verdict.overall_score, 1.0);
    assert!(verdict.passed);
}

#[test]
fn test_broken_renderer_skips_visual() {
    let doc = Document::from_markdown(GUIDE);
    let verdict = validator().with_renderer(BrokenRenderer).validate("manual", &doc, &doc).unwrap();

    let skipped = verdict.skipped_stages.iter().find(|s| s.stage == StageKind::Visual).unwrap();
    assert!(skipped.reason.contains("renderer failed"));
    assert!(verdict.passed);
}

#[test]
fn test_renderer_supplies_missing_bitmaps() {
    let doc = Document::from_markdown(GUIDE);
    let verdict = validator().with_renderer(TextRenderer).validate("manual", &doc, &doc).unwrap();
    assert_eq!(verdict.stage(StageKind::Visual).unwrap().score, 1.0);
}

#[test]
fn test_zero_weight_stage_does_not_count() {
    let source = document_with_bitmaps(&numbered_pages(10));
    let candidate = document_with_bitmaps(&numbered_pages(8));
    let weights = StageWeights::default().with(StageKind::Visual, 0.0);
    let options = ValidationOptions::new().with_weights(weights);
    let verdict = Validator::new(options).validate("manual", &source, &candidate).unwrap();

    assert!(!verdict.stage(StageKind::Visual).unwrap().passed);
    let structure = verdict.stage(StageKind::Structure).unwrap().score;
    let content = verdict.stage(StageKind::Content).unwrap().score;
    assert!((verdict.overall_score - (structure + content) / 2.0).abs() < 1e-9);
}

#[test]
fn test_diff_images_written_per_run() {
    let dir = TempDir::new().unwrap();
    let source = two_page_manual();

    let mut altered: GrayImage = (*source.pages[0].bitmap.clone().unwrap()).clone();
    for y in 60..90 {
        for x in 50..90 {
            altered.put_pixel(x, y, Luma([0]));
        }
    }
    let mut candidate = source.clone();
    candidate.pages[0] = candidate.pages[0].clone().with_bitmap(altered);

    let mut options = ValidationOptions::default();
    options.visual = options.visual.with_diff_dir(dir.path());
    let verdict = Validator::new(options).validate("manual", &source, &candidate).unwrap();

    assert!(!verdict.difference_regions.is_empty());
    assert_eq!(verdict.diff_images.len(), 1);
    let path = std::path::Path::new(&verdict.diff_images[0]);
    assert!(path.exists());
    assert!(path.starts_with(dir.path().join(&verdict.run_id).join("pass-0")));
}

#[test]
fn test_verdict_json_round_trip() {
    let source = document_with_bitmaps(&numbered_pages(10));
    let candidate = document_with_bitmaps(&numbered_pages(8));
    let verdict = validator().validate("manual", &source, &candidate).unwrap();

    let json = to_json(&verdict, JsonFormat::Compact).unwrap();
    let parsed = from_json(&json).unwrap();

    assert_eq!(parsed.passed, verdict.passed);
    assert_eq!(parsed.overall_score, verdict.overall_score);
    assert_eq!(parsed.stages, verdict.stages);
    assert_eq!(parsed.termination, verdict.termination);
    assert_eq!(parsed.run_id, verdict.run_id);
}

#[test]
fn test_audit_store_keeps_every_run() {
    let dir = TempDir::new().unwrap();
    let store = AuditStore::new(dir.path()).compressed(true);
    let doc = two_page_manual();

    let first = validator().validate("manual", &doc, &doc).unwrap();
    let second = validator().validate("manual", &doc, &Document::new()).unwrap();
    store.save(&first).unwrap();
    store.save(&second).unwrap();

    let ids = store.list().unwrap();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first.run_id));

    let loaded = store.load(&second.run_id).unwrap();
    assert!(!loaded.passed);
    assert_eq!(loaded.stages, second.stages);
}
