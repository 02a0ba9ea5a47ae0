//! Turning stage findings into correction requests.

use super::{CorrectionKind, CorrectionOptions, CorrectionRequest, CorrectionTarget};
use crate::content::{ContentReport, MarkupIssue};
use crate::model::Document;
use crate::parser::parse_heading;
use crate::recognition::{normalize_text, RecognitionReport, EXTRACTED_ENGINE};
use crate::structure::StructureReport;
use crate::visual::VisualReport;

/// Anchors listed in a broken-link instruction.
const ANCHORS_LISTED: usize = 10;

/// Stage reports from one scoring pass. A stage that was unavailable is `None`.
#[derive(Debug, Clone, Default)]
pub struct PassReports {
    /// Recognition consensus
    pub recognition: Option<RecognitionReport>,
    /// Visual fidelity
    pub visual: Option<VisualReport>,
    /// Outline structure
    pub structure: Option<StructureReport>,
    /// Technical content
    pub content: Option<ContentReport>,
}

/// Build prioritized requests for a failing pass, at most `limit` of them.
///
/// Order: content fidelity, structure, recognition, formatting. Only stages
/// that failed contribute, except that markup problems are always offered as
/// formatting fixes.
pub fn plan_corrections(
    reports: &PassReports,
    source: &Document,
    candidate: &Document,
    options: &CorrectionOptions,
    limit: usize,
) -> Vec<CorrectionRequest> {
    let mut requests = Vec::new();

    if let Some(content) = &reports.content {
        if options.content && (content.content_loss || !content.score.passed) {
            requests.extend(content_requests(content, candidate));
        }
    }
    if let Some(structure) = &reports.structure {
        if options.structure && !structure.score.passed {
            requests.extend(structure_requests(structure, source, candidate));
        }
    }
    if let Some(recognition) = &reports.recognition {
        if options.recognition && !recognition.score.passed {
            requests.extend(recognition_requests(recognition, candidate));
        }
    }
    if options.formatting {
        if let Some(content) = &reports.content {
            requests.extend(markup_requests(content));
        }
        if let Some(visual) = &reports.visual {
            if !visual.score.passed {
                requests.extend(layout_requests(visual, candidate));
            }
        }
    }

    requests.sort_by_key(|r| r.kind.priority());
    requests.truncate(limit);
    requests
}

fn page_text(candidate: &Document, number: u32) -> Option<&str> {
    candidate
        .pages
        .iter()
        .find(|p| p.number == number)
        .map(|p| p.text.as_str())
        .filter(|t| !t.trim().is_empty())
}

fn content_requests(report: &ContentReport, candidate: &Document) -> Vec<CorrectionRequest> {
    let mut pages: Vec<u32> = report.page_term_losses.iter().map(|l| l.page).collect();
    pages.extend(&report.unclosed_fence_pages);
    pages.sort_unstable();
    pages.dedup();

    pages
        .into_iter()
        .filter_map(|number| {
            let text = page_text(candidate, number)?;
            let mut instruction = Vec::new();
            if let Some(loss) = report.page_term_losses.iter().find(|l| l.page == number) {
                instruction.push(format!(
                    "Restore the technical terms missing from this page: {}.",
                    loss.terms.join(", ")
                ));
            }
            if report.unclosed_fence_pages.contains(&number) {
                instruction.push("Close the unterminated code fence.".to_string());
            }
            instruction.push("Keep all other content unchanged.".to_string());

            Some(
                CorrectionRequest::new(
                    CorrectionKind::ContentFidelity,
                    CorrectionTarget::Page { page: number },
                    text,
                    report.score.score,
                )
                .with_instruction(instruction.join(" ")),
            )
        })
        .collect()
}

fn structure_requests(report: &StructureReport, source: &Document, candidate: &Document) -> Vec<CorrectionRequest> {
    let mut requests = Vec::new();
    let confidence = report.score.score;

    for change in &report.level_changes {
        let Some(node) = candidate.outline.node(change.candidate) else { continue };
        let Some(number) = node.page else { continue };
        let Some(text) = page_text(candidate, number) else { continue };
        let Some(line) = text.lines().find(|l| {
            parse_heading(l).is_some_and(|(level, title, _)| level == node.level && title == node.title)
        }) else {
            continue;
        };
        requests.push(
            CorrectionRequest::new(
                CorrectionKind::Structure,
                CorrectionTarget::Node {
                    node: change.candidate,
                    page: Some(number),
                },
                line,
                confidence,
            )
            .with_instruction(format!(
                "Change this heading to level {} ({} '#' characters); keep its title.",
                change.expected, change.expected
            )),
        );
    }

    let anchors: Vec<String> = candidate
        .outline
        .iter()
        .filter_map(|(_, n)| n.anchor.clone())
        .take(ANCHORS_LISTED)
        .collect();
    for target in &report.broken_references {
        let page = candidate
            .outline
            .references()
            .iter()
            .find(|r| &r.target == target)
            .and_then(|r| r.page);
        let Some(number) = page else { continue };
        requests.push(
            CorrectionRequest::new(
                CorrectionKind::Structure,
                CorrectionTarget::Page { page: number },
                format!("(#{})", target),
                confidence,
            )
            .with_instruction(format!(
                "The link target '#{}' does not exist. Point it at one of: {}.",
                target,
                anchors.join(", ")
            )),
        );
    }

    let moved: Vec<_> = report.level_changes.iter().map(|c| c.source).collect();
    for id in report.missing.iter().filter(|id| !moved.contains(id)) {
        let Some(node) = source.outline.node(*id) else { continue };
        let number = node
            .page
            .filter(|p| page_text(candidate, *p).is_some())
            .or_else(|| candidate.pages.last().map(|p| p.number));
        let Some(number) = number else { continue };
        let Some(text) = page_text(candidate, number) else { continue };
        requests.push(
            CorrectionRequest::new(
                CorrectionKind::Structure,
                CorrectionTarget::Page { page: number },
                text,
                confidence,
            )
            .with_instruction(format!(
                "Restore the missing heading '{} {}' at its original position; keep all other content unchanged.",
                "#".repeat(node.level as usize),
                node.title
            )),
        );
    }

    requests
}

fn recognition_requests(report: &RecognitionReport, candidate: &Document) -> Vec<CorrectionRequest> {
    report
        .pages
        .iter()
        .filter(|p| p.score < report.score.threshold && p.consensus_engine != EXTRACTED_ENGINE)
        .filter_map(|p| {
            let text = page_text(candidate, p.page)?;
            if normalize_text(text) == normalize_text(&p.consensus_text) {
                return None;
            }
            Some(
                CorrectionRequest::new(
                    CorrectionKind::Recognition,
                    CorrectionTarget::Page { page: p.page },
                    text,
                    p.score,
                )
                .with_instruction(format!(
                    "Independent recognizers agree on a different reading of this page. Reconcile the text with it, keeping the Markdown structure:\n{}",
                    p.consensus_text
                )),
            )
        })
        .collect()
}

fn markup_requests(report: &ContentReport) -> Vec<CorrectionRequest> {
    report
        .markup_problems
        .iter()
        .map(|problem| {
            let instruction = match problem.kind {
                MarkupIssue::HeadingMissingSpace => "Insert a space after the '#' heading marker.",
                MarkupIssue::HeadingJump => {
                    "Lower this heading's level so it is at most one deeper than the previous heading."
                }
                MarkupIssue::OrphanTableRow => {
                    "Add the missing header separator row to this table, or rewrite the row as text."
                }
                MarkupIssue::OrphanListItem => "Attach this nested list item to a parent list item or remove its indentation.",
            };
            CorrectionRequest::new(
                CorrectionKind::Formatting,
                CorrectionTarget::Page { page: problem.page },
                problem.snippet.clone(),
                report.formatting,
            )
            .with_instruction(instruction)
        })
        .collect()
}

fn layout_requests(report: &VisualReport, candidate: &Document) -> Vec<CorrectionRequest> {
    let threshold = report.score.threshold;
    report
        .pages
        .iter()
        .filter(|p| p.ssim < threshold)
        .filter_map(|p| {
            let text = page_text(candidate, p.page)?;
            let target = match p.regions.iter().max_by_key(|r| r.area()) {
                Some(r) => CorrectionTarget::Region {
                    page: p.page,
                    x: r.x,
                    y: r.y,
                    width: r.width,
                    height: r.height,
                },
                None => CorrectionTarget::Page { page: p.page },
            };
            Some(
                CorrectionRequest::new(CorrectionKind::Formatting, target, text, p.ssim).with_instruction(
                    "The rendered layout of this page differs from the source. Fix the Markdown layout (tables, lists, line breaks) without changing the wording.",
                ),
            )
        })
        .collect()
}
