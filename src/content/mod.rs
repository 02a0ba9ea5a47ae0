//! Content fidelity validation.
//!
//! Three signals make up the score: technical-term retention, code-block
//! integrity and Markdown well-formedness. Losing technical terms outright is
//! a hard failure that no other signal can compensate for.

mod markup;
mod terms;

pub use markup::{check_markup, formatting_score, MarkupIssue, MarkupProblem};
pub use terms::{total as total_terms, TermCounter, TermCounts, DEFAULT_TERMS};

use crate::model::Document;
use crate::parser::{FenceSummary, MarkdownMap};
use crate::score::{StageKind, ValidationScore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Options for the content stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentOptions {
    /// Score below which the stage fails
    pub threshold: f64,

    /// Domain terms to track (case-insensitive, whole words)
    pub terms: Vec<String>,

    /// Minimum distinct terms the candidate must contain
    pub min_terms: usize,

    /// Lower the minimum to the number of distinct terms in the source
    pub min_terms_from_source: bool,

    /// Weight of term retention
    pub term_weight: f64,

    /// Weight of code-block integrity
    pub code_block_weight: f64,

    /// Weight of formatting well-formedness
    pub formatting_weight: f64,

    /// Score deducted per malformed construct
    pub formatting_penalty: f64,
}

impl ContentOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pass threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Replace the tracked terms.
    pub fn with_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terms = terms.into_iter().map(Into::into).collect();
        self
    }

    /// Set the minimum number of distinct terms.
    pub fn with_min_terms(mut self, min_terms: usize) -> Self {
        self.min_terms = min_terms;
        self
    }

    /// Never demand more distinct terms than the source has.
    pub fn with_min_terms_from_source(mut self, enabled: bool) -> Self {
        self.min_terms_from_source = enabled;
        self
    }

    /// Distinct terms the candidate must contain, given the source's count.
    pub fn required_terms(&self, source_distinct: usize) -> usize {
        if self.min_terms_from_source {
            self.min_terms.min(source_distinct)
        } else {
            self.min_terms
        }
    }
}

impl Default for ContentOptions {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            terms: DEFAULT_TERMS.iter().map(|t| t.to_string()).collect(),
            min_terms: 5,
            min_terms_from_source: false,
            term_weight: 0.5,
            code_block_weight: 0.25,
            formatting_weight: 0.25,
            formatting_penalty: 0.1,
        }
    }
}

/// A term that occurs less often in the candidate than in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermLoss {
    /// The term
    pub term: String,
    /// Occurrences in the source
    pub source_count: usize,
    /// Occurrences in the candidate
    pub candidate_count: usize,
}

/// Terms lost on a single page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTermLoss {
    /// Page number (1-indexed)
    pub page: u32,
    /// Terms with fewer occurrences than on the source page
    pub terms: Vec<String>,
}

/// Content stage output.
#[derive(Debug, Clone)]
pub struct ContentReport {
    /// Stage score
    pub score: ValidationScore,

    /// Candidate/source term occurrence ratio, capped at 1
    pub term_retention: f64,

    /// Code-block integrity in [0, 1]
    pub code_block_integrity: f64,

    /// Formatting well-formedness in [0, 1]
    pub formatting: f64,

    /// Hard content-loss signal
    pub content_loss: bool,

    /// Distinct terms found in the candidate
    pub distinct_terms: usize,

    /// Document-level term losses
    pub term_losses: Vec<TermLoss>,

    /// Per-page term losses
    pub page_term_losses: Vec<PageTermLoss>,

    /// Candidate pages that leave a code fence open
    pub unclosed_fence_pages: Vec<u32>,

    /// Malformed constructs introduced by the candidate
    pub markup_problems: Vec<MarkupProblem>,
}

/// Validates technical content and markup of the candidate.
#[derive(Debug, Clone)]
pub struct ContentValidator {
    options: ContentOptions,
    counter: TermCounter,
}

impl ContentValidator {
    /// Create a validator; the term list is compiled once.
    pub fn new(options: ContentOptions) -> Self {
        let counter = TermCounter::new(&options.terms);
        Self { options, counter }
    }

    /// Stage options.
    pub fn options(&self) -> &ContentOptions {
        &self.options
    }

    /// Validate the candidate against the source.
    pub fn validate(&self, source: &Document, candidate: &Document) -> ContentReport {
        let opts = &self.options;
        let source_text = source.plain_text();
        let candidate_text = candidate.plain_text();
        let source_map = markdown_map(source);
        let candidate_map = markdown_map(candidate);

        // Term retention
        let src_counts = self.counter.count(&source_text);
        let cand_counts = self.counter.count(&candidate_text);
        let src_total = total_terms(&src_counts);
        let cand_total = total_terms(&cand_counts);
        let term_retention = if src_total == 0 {
            1.0
        } else {
            (cand_total as f64 / src_total as f64).min(1.0)
        };

        let term_losses: Vec<TermLoss> = src_counts
            .iter()
            .filter_map(|(term, &source_count)| {
                let candidate_count = cand_counts.get(term).copied().unwrap_or(0);
                (candidate_count < source_count).then(|| TermLoss {
                    term: term.clone(),
                    source_count,
                    candidate_count,
                })
            })
            .collect();
        let page_term_losses = self.page_term_losses(source, candidate);

        // Code blocks
        let src_fences = source_map.fences();
        let cand_fences = candidate_map.fences();
        let code_block_integrity = code_block_integrity(&src_fences, &cand_fences);
        let mut unclosed_fence_pages: Vec<u32> = if cand_fences.unclosed && !src_fences.unclosed {
            candidate_map
                .code_blocks()
                .iter()
                .filter(|b| b.fenced && !b.closed)
                .map(|b| b.start.page)
                .collect()
        } else {
            Vec::new()
        };
        unclosed_fence_pages.dedup();

        // Formatting, ignoring constructs the source already had
        let inherited: HashSet<(MarkupIssue, String)> = check_markup(&source_map)
            .into_iter()
            .map(|p| (p.kind, p.snippet.trim().to_string()))
            .collect();
        let markup_problems: Vec<MarkupProblem> = check_markup(&candidate_map)
            .into_iter()
            .filter(|p| !inherited.contains(&(p.kind, p.snippet.trim().to_string())))
            .collect();
        let formatting = formatting_score(markup_problems.len(), opts.formatting_penalty);

        let weighted = opts.term_weight * term_retention
            + opts.code_block_weight * code_block_integrity
            + opts.formatting_weight * formatting;
        let weight_sum = opts.term_weight + opts.code_block_weight + opts.formatting_weight;
        let value = if weight_sum > 0.0 { weighted / weight_sum } else { 0.0 };

        let mut score = ValidationScore::new(StageKind::Content, value, opts.threshold);

        let distinct_terms = cand_counts.len();
        let required = opts.required_terms(src_counts.len());
        let content_loss = distinct_terms < required;
        if content_loss {
            score.fail();
            score.add_issue(format!(
                "Content loss: only {} distinct technical term(s) found, at least {} required",
                distinct_terms, required
            ));
        }

        if !term_losses.is_empty() {
            let listed: Vec<String> = term_losses
                .iter()
                .map(|l| format!("{} ({}/{})", l.term, l.candidate_count, l.source_count))
                .collect();
            score.add_issue(format!("Technical terms lost: {}", listed.join(", ")));
        }
        if code_block_integrity < 1.0 {
            score.add_issue(format!(
                "Code blocks: {} complete in candidate vs {} in source{}",
                cand_fences.complete,
                src_fences.complete,
                if cand_fences.unclosed { ", unterminated fence" } else { "" }
            ));
        }
        for problem in &markup_problems {
            score.add_issue(format!(
                "Page {} line {}: {}",
                problem.page,
                problem.line,
                problem.kind.describe()
            ));
        }

        log::debug!(
            "content score {:.3} (terms {:.3}, code {:.3}, format {:.3}, loss={})",
            score.score,
            term_retention,
            code_block_integrity,
            formatting,
            content_loss
        );

        ContentReport {
            score,
            term_retention,
            code_block_integrity,
            formatting,
            content_loss,
            distinct_terms,
            term_losses,
            page_term_losses,
            unclosed_fence_pages,
            markup_problems,
        }
    }

    fn page_term_losses(&self, source: &Document, candidate: &Document) -> Vec<PageTermLoss> {
        source
            .pages
            .iter()
            .zip(candidate.pages.iter())
            .filter_map(|(src, cand)| {
                let src_counts = self.counter.count(&src.text);
                let cand_counts = self.counter.count(&cand.text);
                let terms: Vec<String> = src_counts
                    .iter()
                    .filter(|(term, n)| cand_counts.get(*term).copied().unwrap_or(0) < **n)
                    .map(|(term, _)| term.clone())
                    .collect();
                (!terms.is_empty()).then_some(PageTermLoss {
                    page: cand.number,
                    terms,
                })
            })
            .collect()
    }
}

impl Default for ContentValidator {
    fn default() -> Self {
        Self::new(ContentOptions::default())
    }
}

/// Integrity of fenced code blocks in the candidate relative to the source.
///
/// A fence left open counts against the candidate only if the source closed
/// all of its own.
pub fn code_block_integrity(source: &FenceSummary, candidate: &FenceSummary) -> f64 {
    let balanced = !candidate.unclosed || source.unclosed;
    if source.complete == 0 {
        return if balanced { 1.0 } else { 0.5 };
    }
    let ratio = candidate.complete.min(source.complete) as f64 / source.complete as f64;
    if balanced {
        ratio
    } else {
        ratio * 0.5
    }
}

fn markdown_map(doc: &Document) -> MarkdownMap {
    MarkdownMap::parse(doc.pages.iter().map(|p| (p.number, p.text.as_str())))
}
