//! Applying provider answers to the candidate.

use super::{CorrectionRequest, CorrectionResponse};
use crate::model::Document;

/// Result of applying one correction.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    /// The snippet was replaced; here is the new candidate.
    Applied(Document),
    /// The provider returned the snippet unchanged.
    Unchanged,
    /// The snippet no longer occurs on the target page.
    SnippetNotFound,
    /// The target page does not exist in the candidate.
    PageNotFound,
    /// The correction removed too much of the page and was reverted.
    Reverted {
        /// Words on the page before
        before: usize,
        /// Words on the page after
        after: usize,
    },
}

impl ApplyOutcome {
    /// Whether the correction counts against the budget.
    pub fn consumes_budget(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_) | ApplyOutcome::Unchanged)
    }
}

/// Replace the first occurrence of the request's snippet on its target page.
///
/// Requests without a page target apply to the first page containing the
/// snippet. A result that keeps less than `1 - max_word_loss` of the page's
/// words is reverted.
pub fn apply_correction(
    document: &Document,
    request: &CorrectionRequest,
    response: &CorrectionResponse,
    max_word_loss: f64,
) -> ApplyOutcome {
    let snippet = request.original_snippet.as_str();
    if snippet.is_empty() {
        return ApplyOutcome::SnippetNotFound;
    }

    let index = match request.target.page() {
        Some(number) => match document.pages.iter().position(|p| p.number == number) {
            Some(i) => i,
            None => return ApplyOutcome::PageNotFound,
        },
        None => match document.pages.iter().position(|p| p.text.contains(snippet)) {
            Some(i) => i,
            None => return ApplyOutcome::SnippetNotFound,
        },
    };

    let page = &document.pages[index];
    if !page.text.contains(snippet) {
        return ApplyOutcome::SnippetNotFound;
    }
    if response.corrected_snippet == snippet {
        return ApplyOutcome::Unchanged;
    }

    let new_text = page.text.replacen(snippet, &response.corrected_snippet, 1);
    let before = page.word_count();
    let after = new_text.split_whitespace().count();
    if before > 0 && (after as f64) < before as f64 * (1.0 - max_word_loss) {
        return ApplyOutcome::Reverted { before, after };
    }

    match document.with_page_text(index, new_text) {
        Some(doc) => ApplyOutcome::Applied(doc),
        None => ApplyOutcome::PageNotFound,
    }
}
