//! Text similarity measures used for recognizer consensus.

use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

/// NFC-normalize and collapse all whitespace runs to single spaces.
pub fn normalize_text(text: &str) -> String {
    let nfc: String = text.nfc().collect();
    nfc.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Character-level similarity: 1 - levenshtein / longest length.
///
/// Inputs are expected to be normalized already.
pub fn edit_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// Jaccard similarity of the whitespace token sets.
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let left: HashSet<&str> = a.split_whitespace().collect();
    let right: HashSet<&str> = b.split_whitespace().collect();
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    intersection as f64 / union as f64
}

/// Pairwise similarity of two raw texts: mean of edit ratio and token Jaccard
/// after normalization.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    0.5 * edit_ratio(&a, &b) + 0.5 * token_jaccard(&a, &b)
}

/// Symmetric matrix of pairwise similarities (diagonal = 1).
pub fn similarity_matrix(texts: &[String]) -> Vec<Vec<f64>> {
    let normalized: Vec<String> = texts.iter().map(|t| normalize_text(t)).collect();
    let n = normalized.len();
    let mut matrix = vec![vec![1.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let sim = 0.5 * edit_ratio(&normalized[i], &normalized[j])
                + 0.5 * token_jaccard(&normalized[i], &normalized[j]);
            matrix[i][j] = sim;
            matrix[j][i] = sim;
        }
    }
    matrix
}
