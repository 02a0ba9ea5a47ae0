//! Per-page consensus across recognition results.

use super::similarity::similarity_matrix;
use super::RecognitionResult;
use crate::score::mean;
use serde::{Deserialize, Serialize};

/// Scores within this distance are treated as tied.
const TIE_EPSILON: f64 = 1e-9;

/// Consensus reached for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageConsensus {
    /// Page number (1-indexed)
    pub page: u32,

    /// Engines that produced a result for this page, in engine order
    pub engines: Vec<String>,

    /// Engine whose text was chosen
    pub consensus_engine: String,

    /// Chosen text
    pub consensus_text: String,

    /// Mean similarity over all result pairs (1.0 with a single result)
    pub mean_similarity: f64,

    /// Mean token confidence of the chosen result
    pub consensus_confidence: f64,

    /// `0.5 * mean_similarity + 0.5 * consensus_confidence`
    pub score: f64,
}

impl PageConsensus {
    /// Whether only one engine contributed.
    pub fn is_single_engine(&self) -> bool {
        self.engines.len() < 2
    }
}

/// Pick the consensus result for a page.
///
/// The winner has the highest mean similarity to the other results. Ties go
/// to the highest mean token confidence, then to the earliest engine.
pub fn build_consensus(page: u32, results: &[RecognitionResult]) -> Option<PageConsensus> {
    let first = results.first()?;
    let engines: Vec<String> = results.iter().map(|r| r.engine.clone()).collect();

    if results.len() == 1 {
        let confidence = first.mean_confidence();
        return Some(PageConsensus {
            page,
            engines,
            consensus_engine: first.engine.clone(),
            consensus_text: first.text.clone(),
            mean_similarity: 1.0,
            consensus_confidence: confidence,
            score: 0.5 + 0.5 * confidence,
        });
    }

    let texts: Vec<String> = results.iter().map(|r| r.text.clone()).collect();
    let matrix = similarity_matrix(&texts);
    let n = results.len();

    let mut pair_sims = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            pair_sims.push(matrix[i][j]);
        }
    }
    let mean_similarity = mean(&pair_sims).unwrap_or(1.0);

    let agreement: Vec<f64> = (0..n)
        .map(|i| {
            let others: Vec<f64> = (0..n).filter(|j| *j != i).map(|j| matrix[i][j]).collect();
            mean(&others).unwrap_or(1.0)
        })
        .collect();

    let mut best = 0;
    for i in 1..n {
        let diff = agreement[i] - agreement[best];
        if diff > TIE_EPSILON
            || (diff.abs() <= TIE_EPSILON
                && results[i].mean_confidence() > results[best].mean_confidence() + TIE_EPSILON)
        {
            best = i;
        }
    }

    let winner = &results[best];
    let confidence = winner.mean_confidence();
    Some(PageConsensus {
        page,
        engines,
        consensus_engine: winner.engine.clone(),
        consensus_text: winner.text.clone(),
        mean_similarity,
        consensus_confidence: confidence,
        score: 0.5 * mean_similarity + 0.5 * confidence,
    })
}

/// Ratio of the longest to the shortest result in words.
///
/// Returns `None` when fewer than two results exist or all are empty.
pub fn length_divergence(results: &[RecognitionResult]) -> Option<f64> {
    if results.len() < 2 {
        return None;
    }
    let counts: Vec<usize> = results.iter().map(|r| r.word_count()).collect();
    let max = *counts.iter().max()?;
    let min = *counts.iter().min()?;
    if max == 0 {
        return None;
    }
    if min == 0 {
        return Some(f64::INFINITY);
    }
    Some(max as f64 / min as f64)
}
