//! Tree-shape measures and node assignment.

/// Similarity of two preorder level sequences: 1 - edit distance / longer length.
pub fn level_sequence_similarity(a: &[u8], b: &[u8]) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    let distance = strsim::generic_levenshtein(&a.to_vec(), &b.to_vec());
    1.0 - distance as f64 / longest as f64
}

/// Ratio of the smaller to the larger count (1.0 when both are zero).
pub fn count_similarity(a: usize, b: usize) -> f64 {
    if a == 0 && b == 0 {
        return 1.0;
    }
    a.min(b) as f64 / a.max(b) as f64
}

/// Length of the longest strictly increasing subsequence.
pub fn lis_length(sequence: &[usize]) -> usize {
    let mut tails: Vec<usize> = Vec::new();
    for &value in sequence {
        match tails.binary_search(&value) {
            Ok(_) => {}
            Err(pos) if pos == tails.len() => tails.push(value),
            Err(pos) => tails[pos] = value,
        }
    }
    tails.len()
}

/// Fraction of matched pairs whose relative order survives.
///
/// `pairs` are (source position, candidate position). Returns 1.0 for no
/// pairs.
pub fn order_preservation(pairs: &[(usize, usize)]) -> f64 {
    if pairs.is_empty() {
        return 1.0;
    }
    let mut sorted = pairs.to_vec();
    sorted.sort_unstable();
    let candidate_order: Vec<usize> = sorted.iter().map(|(_, c)| *c).collect();
    lis_length(&candidate_order) as f64 / pairs.len() as f64
}

/// Greedy best-first assignment on a similarity matrix.
///
/// Pairs are taken in descending similarity (ties by row, then column) as
/// long as both sides are free and the similarity reaches `min_similarity`.
/// Returns (row, column, similarity) triples.
pub fn greedy_assign(matrix: &[Vec<f64>], min_similarity: f64) -> Vec<(usize, usize, f64)> {
    let mut candidates: Vec<(usize, usize, f64)> = matrix
        .iter()
        .enumerate()
        .flat_map(|(i, row)| row.iter().enumerate().map(move |(j, s)| (i, j, *s)))
        .filter(|(_, _, s)| *s >= min_similarity)
        .collect();

    candidates.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
            .then(a.1.cmp(&b.1))
    });

    let rows = matrix.len();
    let cols = matrix.iter().map(|r| r.len()).max().unwrap_or(0);
    let mut row_used = vec![false; rows];
    let mut col_used = vec![false; cols];
    let mut assigned = Vec::new();

    for (i, j, s) in candidates {
        if row_used[i] || col_used[j] {
            continue;
        }
        row_used[i] = true;
        col_used[j] = true;
        assigned.push((i, j, s));
    }
    assigned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_sequence_similarity() {
        assert_eq!(level_sequence_similarity(&[1, 2, 2], &[1, 2, 2]), 1.0);
        assert_eq!(level_sequence_similarity(&[], &[]), 1.0);
        assert!((level_sequence_similarity(&[1, 2, 2, 1], &[1, 2, 1]) - 0.75).abs() < 1e-9);
        assert_eq!(level_sequence_similarity(&[1], &[]), 0.0);
    }

    #[test]
    fn test_count_similarity() {
        assert_eq!(count_similarity(0, 0), 1.0);
        assert_eq!(count_similarity(4, 2), 0.5);
    }

    #[test]
    fn test_lis() {
        assert_eq!(lis_length(&[0, 1, 2, 3]), 4);
        assert_eq!(lis_length(&[3, 2, 1, 0]), 1);
        assert_eq!(lis_length(&[0, 2, 1, 3]), 3);
        assert_eq!(lis_length(&[]), 0);
    }

    #[test]
    fn test_order_preservation() {
        assert_eq!(order_preservation(&[(0, 0), (1, 1), (2, 2)]), 1.0);
        assert_eq!(order_preservation(&[(0, 1), (1, 0)]), 0.5);
        assert_eq!(order_preservation(&[]), 1.0);
    }

    #[test]
    fn test_greedy_assign_best_first() {
        let matrix = vec![vec![0.9, 0.8], vec![0.95, 0.1]];
        let assigned = greedy_assign(&matrix, 0.5);
        // Row 1 takes column 0 first; row 0 falls back to column 1
        assert_eq!(assigned, vec![(1, 0, 0.95), (0, 1, 0.8)]);
    }

    #[test]
    fn test_greedy_assign_threshold() {
        let matrix = vec![vec![0.4], vec![0.3]];
        assert!(greedy_assign(&matrix, 0.5).is_empty());
    }
}
