//! Structural comparison of document outlines.
//!
//! The score blends tree shape (level sequence, node count, order of matched
//! nodes) with the semantic similarity of nodes paired level by level.
//! Broken internal links in the candidate cap the result.

mod embedding;
mod matching;

pub use embedding::{cosine, Embedder, HashingEmbedder};
pub use matching::{count_similarity, greedy_assign, level_sequence_similarity, lis_length, order_preservation};

use crate::error::{Error, Result};
use crate::model::{NodeId, Outline};
use crate::recognition::normalize_text;
use crate::score::{mean, StageKind, ValidationScore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Number of missing headings listed by name in an issue.
const MISSING_LISTED: usize = 5;

/// Options for the structure stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureOptions {
    /// Score below which the stage fails
    pub threshold: f64,

    /// Weight of tree shape in the overall score
    pub structural_weight: f64,

    /// Weight of semantic similarity in the overall score
    pub semantic_weight: f64,

    /// Minimum title similarity for two nodes to be paired
    pub min_pair_similarity: f64,

    /// Matched pairs below this similarity count as weak
    pub weak_match_similarity: f64,

    /// Score cap applied when a candidate link is broken
    pub broken_reference_cap: f64,
}

impl StructureOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pass threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the minimum pair similarity.
    pub fn with_min_pair_similarity(mut self, similarity: f64) -> Self {
        self.min_pair_similarity = similarity;
        self
    }
}

impl Default for StructureOptions {
    fn default() -> Self {
        Self {
            threshold: 0.90,
            structural_weight: 0.4,
            semantic_weight: 0.6,
            min_pair_similarity: 0.5,
            weak_match_similarity: 0.7,
            broken_reference_cap: 0.8,
        }
    }
}

/// A source node paired with a candidate node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeMatch {
    /// Node in the source outline
    pub source: NodeId,
    /// Node in the candidate outline
    pub candidate: NodeId,
    /// Pair similarity in [0, 1]
    pub similarity: f64,
}

/// A heading that kept its title but moved to another level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelChange {
    /// Node in the source outline
    pub source: NodeId,
    /// Node in the candidate outline
    pub candidate: NodeId,
    /// Level in the source
    pub expected: u8,
    /// Level in the candidate
    pub found: u8,
}

/// Structure stage output.
#[derive(Debug, Clone)]
pub struct StructureReport {
    /// Stage score
    pub score: ValidationScore,

    /// Tree-shape component
    pub structural: f64,

    /// Semantic component
    pub semantic: f64,

    /// Paired nodes
    pub matches: Vec<NodeMatch>,

    /// Source nodes with no partner
    pub missing: Vec<NodeId>,

    /// Candidate nodes with no partner
    pub extra: Vec<NodeId>,

    /// Headings found at a different level
    pub level_changes: Vec<LevelChange>,

    /// Candidate link targets that resolve nowhere
    pub broken_references: Vec<String>,
}

/// Compares source and candidate outlines.
#[derive(Clone)]
pub struct StructuralComparator {
    options: StructureOptions,
    embedder: Arc<dyn Embedder>,
}

impl StructuralComparator {
    /// Create a comparator using [`HashingEmbedder`].
    pub fn new(options: StructureOptions) -> Self {
        Self {
            options,
            embedder: Arc::new(HashingEmbedder::new()),
        }
    }

    /// Use a different embedder.
    pub fn with_embedder<E: Embedder + 'static>(mut self, embedder: E) -> Self {
        self.embedder = Arc::new(embedder);
        self
    }

    /// Set a shared embedder.
    pub fn set_embedder(&mut self, embedder: Arc<dyn Embedder>) {
        self.embedder = embedder;
    }

    /// Stage options.
    pub fn options(&self) -> &StructureOptions {
        &self.options
    }

    /// Compare two outlines.
    pub fn compare(&self, source: &Outline, candidate: &Outline) -> Result<StructureReport> {
        let opts = &self.options;

        if source.is_empty() && candidate.is_empty() {
            let mut report = self.empty_report(1.0);
            self.apply_reference_cap(source, candidate, &mut report);
            return Ok(report);
        }
        if source.is_empty() || candidate.is_empty() {
            let mut report = self.empty_report(0.0);
            report.missing = source.preorder();
            report.extra = candidate.preorder();
            report.score.add_issue(format!(
                "Outline mismatch: source has {} heading(s), candidate has {}",
                source.len(),
                candidate.len()
            ));
            return Ok(report);
        }

        let src_embed = self.embed_outline(source)?;
        let cand_embed = self.embed_outline(candidate)?;

        // Semantic pairing, level by level
        let mut matches = Vec::new();
        let mut levels: Vec<u8> = source.levels();
        levels.extend(candidate.levels());
        levels.sort_unstable();
        levels.dedup();

        for level in levels {
            let src_ids = source.nodes_at_level(level);
            let cand_ids = candidate.nodes_at_level(level);
            if src_ids.is_empty() || cand_ids.is_empty() {
                continue;
            }

            let matrix: Vec<Vec<f64>> = src_ids
                .iter()
                .map(|s| {
                    cand_ids
                        .iter()
                        .map(|c| title_similarity(&src_embed[s], &cand_embed[c]))
                        .collect()
                })
                .collect();

            for (i, j, title_sim) in greedy_assign(&matrix, opts.min_pair_similarity) {
                let (s, c) = (src_ids[i], cand_ids[j]);
                let similarity = match digest_similarity(&src_embed[&s], &cand_embed[&c]) {
                    Some(digest_sim) => (title_sim + digest_sim) / 2.0,
                    None => title_sim,
                };
                matches.push(NodeMatch {
                    source: s,
                    candidate: c,
                    similarity,
                });
            }
        }

        let matched_src: HashSet<NodeId> = matches.iter().map(|m| m.source).collect();
        let matched_cand: HashSet<NodeId> = matches.iter().map(|m| m.candidate).collect();
        let src_order = source.preorder();
        let cand_order = candidate.preorder();
        let missing: Vec<NodeId> = src_order.iter().copied().filter(|id| !matched_src.contains(id)).collect();
        let extra: Vec<NodeId> = cand_order.iter().copied().filter(|id| !matched_cand.contains(id)).collect();

        let total = (source.len() + candidate.len()) as f64;
        let unmatched = (missing.len() + extra.len()) as f64;
        let pair_sims: Vec<f64> = matches.iter().map(|m| m.similarity).collect();
        let semantic = mean(&pair_sims).unwrap_or(0.0) * (1.0 - unmatched / total);

        // Tree shape
        let src_levels: Vec<u8> = src_order.iter().filter_map(|id| source.node(*id)).map(|n| n.level).collect();
        let cand_levels: Vec<u8> = cand_order.iter().filter_map(|id| candidate.node(*id)).map(|n| n.level).collect();
        let src_pos: HashMap<NodeId, usize> = src_order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let cand_pos: HashMap<NodeId, usize> = cand_order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let positions: Vec<(usize, usize)> = matches
            .iter()
            .filter_map(|m| Some((*src_pos.get(&m.source)?, *cand_pos.get(&m.candidate)?)))
            .collect();
        let order = if positions.is_empty() {
            0.0
        } else {
            order_preservation(&positions)
        };
        let structural = 0.5 * level_sequence_similarity(&src_levels, &cand_levels)
            + 0.25 * count_similarity(source.len(), candidate.len())
            + 0.25 * order;

        let overall = opts.structural_weight * structural + opts.semantic_weight * semantic;
        let level_changes = find_level_changes(source, candidate, &missing, &extra);

        let mut report = StructureReport {
            score: ValidationScore::new(StageKind::Structure, overall, opts.threshold),
            structural,
            semantic,
            matches,
            missing,
            extra,
            level_changes,
            broken_references: Vec::new(),
        };
        self.add_issues(source, candidate, &mut report);
        self.apply_reference_cap(source, candidate, &mut report);

        log::debug!(
            "structure score {:.3} (structural {:.3}, semantic {:.3}, {} pairs)",
            report.score.score,
            structural,
            semantic,
            report.matches.len()
        );
        Ok(report)
    }

    fn empty_report(&self, value: f64) -> StructureReport {
        StructureReport {
            score: ValidationScore::new(StageKind::Structure, value, self.options.threshold),
            structural: value,
            semantic: value,
            matches: Vec::new(),
            missing: Vec::new(),
            extra: Vec::new(),
            level_changes: Vec::new(),
            broken_references: Vec::new(),
        }
    }

    fn embed_outline(&self, outline: &Outline) -> Result<HashMap<NodeId, NodeEmbedding>> {
        let mut texts: Vec<&str> = Vec::with_capacity(outline.len() * 2);
        for (_, node) in outline.iter() {
            texts.push(&node.title);
            texts.push(&node.digest.excerpt);
        }
        let vectors = self.embedder.embed_batch(&texts).map_err(|e| {
            Error::stage_unavailable(StageKind::Structure, format!("embedding failed: {}", e))
        })?;
        if vectors.len() != texts.len() {
            return Err(Error::stage_unavailable(
                StageKind::Structure,
                format!("embedder returned {} vectors for {} texts", vectors.len(), texts.len()),
            ));
        }

        let mut vectors = vectors.into_iter();
        let mut embedded = HashMap::with_capacity(outline.len());
        for (id, node) in outline.iter() {
            let title = vectors.next().unwrap_or_default();
            let digest = vectors.next().unwrap_or_default();
            embedded.insert(
                id,
                NodeEmbedding {
                    title_key: normalize_text(&node.title).to_lowercase(),
                    checksum: node.digest.checksum.clone(),
                    title,
                    digest,
                },
            );
        }
        Ok(embedded)
    }

    fn add_issues(&self, source: &Outline, candidate: &Outline, report: &mut StructureReport) {
        if !report.missing.is_empty() {
            let names: Vec<String> = report
                .missing
                .iter()
                .take(MISSING_LISTED)
                .filter_map(|id| source.node(*id))
                .map(|n| format!("'{}'", n.title))
                .collect();
            let more = report.missing.len().saturating_sub(MISSING_LISTED);
            let suffix = if more > 0 { format!(" (+{} more)", more) } else { String::new() };
            report
                .score
                .add_issue(format!("Missing heading(s): {}{}", names.join(", "), suffix));
        }

        for change in &report.level_changes {
            if let Some(node) = source.node(change.source) {
                report.score.add_issue(format!(
                    "Heading '{}' changed level: h{} -> h{}",
                    node.title, change.expected, change.found
                ));
            }
        }

        let (n_src, n_cand) = (source.len() as f64, candidate.len() as f64);
        if n_src > 0.0 && (n_src - n_cand).abs() / n_src > 0.10 {
            report.score.add_issue(format!(
                "Heading count differs: source {} vs candidate {}",
                source.len(),
                candidate.len()
            ));
        }

        if !report.matches.is_empty() {
            let weak = report
                .matches
                .iter()
                .filter(|m| m.similarity < self.options.weak_match_similarity)
                .count();
            if weak as f64 / report.matches.len() as f64 > 0.20 {
                report.score.add_issue(format!(
                    "{} of {} matched sections are weak matches",
                    weak,
                    report.matches.len()
                ));
            }
        }
    }

    fn apply_reference_cap(&self, source: &Outline, candidate: &Outline, report: &mut StructureReport) {
        // Links already broken in the source are not the candidate's fault
        let inherited: HashSet<&str> = source
            .broken_references()
            .iter()
            .map(|r| r.target.as_str())
            .collect();
        let broken: Vec<String> = candidate
            .broken_references()
            .iter()
            .filter(|r| !inherited.contains(r.target.as_str()))
            .map(|r| r.target.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if broken.is_empty() {
            return;
        }

        let cap = self.options.broken_reference_cap;
        if report.score.score > cap {
            let threshold = report.score.threshold;
            let issues = std::mem::take(&mut report.score.issues);
            report.score = ValidationScore::new(StageKind::Structure, cap, threshold);
            report.score.issues = issues;
        }
        report.score.add_issue(format!(
            "Broken cross-reference(s): {}",
            broken.iter().map(|t| format!("#{}", t)).collect::<Vec<_>>().join(", ")
        ));
        report.broken_references = broken;
    }
}

struct NodeEmbedding {
    title_key: String,
    checksum: String,
    title: Vec<f32>,
    digest: Vec<f32>,
}

fn title_similarity(a: &NodeEmbedding, b: &NodeEmbedding) -> f64 {
    if a.title_key == b.title_key {
        1.0
    } else {
        cosine(&a.title, &b.title)
    }
}

/// `None` when both sections are empty.
fn digest_similarity(a: &NodeEmbedding, b: &NodeEmbedding) -> Option<f64> {
    match (a.checksum.is_empty(), b.checksum.is_empty()) {
        (true, true) => None,
        _ if a.checksum == b.checksum => Some(1.0),
        _ => Some(cosine(&a.digest, &b.digest)),
    }
}

/// Pair unmatched source and candidate headings that share a title.
fn find_level_changes(source: &Outline, candidate: &Outline, missing: &[NodeId], extra: &[NodeId]) -> Vec<LevelChange> {
    let mut taken = HashSet::new();
    let mut changes = Vec::new();
    for s in missing {
        let Some(src) = source.node(*s) else { continue };
        let key = normalize_text(&src.title).to_lowercase();
        let found = extra.iter().find(|c| {
            !taken.contains(*c)
                && candidate
                    .node(**c)
                    .is_some_and(|n| n.level != src.level && normalize_text(&n.title).to_lowercase() == key)
        });
        if let Some(c) = found {
            taken.insert(*c);
            if let Some(cand) = candidate.node(*c) {
                changes.push(LevelChange {
                    source: *s,
                    candidate: *c,
                    expected: src.level,
                    found: cand.level,
                });
            }
        }
    }
    changes
}
