//! Score normalization and fusion.
//!
//! Both the generic connector (which decomposes a fusion into child searches)
//! and backends that run fusion inside their own session call into this module, so a fusion ranks
//! the same way whichever path executed it.
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use crate::descriptor::{Fusion, FusionMethod, QueryDescriptor, SortDirection};
use crate::types::{NativeHit, ResultRow};

/// Smoothing constant for rank fusion, the usual value from the RRF literature.
pub const RRF_K: f64 = 60.0;

/// Which native scores a backend considers better.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreDirection {
    /// Smaller is better, e.g. a distance.
    Ascending,
    /// Larger is better, e.g. a similarity.
    Descending,
}

/// How a backend's native score maps onto the shared, higher-is-better scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreScale {
    /// Non-negative distance, mapped to `1 / (1 + d)`.
    Distance,
    /// Similarity in `[-1, 1]`, mapped to `[0, 1]`.
    Similarity,
    /// Unbounded non-negative relevance such as BM25, mapped to `s / (1 + s)`.
    Relevance,
    /// Already normalized.
    Identity,
    /// A sort key; the value itself is the score, negated for ascending order.
    Ordinal(SortDirection),
}

impl ScoreScale {
    pub fn direction(self) -> ScoreDirection {
        match self {
            Self::Distance | Self::Ordinal(SortDirection::Asc) => ScoreDirection::Ascending,
            Self::Similarity | Self::Relevance | Self::Identity | Self::Ordinal(SortDirection::Desc) => {
                ScoreDirection::Descending
            }
        }
    }

    pub fn normalize(self, native: f64) -> f64 {
        match self {
            Self::Distance => 1.0 / (1.0 + native.max(0.0)),
            Self::Similarity => (native.clamp(-1.0, 1.0) + 1.0) / 2.0,
            Self::Relevance => {
                let s = native.max(0.0);
                s / (1.0 + s)
            }
            Self::Identity | Self::Ordinal(SortDirection::Desc) => native,
            Self::Ordinal(SortDirection::Asc) => -native,
        }
    }
}

/// Best first: higher score, then collection and document id ascending.
pub fn best_first(a: &ResultRow, b: &ResultRow) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.collection.cmp(&b.collection))
        .then_with(|| a.doc_id.cmp(&b.doc_id))
}

/// Turn native hits into rows. Hits with a non-finite score are dropped.
pub fn normalize_hits(collection: &str, hits: Vec<NativeHit>, scale: ScoreScale) -> Vec<ResultRow> {
    hits.into_iter()
        .filter(|hit| hit.score.is_finite())
        .map(|hit| ResultRow {
            collection: collection.to_string(),
            score: scale.normalize(hit.score),
            native_score: hit.score,
            doc_id: hit.doc_id,
            fields: hit.fields,
        })
        .collect()
}

/// Normalize the hits of one leaf descriptor and apply its dense similarity
/// threshold, if any.
pub fn score_leaf(
    collection: &str,
    descriptor: &QueryDescriptor,
    hits: Vec<NativeHit>,
    scale: ScoreScale,
) -> Vec<ResultRow> {
    let mut rows = normalize_hits(collection, hits, scale);
    if let QueryDescriptor::DenseMatch(dense) = descriptor {
        if let Some(threshold) = dense.similarity() {
            rows.retain(|row| row.score >= threshold);
        }
    }
    rows
}

/// Combine the scored rows of each fusion child into one best-first list.
///
/// `children[i]` holds the rows of `fusion.children()[i]`. A document missing
/// from a child contributes nothing for that child.
#[allow(clippy::cast_precision_loss)]
pub fn fuse(children: Vec<Vec<ResultRow>>, fusion: &Fusion) -> Vec<ResultRow> {
    let mut fused: BTreeMap<(String, String), ResultRow> = BTreeMap::new();

    for (mut rows, &weight) in children.into_iter().zip(fusion.weights()) {
        rows.sort_by(best_first);
        let mut seen = HashSet::new();
        rows.retain(|row| seen.insert((row.collection.clone(), row.doc_id.clone())));

        for (index, row) in rows.into_iter().enumerate() {
            let contribution = match fusion.method() {
                FusionMethod::WeightedSum => weight * row.score,
                FusionMethod::RankFusion => weight / (RRF_K + (index + 1) as f64),
            };
            fused
                .entry((row.collection.clone(), row.doc_id.clone()))
                .and_modify(|existing| existing.score += contribution)
                .or_insert(ResultRow { score: contribution, ..row });
        }
    }

    let mut rows: Vec<ResultRow> = fused
        .into_values()
        .map(|mut row| {
            row.native_score = row.score;
            row
        })
        .collect();
    rows.sort_by(best_first);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DenseMatch, Metric, TextMatch};

    fn row(collection: &str, doc_id: &str, score: f64) -> ResultRow {
        ResultRow {
            collection: collection.into(),
            doc_id: doc_id.into(),
            native_score: score,
            score,
            fields: Default::default(),
        }
    }

    fn two_text(method: FusionMethod, weights: Vec<f64>) -> Fusion {
        let a = TextMatch::new("title", "rust").expect("text").into();
        let b = TextMatch::new("body", "rust").expect("text").into();
        Fusion::new(vec![a, b], method, weights).expect("fusion")
    }

    #[test]
    fn weighted_sum_combines_matching_children() {
        let fusion = two_text(FusionMethod::WeightedSum, vec![0.7, 0.3]);
        let fused = fuse(vec![vec![row("kb", "d", 0.8)], vec![row("kb", "d", 0.5)]], &fusion);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 0.71).abs() < 1e-9);
        assert!((fused[0].native_score - 0.71).abs() < 1e-9);
    }

    #[test]
    fn weighted_sum_has_no_zero_fill() {
        let fusion = two_text(FusionMethod::WeightedSum, vec![0.5, 0.5]);
        let fused = fuse(vec![vec![row("kb", "a", 1.0)], vec![row("kb", "b", 0.4)]], &fusion);
        assert_eq!(fused[0].doc_id, "a");
        assert!((fused[0].score - 0.5).abs() < 1e-9);
        assert!((fused[1].score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn rank_fusion_uses_one_based_ranks() {
        let fusion = two_text(FusionMethod::RankFusion, vec![1.0, 1.0]);
        let first = vec![row("kb", "a", 0.9), row("kb", "b", 0.8)];
        let second = vec![row("kb", "b", 5.0)];
        let fused = fuse(vec![first, second], &fusion);
        assert_eq!(fused[0].doc_id, "b");
        assert!((fused[0].score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert!((fused[1].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn rank_fusion_ignores_input_order() {
        let fusion = two_text(FusionMethod::RankFusion, vec![1.0, 1.0]);
        let shuffled = vec![row("kb", "b", 0.2), row("kb", "a", 0.9)];
        let fused = fuse(vec![shuffled, vec![]], &fusion);
        assert_eq!(fused[0].doc_id, "a");
    }

    #[test]
    fn duplicate_hits_within_a_child_count_once() {
        let fusion = two_text(FusionMethod::WeightedSum, vec![1.0, 1.0]);
        let fused = fuse(vec![vec![row("kb", "a", 0.6), row("kb", "a", 0.4)], vec![]], &fusion);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn ties_break_by_collection_then_doc() {
        let mut rows = vec![row("b", "1", 0.5), row("a", "2", 0.5), row("a", "1", 0.5), row("c", "0", 0.9)];
        rows.sort_by(best_first);
        let keys: Vec<_> = rows.iter().map(|r| (r.collection.as_str(), r.doc_id.as_str())).collect();
        assert_eq!(keys, vec![("c", "0"), ("a", "1"), ("a", "2"), ("b", "1")]);
    }

    #[test]
    fn scales_map_to_higher_is_better() {
        assert_eq!(ScoreScale::Distance.normalize(0.0), 1.0);
        assert!(ScoreScale::Distance.normalize(0.5) > ScoreScale::Distance.normalize(2.0));
        assert_eq!(ScoreScale::Similarity.normalize(1.0), 1.0);
        assert_eq!(ScoreScale::Similarity.normalize(-1.0), 0.0);
        assert_eq!(ScoreScale::Relevance.normalize(1.0), 0.5);
        assert_eq!(ScoreScale::Ordinal(SortDirection::Asc).normalize(3.0), -3.0);
        assert_eq!(ScoreScale::Distance.direction(), ScoreDirection::Ascending);
        assert_eq!(ScoreScale::Relevance.direction(), ScoreDirection::Descending);
    }

    #[test]
    fn normalize_drops_non_finite_scores() {
        let hits = vec![NativeHit::new("a", 1.0), NativeHit::new("b", f64::NAN)];
        let rows = normalize_hits("kb", hits, ScoreScale::Relevance);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].native_score, 1.0);
    }

    #[test]
    fn similarity_threshold_filters_dense_rows() {
        let dense: QueryDescriptor = DenseMatch::new("embedding", vec![1.0], Metric::L2, 5)
            .and_then(|d| d.with_similarity(0.5))
            .expect("dense")
            .into();
        let hits = vec![NativeHit::new("near", 0.2), NativeHit::new("far", 3.0)];
        let rows = score_leaf("kb", &dense, hits, ScoreScale::Distance);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].doc_id, "near");
    }
}
