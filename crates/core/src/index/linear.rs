//! Exhaustive-scan index.
//!
//! The baseline every other variant is measured against: stores the
//! vectors verbatim and scores all of them on every query. Exact for both
//! metrics, O(n·d) per query.

use crate::math;
use crate::{ChunkId, Result};

use super::{check_query_dim, distance_to_similarity, Metric};

#[derive(Debug, Clone)]
pub struct LinearIndex {
    metric: Metric,
    vectors: Vec<Vec<f32>>,
    ids: Vec<ChunkId>,
    dim: usize,
}

impl LinearIndex {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            vectors: Vec::new(),
            ids: Vec::new(),
            dim: 0,
        }
    }

    /// Input is pre-validated by [`Index::build`].
    ///
    /// [`Index::build`]: super::Index::build
    pub(super) fn build(&mut self, vectors: Vec<Vec<f32>>, ids: Vec<ChunkId>) {
        self.dim = vectors.first().map(Vec::len).unwrap_or(0);
        self.vectors = vectors;
        self.ids = ids;
    }

    pub(super) fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(ChunkId, f32)>> {
        if k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }
        check_query_dim(self.dim, vector)?;

        let mut scored: Vec<(ChunkId, f32)> = Vec::with_capacity(self.vectors.len());
        for (id, vec) in self.ids.iter().zip(self.vectors.iter()) {
            let score = match self.metric {
                Metric::Cosine => math::cosine(vector, vec)?,
                Metric::Euclidean => distance_to_similarity(math::euclidean(vector, vec)?),
            };
            scored.push((id.clone(), score));
        }

        // Stable sort: equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        Ok(scored)
    }

    pub(super) fn metric(&self) -> Metric {
        self.metric
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ids(n: usize) -> Vec<ChunkId> {
        (0..n).map(|_| ChunkId::new()).collect()
    }

    #[test]
    fn cosine_ranks_exact_match_first() {
        let mut idx = LinearIndex::new(Metric::Cosine);
        let ids = make_ids(3);
        idx.build(
            vec![vec![0.0, 1.0, 0.0], vec![1.0, 0.0, 0.0], vec![0.0, -1.0, 0.0]],
            ids.clone(),
        );

        let hits = idx.query(&[0.0, 1.0, 0.0], 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, ids[0]);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(hits[2].0, ids[2]);
    }

    #[test]
    fn euclidean_scores_are_inverse_distance() {
        let mut idx = LinearIndex::new(Metric::Euclidean);
        let ids = make_ids(2);
        idx.build(vec![vec![0.0, 0.0], vec![3.0, 4.0]], ids.clone());

        let hits = idx.query(&[0.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].0, ids[0]);
        assert!((hits[0].1 - 1.0).abs() < 1e-6); // distance 0 → score 1
        assert!((hits[1].1 - 1.0 / 6.0).abs() < 1e-6); // distance 5 → 1/(1+5)
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut idx = LinearIndex::new(Metric::Cosine);
        let ids = make_ids(3);
        // All identical → identical scores; stable sort must preserve order.
        idx.build(
            vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]],
            ids.clone(),
        );

        let hits = idx.query(&[1.0, 0.0], 3).unwrap();
        let got: Vec<&ChunkId> = hits.iter().map(|(id, _)| id).collect();
        assert_eq!(got, ids.iter().collect::<Vec<_>>());
    }

    #[test]
    fn k_zero_returns_empty() {
        let mut idx = LinearIndex::new(Metric::Cosine);
        idx.build(vec![vec![1.0]], make_ids(1));
        assert!(idx.query(&[1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn query_dim_mismatch_is_rejected() {
        let mut idx = LinearIndex::new(Metric::Cosine);
        idx.build(vec![vec![1.0, 0.0, 0.0]], make_ids(1));
        assert!(idx.query(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn truncates_to_k() {
        let mut idx = LinearIndex::new(Metric::Cosine);
        idx.build(
            vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0]],
            make_ids(3),
        );
        assert_eq!(idx.query(&[1.0, 0.0], 2).unwrap().len(), 2);
    }
}
