//! KD-tree index, Euclidean metric only.
//!
//! Built balanced, top-down: at depth `d` the point set is sorted along
//! axis `d mod D` and split at the positional median; the tree is never
//! rebalanced afterwards. Nodes live in a contiguous arena with
//! `Option<u32>` child links, so the whole tree moves in and out of the
//! registry as one allocation.
//!
//! Queries keep a bounded max-heap of the k best distances seen so far and
//! prune the far subtree whenever the splitting plane is further away than
//! the current worst candidate.

use std::collections::BinaryHeap;

use crate::math;
use crate::{ChunkId, Result};

use super::{check_query_dim, distance_to_similarity};

#[derive(Debug, Clone)]
struct KdNode {
    point: Vec<f32>,
    id: ChunkId,
    axis: usize,
    left: Option<u32>,
    right: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct KdTreeIndex {
    nodes: Vec<KdNode>,
    root: Option<u32>,
    dim: usize,
}

/// Max-heap entry ordered by distance, worst candidate at the top.
struct Candidate {
    dist: f32,
    id: ChunkId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.dist.total_cmp(&other.dist) == std::cmp::Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist.total_cmp(&other.dist)
    }
}

impl KdTreeIndex {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            dim: 0,
        }
    }

    /// Input is pre-validated by [`Index::build`].
    ///
    /// [`Index::build`]: super::Index::build
    pub(super) fn build(&mut self, vectors: Vec<Vec<f32>>, ids: Vec<ChunkId>) {
        self.nodes.clear();
        self.root = None;
        self.dim = vectors.first().map(Vec::len).unwrap_or(0);
        if self.dim == 0 {
            return;
        }

        let pairs: Vec<(Vec<f32>, ChunkId)> = vectors.into_iter().zip(ids).collect();
        self.nodes.reserve(pairs.len());
        self.root = Self::build_node(&mut self.nodes, pairs, 0, self.dim);
    }

    fn build_node(
        nodes: &mut Vec<KdNode>,
        mut pairs: Vec<(Vec<f32>, ChunkId)>,
        depth: usize,
        dim: usize,
    ) -> Option<u32> {
        let axis = depth % dim;
        pairs.sort_by(|a, b| a.0[axis].total_cmp(&b.0[axis]));

        let median = pairs.len() / 2;
        let right = pairs.split_off((median + 1).min(pairs.len()));
        let (point, id) = pairs.pop()?; // empty input → no node
        let left = Self::build_node(nodes, pairs, depth + 1, dim);
        let right = Self::build_node(nodes, right, depth + 1, dim);

        let slot = nodes.len() as u32;
        nodes.push(KdNode {
            point,
            id,
            axis,
            left,
            right,
        });
        Some(slot)
    }

    pub(super) fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(ChunkId, f32)>> {
        if k == 0 || self.nodes.is_empty() {
            return Ok(Vec::new());
        }
        check_query_dim(self.dim, vector)?;

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
        self.search(self.root, vector, k, &mut heap)?;

        // `into_sorted_vec` is ascending by distance — best first after the
        // similarity mapping.
        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| (c.id, distance_to_similarity(c.dist)))
            .collect())
    }

    fn search(
        &self,
        slot: Option<u32>,
        vector: &[f32],
        k: usize,
        heap: &mut BinaryHeap<Candidate>,
    ) -> Result<()> {
        let Some(slot) = slot else {
            return Ok(());
        };
        let node = &self.nodes[slot as usize];

        let dist = math::euclidean(vector, &node.point)?;
        heap.push(Candidate {
            dist,
            id: node.id.clone(),
        });
        if heap.len() > k {
            heap.pop();
        }

        let diff = vector[node.axis] - node.point[node.axis];
        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        self.search(near, vector, k, heap)?;

        // The far side can only matter if the splitting plane is closer than
        // the worst candidate, or the heap is not yet full.
        let worst = heap.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
        if heap.len() < k || diff.abs() < worst {
            self.search(far, vector, k, heap)?;
        }
        Ok(())
    }
}

impl Default for KdTreeIndex {
    fn default() -> Self {
        Self::new()
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

    fn brute_force_top_k(
        vectors: &[Vec<f32>],
        ids: &[ChunkId],
        query: &[f32],
        k: usize,
    ) -> Vec<ChunkId> {
        let mut scored: Vec<(ChunkId, f32)> = ids
            .iter()
            .zip(vectors.iter())
            .map(|(id, v)| (id.clone(), math::euclidean(query, v).unwrap()))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.into_iter().take(k).map(|(id, _)| id).collect()
    }

    #[test]
    fn exact_match_is_top_result() {
        let mut idx = KdTreeIndex::new();
        let ids = make_ids(3);
        idx.build(
            vec![vec![0.0, 1.0, 0.0], vec![1.0, 0.0, 0.0], vec![5.0, 5.0, 5.0]],
            ids.clone(),
        );

        let hits = idx.query(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, ids[0]);
        assert!((hits[0].1 - 1.0).abs() < 1e-6); // distance 0 → score 1
    }

    #[test]
    fn results_sorted_by_similarity_descending() {
        let mut idx = KdTreeIndex::new();
        let ids = make_ids(4);
        idx.build(
            vec![
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![2.0, 0.0],
                vec![3.0, 0.0],
            ],
            ids,
        );

        let hits = idx.query(&[0.0, 0.0], 4).unwrap();
        for pair in hits.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn matches_brute_force_on_random_points() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);

        let n = 200;
        let dim = 6;
        let vectors: Vec<Vec<f32>> = (0..n)
            .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();
        let ids = make_ids(n);

        let mut idx = KdTreeIndex::new();
        idx.build(vectors.clone(), ids.clone());

        for k in [1, 5, 17] {
            let query: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let got: Vec<ChunkId> = idx
                .query(&query, k)
                .unwrap()
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            let expected = brute_force_top_k(&vectors, &ids, &query, k);
            assert_eq!(got, expected, "k={k}");
        }
    }

    #[test]
    fn empty_build_then_query_is_empty() {
        let mut idx = KdTreeIndex::new();
        idx.build(Vec::new(), Vec::new());
        assert!(idx.query(&[1.0, 2.0], 3).unwrap().is_empty());
    }

    #[test]
    fn query_dim_mismatch_is_rejected() {
        let mut idx = KdTreeIndex::new();
        idx.build(vec![vec![1.0, 2.0, 3.0]], make_ids(1));
        assert!(idx.query(&[1.0], 1).is_err());
    }

    #[test]
    fn k_larger_than_point_count_returns_all() {
        let mut idx = KdTreeIndex::new();
        idx.build(vec![vec![0.0], vec![1.0]], make_ids(2));
        assert_eq!(idx.query(&[0.5], 10).unwrap().len(), 2);
    }
}
