//! The index family: three interchangeable nearest-neighbour structures
//! behind one four-operation contract.
//!
//! Every variant exposes `build`, `query`, `metric` and `kind`. Scores are
//! unified as similarities (larger = more similar): cosine similarity is
//! used directly, Euclidean distance `d` is mapped through `1 / (1 + d)`.
//!
//! Dispatch is a tagged variant rather than a trait object — there are
//! exactly three cases, they are known at compile time, and the registry
//! wants to move indexes in and out of an `Arc` without worrying about
//! object safety.

mod kdtree;
mod linear;
mod lsh;

pub use kdtree::KdTreeIndex;
pub use linear::LinearIndex;
pub use lsh::LshIndex;

use serde::{Deserialize, Serialize};

use crate::config::LshSettings;
use crate::{ChunkId, QuiverError, Result};

/// Distance metric used to compare embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Euclidean,
}

impl Metric {
    /// Parse a metric name, case-insensitively. `None` for unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Some(Metric::Cosine),
            "euclidean" => Some(Metric::Euclidean),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Linear,
    KdTree,
    Lsh,
}

impl IndexKind {
    pub const ALL: [IndexKind; 3] = [IndexKind::Linear, IndexKind::KdTree, IndexKind::Lsh];

    /// Parse an algorithm name, case-insensitively. `None` for unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Some(IndexKind::Linear),
            "kdtree" => Some(IndexKind::KdTree),
            "lsh" => Some(IndexKind::Lsh),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Linear => "linear",
            IndexKind::KdTree => "kdtree",
            IndexKind::Lsh => "lsh",
        }
    }

    /// The metrics each algorithm can serve. The KD-tree prunes on raw
    /// Euclidean distance and LSH's sign-test signatures only approximate
    /// angular similarity, so neither generalises to the other metric.
    pub fn supported_metrics(&self) -> &'static [Metric] {
        match self {
            IndexKind::Linear => &[Metric::Cosine, Metric::Euclidean],
            IndexKind::KdTree => &[Metric::Euclidean],
            IndexKind::Lsh => &[Metric::Cosine],
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convert a Euclidean distance into a similarity score in `(0, 1]`.
pub(crate) fn distance_to_similarity(d: f32) -> f32 {
    1.0 / (1.0 + d)
}

/// A built (or buildable) nearest-neighbour index over one library's chunks.
///
/// The index owns copies of the vectors it was built from and holds only
/// chunk ids back into the store — it never keeps a chunk alive, and
/// callers are expected to skip ids whose chunk has since been deleted.
#[derive(Debug, Clone)]
pub enum Index {
    Linear(LinearIndex),
    KdTree(KdTreeIndex),
    Lsh(LshIndex),
}

impl Index {
    /// Construct an empty index for `(kind, metric)`, validating the
    /// compatibility table.
    pub fn new(kind: IndexKind, metric: Metric, lsh: &LshSettings) -> Result<Self> {
        let supported = kind.supported_metrics();
        if !supported.contains(&metric) {
            return Err(QuiverError::InvalidMetric {
                algorithm: kind.as_str().to_string(),
                metric: metric.as_str().to_string(),
                supported: supported.iter().map(|m| m.as_str().to_string()).collect(),
            });
        }
        Ok(match kind {
            IndexKind::Linear => Index::Linear(LinearIndex::new(metric)),
            IndexKind::KdTree => Index::KdTree(KdTreeIndex::new()),
            IndexKind::Lsh => Index::Lsh(LshIndex::new(lsh)?),
        })
    }

    /// Build the index from `(vector, id)` pairs, replacing any prior state.
    ///
    /// Empty input builds an empty index. Fails with
    /// [`QuiverError::InvalidInput`] when `vectors` and `ids` differ in
    /// length or the vectors are ragged.
    pub fn build(&mut self, vectors: Vec<Vec<f32>>, ids: Vec<ChunkId>) -> Result<()> {
        validate_build_input(&vectors, &ids)?;
        match self {
            Index::Linear(idx) => idx.build(vectors, ids),
            Index::KdTree(idx) => idx.build(vectors, ids),
            Index::Lsh(idx) => idx.build(vectors, ids),
        }
        Ok(())
    }

    /// Return at most `k` `(id, score)` pairs sorted by score descending.
    ///
    /// Empty result for `k == 0` or an empty index. Fails with
    /// [`QuiverError::DimensionMismatch`] when the query length disagrees
    /// with the built dimensionality.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(ChunkId, f32)>> {
        match self {
            Index::Linear(idx) => idx.query(vector, k),
            Index::KdTree(idx) => idx.query(vector, k),
            Index::Lsh(idx) => idx.query(vector, k),
        }
    }

    pub fn metric(&self) -> Metric {
        match self {
            Index::Linear(idx) => idx.metric(),
            Index::KdTree(_) => Metric::Euclidean,
            Index::Lsh(_) => Metric::Cosine,
        }
    }

    pub fn kind(&self) -> IndexKind {
        match self {
            Index::Linear(_) => IndexKind::Linear,
            Index::KdTree(_) => IndexKind::KdTree,
            Index::Lsh(_) => IndexKind::Lsh,
        }
    }
}

fn validate_build_input(vectors: &[Vec<f32>], ids: &[ChunkId]) -> Result<()> {
    if vectors.len() != ids.len() {
        return Err(QuiverError::InvalidInput(format!(
            "vectors and ids must have the same length ({} vs {})",
            vectors.len(),
            ids.len()
        )));
    }
    if let Some(first) = vectors.first() {
        if vectors.iter().any(|v| v.len() != first.len()) {
            return Err(QuiverError::InvalidInput(
                "all vectors must have the same dimensionality".to_string(),
            ));
        }
    }
    Ok(())
}

/// Guard a query against a built dimensionality. `dim == 0` means the
/// index is empty and any query length is acceptable (it will return no
/// results anyway).
pub(crate) fn check_query_dim(dim: usize, vector: &[f32]) -> Result<()> {
    if dim != 0 && vector.len() != dim {
        return Err(QuiverError::DimensionMismatch {
            expected: dim,
            got: vector.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
