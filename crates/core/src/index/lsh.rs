//! Random-hyperplane LSH index, cosine metric only.
//!
//! Each hash table owns `num_planes` unit-length hyperplane normals drawn
//! from a standard normal distribution. A vector's signature in a table is
//! the bitmask of sign tests against those planes; vectors whose angles
//! are close tend to land in the same bucket. Queries probe the exact
//! bucket plus the two one-bit-flip neighbours (multi-probe) in every
//! table, then re-rank the candidate set by exact cosine similarity.
//!
//! The generator is re-seeded on every `build`, so the same
//! `(seed, num_tables, num_planes, dimension)` always produces the same
//! plane sets — a snapshot restore rebuilds byte-identical tables.

use std::collections::{HashMap, HashSet};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::config::LshSettings;
use crate::math;
use crate::{ChunkId, QuiverError, Result};

use super::check_query_dim;

/// Signatures are packed into a `u64`, one bit per plane.
const MAX_PLANES: usize = 64;

type Bucket = Vec<(ChunkId, Vec<f32>)>;

#[derive(Debug, Clone)]
pub struct LshIndex {
    num_planes: usize,
    num_tables: usize,
    seed: u64,
    /// Per table: `num_planes` unit-normal hyperplanes.
    planes: Vec<Vec<Vec<f32>>>,
    /// Per table: signature → occupants.
    tables: Vec<HashMap<u64, Bucket>>,
    dim: usize,
}

impl LshIndex {
    pub fn new(settings: &LshSettings) -> Result<Self> {
        if settings.num_planes == 0 || settings.num_planes > MAX_PLANES {
            return Err(QuiverError::InvalidInput(format!(
                "LSH num_planes must be in 1..={MAX_PLANES}, got {}",
                settings.num_planes
            )));
        }
        if settings.num_tables == 0 {
            return Err(QuiverError::InvalidInput(
                "LSH num_tables must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            num_planes: settings.num_planes,
            num_tables: settings.num_tables,
            seed: settings.seed,
            planes: Vec::new(),
            tables: Vec::new(),
            dim: 0,
        })
    }

    /// Input is pre-validated by [`Index::build`].
    ///
    /// [`Index::build`]: super::Index::build
    pub(super) fn build(&mut self, vectors: Vec<Vec<f32>>, ids: Vec<ChunkId>) {
        self.planes.clear();
        self.tables.clear();
        self.dim = vectors.first().map(Vec::len).unwrap_or(0);
        if self.dim == 0 {
            return;
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        for _ in 0..self.num_tables {
            let mut table_planes = Vec::with_capacity(self.num_planes);
            for _ in 0..self.num_planes {
                let mut plane: Vec<f32> =
                    (0..self.dim).map(|_| rng.sample(StandardNormal)).collect();
                // Normalise after generation so the sign test depends only
                // on angle.
                let norm = math::norm(&plane);
                if norm > 0.0 {
                    for x in plane.iter_mut() {
                        *x /= norm;
                    }
                }
                table_planes.push(plane);
            }
            self.planes.push(table_planes);
        }

        self.tables = vec![HashMap::new(); self.num_tables];
        for (vec, id) in vectors.into_iter().zip(ids) {
            for (table, planes) in self.tables.iter_mut().zip(self.planes.iter()) {
                let signature = signature(&vec, planes);
                table
                    .entry(signature)
                    .or_insert_with(Vec::new)
                    .push((id.clone(), vec.clone()));
            }
        }
    }

    pub(super) fn query(&self, vector: &[f32], k: usize) -> Result<Vec<(ChunkId, f32)>> {
        if k == 0 || self.tables.is_empty() {
            return Ok(Vec::new());
        }
        check_query_dim(self.dim, vector)?;

        // Candidate set keyed by id; the first vector seen for an id wins.
        let mut seen: HashSet<ChunkId> = HashSet::new();
        let mut candidates: Vec<(ChunkId, Vec<f32>)> = Vec::new();

        for (table, planes) in self.tables.iter().zip(self.planes.iter()) {
            let sig = signature(vector, planes);

            let mut probe = |s: u64| {
                if let Some(bucket) = table.get(&s) {
                    for (id, vec) in bucket {
                        if seen.insert(id.clone()) {
                            candidates.push((id.clone(), vec.clone()));
                        }
                    }
                }
            };

            probe(sig);
            // Multi-probe: one-bit-flip neighbours of the exact signature.
            for bit in 0..self.num_planes.min(2) {
                probe(sig ^ (1 << bit));
            }
        }

        let mut scored: Vec<(ChunkId, f32)> = Vec::with_capacity(candidates.len());
        for (id, vec) in candidates {
            scored.push((id, math::cosine(vector, &vec)?));
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        Ok(scored)
    }

    #[cfg(test)]
    fn plane_sets(&self) -> &[Vec<Vec<f32>>] {
        &self.planes
    }
}

/// Sign-test `vec` against each plane; bit `i` is set iff
/// `dot(vec, plane_i) >= 0`.
fn signature(vec: &[f32], planes: &[Vec<f32>]) -> u64 {
    let mut sig = 0u64;
    for (i, plane) in planes.iter().enumerate() {
        let dot: f32 = vec.iter().zip(plane.iter()).map(|(x, y)| x * y).sum();
        if dot >= 0.0 {
            sig |= 1 << i;
        }
    }
    sig
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
