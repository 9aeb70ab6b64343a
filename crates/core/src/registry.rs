//! Per-library index registry.
//!
//! Owns, for each library, the active [`Index`] and its
//! `{algorithm, metric}` metadata, behind a reader-writer lock that is
//! independent of the store's. Where both locks are needed the store's is
//! always taken first.
//!
//! Indexes are handed out as `Arc` clones: a build constructs the new
//! index entirely outside the registry lock and installs it under a brief
//! write guard, while an in-flight search keeps querying the instance it
//! cloned under the read guard. Searches therefore never block builds and
//! never observe a half-replaced index.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::LshSettings;
use crate::index::{Index, IndexKind, Metric};
use crate::store::Store;
use crate::{ChunkId, LibraryId, QuiverError, Result};

/// Overfetch factors: the index is asked for more than `k` results so the
/// metadata post-filter can still yield `k` items. Best-effort — a rare
/// filter value can still return fewer (see `search`).
const SEARCH_MULTIPLIER: usize = 3;
const SEARCH_BUFFER: usize = 50;

/// Rebuildable description of a library's index, persisted in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub algorithm: IndexKind,
    pub metric: Metric,
}

/// What `index_info` reports. `algorithm` is `None` when no index has
/// been built for the library (the wire layer renders this as `"none"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub library_id: LibraryId,
    pub algorithm: Option<IndexKind>,
    pub metric: Metric,
}

#[derive(Default)]
struct RegistryState {
    indices: HashMap<LibraryId, Arc<Index>>,
    meta: HashMap<LibraryId, IndexMeta>,
}

pub struct IndexRegistry {
    store: Arc<Store>,
    default_metric: Metric,
    lsh: LshSettings,
    inner: RwLock<RegistryState>,
}

impl IndexRegistry {
    pub fn new(store: Arc<Store>, default_metric: Metric, lsh: LshSettings) -> Self {
        Self {
            store,
            default_metric,
            lsh,
            inner: RwLock::new(RegistryState::default()),
        }
    }

    /// Build (or rebuild) the index for a library from its current chunks.
    ///
    /// `algorithm` and `metric` are parsed case-insensitively; unknown or
    /// incompatible combinations fail with [`QuiverError::InvalidAlgorithm`]
    /// or [`QuiverError::InvalidMetric`]. Chunks with empty embeddings are
    /// skipped defensively.
    pub fn build_index(
        &self,
        library_id: &LibraryId,
        algorithm: &str,
        metric: &str,
    ) -> Result<()> {
        let kind = IndexKind::parse(algorithm).ok_or_else(|| QuiverError::InvalidAlgorithm {
            algorithm: algorithm.to_string(),
            available: IndexKind::ALL
                .iter()
                .map(|k| k.as_str().to_string())
                .collect(),
        })?;
        let metric = Metric::parse(metric).ok_or_else(|| QuiverError::InvalidMetric {
            algorithm: kind.as_str().to_string(),
            metric: metric.to_string(),
            supported: kind
                .supported_metrics()
                .iter()
                .map(|m| m.as_str().to_string())
                .collect(),
        })?;

        // Compatibility is validated by the factory.
        let mut index = Index::new(kind, metric, &self.lsh)?;

        let chunks = self.store.list_chunks(library_id);
        let chunk_count = chunks.len();
        let (vectors, ids): (Vec<Vec<f32>>, Vec<ChunkId>) = chunks
            .into_iter()
            .filter(|c| !c.embedding.is_empty())
            .map(|c| (c.embedding, c.id))
            .unzip();
        index.build(vectors, ids)?;

        let mut state = self.inner.write();
        state.indices.insert(library_id.clone(), Arc::new(index));
        state.meta.insert(
            library_id.clone(),
            IndexMeta {
                algorithm: kind,
                metric,
            },
        );
        drop(state);

        info!(
            library = %library_id,
            algorithm = %kind,
            metric = %metric,
            chunks = chunk_count,
            "index built"
        );
        Ok(())
    }

    /// k-nearest-neighbour search over a library's active index.
    ///
    /// Falls back to a lazily built Linear index (process default metric)
    /// when nothing has been built yet. With `filters`, only results whose
    /// chunk metadata contains every `(key, value)` pair survive; ids
    /// whose chunk has been deleted are skipped rather than surfaced.
    pub fn search(
        &self,
        library_id: &LibraryId,
        vector: &[f32],
        k: usize,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<(ChunkId, f32)>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let Some(index) = self.active_or_fallback(library_id)? else {
            return Ok(Vec::new());
        };

        let query_k = overfetch(k, !filters.is_empty());
        let mut results = index.query(vector, query_k)?;

        if !filters.is_empty() {
            results.retain(|(id, _)| match self.store.get_chunk(id) {
                Some(chunk) => filters
                    .iter()
                    .all(|(key, value)| chunk.metadata.get(key) == Some(value)),
                None => false,
            });
        }

        results.truncate(k);
        Ok(results)
    }

    /// The library's index metadata, or the process defaults when nothing
    /// has been built.
    pub fn index_info(&self, library_id: &LibraryId) -> IndexInfo {
        let meta = self.inner.read().meta.get(library_id).copied();
        match meta {
            Some(meta) => IndexInfo {
                library_id: library_id.clone(),
                algorithm: Some(meta.algorithm),
                metric: meta.metric,
            },
            None => IndexInfo {
                library_id: library_id.clone(),
                algorithm: None,
                metric: self.default_metric,
            },
        }
    }

    /// Drop a library's index and metadata. Absent entry is a no-op.
    pub fn clear(&self, library_id: &LibraryId) {
        let mut state = self.inner.write();
        let had_index = state.indices.remove(library_id).is_some();
        state.meta.remove(library_id);
        drop(state);

        if had_index {
            info!(library = %library_id, "index cleared");
        }
    }

    /// Snapshot of all `{library → {algorithm, metric}}` pairs, for
    /// persistence.
    pub fn metadata(&self) -> HashMap<LibraryId, IndexMeta> {
        self.inner.read().meta.clone()
    }

    /// Rebuild every index described by `metadata`, e.g. after a snapshot
    /// load. A single corrupt entry must not block the rest: failures are
    /// logged and skipped.
    pub fn rebuild(&self, metadata: &HashMap<LibraryId, IndexMeta>) {
        for (library_id, meta) in metadata {
            if let Err(err) =
                self.build_index(library_id, meta.algorithm.as_str(), meta.metric.as_str())
            {
                warn!(library = %library_id, error = %err, "failed to rebuild index");
            }
        }
    }

    /// The active index for a library, lazily installing a Linear fallback
    /// when none exists and the library has at least one embedded chunk.
    fn active_or_fallback(&self, library_id: &LibraryId) -> Result<Option<Arc<Index>>> {
        if let Some(index) = self.inner.read().indices.get(library_id) {
            return Ok(Some(index.clone()));
        }

        let (vectors, ids): (Vec<Vec<f32>>, Vec<ChunkId>) = self
            .store
            .list_chunks(library_id)
            .into_iter()
            .filter(|c| !c.embedding.is_empty())
            .map(|c| (c.embedding, c.id))
            .unzip();
        if ids.is_empty() {
            return Ok(None);
        }

        let mut index = Index::new(IndexKind::Linear, self.default_metric, &self.lsh)?;
        index.build(vectors, ids)?;
        let index = Arc::new(index);

        let mut state = self.inner.write();
        state
            .indices
            .insert(library_id.clone(), index.clone());
        state.meta.insert(
            library_id.clone(),
            IndexMeta {
                algorithm: IndexKind::Linear,
                metric: self.default_metric,
            },
        );
        drop(state);

        debug!(library = %library_id, "installed lazy linear fallback index");
        Ok(Some(index))
    }
}

/// `max(k, min(k·m, k+b))` — doubled factors when a metadata filter will
/// discard part of the result set.
fn overfetch(k: usize, has_filters: bool) -> usize {
    let (multiplier, buffer) = if has_filters {
        (SEARCH_MULTIPLIER * 2, SEARCH_BUFFER * 2)
    } else {
        (SEARCH_MULTIPLIER, SEARCH_BUFFER)
    };
    k.max((k * multiplier).min(k + buffer))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
