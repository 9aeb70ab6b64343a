//! Quiver — embedded in-memory vector database.
//!
//! Embeddings are organised into a containment tree: a [`Library`] holds
//! [`Document`]s, a document holds [`Chunk`]s, and every chunk carries a
//! fixed-dimensional embedding plus string metadata. Nearest-neighbour
//! queries run against one of three interchangeable index structures —
//! exhaustive scan, KD-tree, or random-hyperplane LSH — and the whole
//! database can be captured to (and restored from) a single JSON snapshot
//! file.
//!
//! The first non-empty embedding admitted under a library freezes that
//! library's dimensionality; every later chunk must match it. The engine
//! enforces this — it is not an application-level property.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use quiver::{Database, Settings};
//!
//! let db = Database::new(Settings::default());
//!
//! let library = db.create_library("papers", None, Default::default()).unwrap();
//! let doc = db
//!     .create_document(&library.id, "attention is all you need", None, Default::default())
//!     .unwrap();
//! db.create_chunk(&library.id, &doc.id, "scaled dot-product attention", vec![0.0, 1.0, 0.0], Default::default())
//!     .unwrap();
//!
//! // Explicit build is optional — the first search installs a linear
//! // fallback index with the default metric.
//! db.build_index(&library.id, "linear", "cosine").unwrap();
//! let hits = db.search(&library.id, &[0.0, 1.0, 0.0], 1, Default::default()).unwrap();
//! assert_eq!(hits.len(), 1);
//! ```

pub mod config;
pub mod index;
pub mod math;
pub mod registry;
pub mod snapshot;
pub mod store;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use ulid::Ulid;

pub use config::{init_logging, LshSettings, Settings};
pub use index::{Index, IndexKind, Metric};
pub use registry::{IndexInfo, IndexMeta, IndexRegistry};
pub use snapshot::{SnapshotFile, SnapshotInfo};
pub use store::{Store, StoreState};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum QuiverError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("embedding dimensionality mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("unknown index algorithm '{algorithm}'. Available: {}", .available.join(", "))]
    InvalidAlgorithm {
        algorithm: String,
        available: Vec<String>,
    },
    #[error("{algorithm} does not support metric '{metric}'. Supported: {}", .supported.join(", "))]
    InvalidMetric {
        algorithm: String,
        metric: String,
        supported: Vec<String>,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Reserved: produced only by embedders that disable the lazy search
    /// fallback and demand an explicit `build_index` first.
    #[error("index not built")]
    IndexNotBuilt,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, QuiverError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A stable, time-sortable identifier for a [`Library`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LibraryId(pub String);

impl LibraryId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for LibraryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LibraryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stable, time-sortable identifier for a [`Document`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stable, time-sortable identifier for a [`Chunk`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub String);

impl ChunkId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for ChunkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Top-level container of documents.
///
/// `embedding_dim` is unset until the first non-empty embedding is admitted
/// under the library, then frozen: the only transition is `None → Some(d)`,
/// serialized through the store's writer lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
    pub description: Option<String>,
    pub metadata: HashMap<String, String>,
    pub embedding_dim: Option<usize>,
}

/// A titled grouping of chunks, belonging to one library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub library_id: LibraryId,
    pub title: String,
    pub description: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// A text fragment with an embedding vector; leaf entity of the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, String>,
}

/// Partial update for a library. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct LibraryPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

/// Partial update for a document. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

/// Partial update for a chunk. `None` fields are left unchanged. A new
/// embedding re-runs the library dimensionality rule but does *not*
/// invalidate a built index — searches serve the stale vector until the
/// next rebuild.
#[derive(Debug, Clone, Default)]
pub struct ChunkPatch {
    pub text: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<HashMap<String, String>>,
}

/// One hydrated search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub score: f32,
    pub text: String,
    pub metadata: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

const MAX_NAME_LENGTH: usize = 255;
const MAX_DESCRIPTION_LENGTH: usize = 1000;
const MAX_TEXT_LENGTH: usize = 10_000;

fn validate_name(field: &'static str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(QuiverError::InvalidInput(format!(
            "{field} must not be empty"
        )));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(QuiverError::InvalidInput(format!(
            "{field} must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_description(value: Option<&str>) -> Result<Option<String>> {
    match value {
        None => Ok(None),
        Some(desc) => {
            if desc.chars().count() > MAX_DESCRIPTION_LENGTH {
                return Err(QuiverError::InvalidInput(format!(
                    "description must be at most {MAX_DESCRIPTION_LENGTH} characters"
                )));
            }
            Ok(Some(desc.to_string()))
        }
    }
}

fn validate_text(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(QuiverError::InvalidInput(
            "text must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_TEXT_LENGTH {
        return Err(QuiverError::InvalidInput(format!(
            "text must be at most {MAX_TEXT_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        return Err(QuiverError::InvalidInput(
            "embedding must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Trim keys and values; drop keys that are empty after trimming.
fn sanitize_metadata(metadata: HashMap<String, String>) -> HashMap<String, String> {
    metadata
        .into_iter()
        .filter_map(|(key, value)| {
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Database facade
// ---------------------------------------------------------------------------

/// The service facade: composes the [`Store`], the [`IndexRegistry`] and
/// the snapshot engine, and enforces the rules that cross components —
/// the library dimensionality freeze, the chunk ownership cross-check and
/// the cascade of a library delete into its index.
///
/// All methods take `&self`; the facade is safe to share across threads.
/// Where both locks are needed, the store's is always acquired before the
/// registry's.
pub struct Database {
    settings: Settings,
    store: Arc<Store>,
    registry: IndexRegistry,
}

impl Database {
    pub fn new(settings: Settings) -> Self {
        let store = Arc::new(Store::new());
        let registry =
            IndexRegistry::new(store.clone(), settings.default_metric, settings.lsh);
        Self {
            settings,
            store,
            registry,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Libraries
    // ------------------------------------------------------------------

    pub fn create_library(
        &self,
        name: &str,
        description: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> Result<Library> {
        let library = Library {
            id: LibraryId::new(),
            name: validate_name("name", name)?,
            description: validate_description(description)?,
            metadata: sanitize_metadata(metadata),
            embedding_dim: None,
        };
        let created = self.store.create_library(library);
        info!(library = %created.id, "library created");
        Ok(created)
    }

    pub fn get_library(&self, id: &LibraryId) -> Result<Library> {
        self.store
            .get_library(id)
            .ok_or_else(|| QuiverError::NotFound {
                kind: "Library",
                id: id.to_string(),
            })
    }

    pub fn list_libraries(&self) -> Vec<Library> {
        self.store.list_libraries()
    }

    pub fn update_library(&self, id: &LibraryId, patch: LibraryPatch) -> Result<Library> {
        let mut library = self.get_library(id)?;
        if let Some(name) = patch.name {
            library.name = validate_name("name", &name)?;
        }
        if let Some(description) = patch.description {
            library.description = validate_description(Some(&description))?;
        }
        if let Some(metadata) = patch.metadata {
            library.metadata = sanitize_metadata(metadata);
        }
        let updated = self.store.update_library(library);
        info!(library = %updated.id, "library updated");
        Ok(updated)
    }

    /// Cascade delete: the library's documents and chunks go with it, and
    /// its index (if any) is cleared. Unknown ids are a no-op.
    pub fn delete_library(&self, id: &LibraryId) {
        self.store.delete_library(id);
        self.registry.clear(id);
        info!(library = %id, "library deleted");
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    pub fn create_document(
        &self,
        library_id: &LibraryId,
        title: &str,
        description: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> Result<Document> {
        self.get_library(library_id)?;
        let document = Document {
            id: DocumentId::new(),
            library_id: library_id.clone(),
            title: validate_name("title", title)?,
            description: validate_description(description)?,
            metadata: sanitize_metadata(metadata),
        };
        let created = self.store.create_document(document);
        info!(document = %created.id, library = %library_id, "document created");
        Ok(created)
    }

    pub fn get_document(&self, id: &DocumentId) -> Result<Document> {
        self.store
            .get_document(id)
            .ok_or_else(|| QuiverError::NotFound {
                kind: "Document",
                id: id.to_string(),
            })
    }

    pub fn list_documents(&self, library_id: &LibraryId) -> Vec<Document> {
        self.store.list_documents(library_id)
    }

    pub fn update_document(&self, id: &DocumentId, patch: DocumentPatch) -> Result<Document> {
        let mut document = self.get_document(id)?;
        if let Some(title) = patch.title {
            document.title = validate_name("title", &title)?;
        }
        if let Some(description) = patch.description {
            document.description = validate_description(Some(&description))?;
        }
        if let Some(metadata) = patch.metadata {
            document.metadata = sanitize_metadata(metadata);
        }
        let updated = self.store.update_document(document);
        info!(document = %updated.id, "document updated");
        Ok(updated)
    }

    /// Cascade delete: the document's chunks go with it. Unknown ids are a
    /// no-op.
    pub fn delete_document(&self, id: &DocumentId) {
        self.store.delete_document(id);
        info!(document = %id, "document deleted");
    }

    // ------------------------------------------------------------------
    // Chunks
    // ------------------------------------------------------------------

    /// Create a chunk under `(library_id, document_id)`.
    ///
    /// The pair must name a document that actually belongs to that library
    /// (`NotFound` otherwise — a chunk cannot be attached through another
    /// library). A non-empty embedding must match the library's frozen
    /// dimensionality; the first embedding freezes it.
    pub fn create_chunk(
        &self,
        library_id: &LibraryId,
        document_id: &DocumentId,
        text: &str,
        embedding: Vec<f32>,
        metadata: HashMap<String, String>,
    ) -> Result<Chunk> {
        validate_embedding(&embedding)?;
        let document = self.get_document(document_id)?;
        if &document.library_id != library_id {
            return Err(QuiverError::NotFound {
                kind: "Document",
                id: document_id.to_string(),
            });
        }

        let chunk = Chunk {
            id: ChunkId::new(),
            document_id: document_id.clone(),
            text: validate_text(text)?,
            embedding,
            metadata: sanitize_metadata(metadata),
        };
        let created = self.store.admit_chunk(&document.library_id, chunk)?;
        info!(chunk = %created.id, document = %document_id, "chunk created");
        Ok(created)
    }

    pub fn get_chunk(&self, id: &ChunkId) -> Result<Chunk> {
        self.store
            .get_chunk(id)
            .ok_or_else(|| QuiverError::NotFound {
                kind: "Chunk",
                id: id.to_string(),
            })
    }

    pub fn list_chunks(&self, library_id: &LibraryId) -> Vec<Chunk> {
        self.store.list_chunks(library_id)
    }

    /// Patch a chunk. A new embedding re-runs the dimensionality rule.
    ///
    /// The library's index is not invalidated: searches keep serving the
    /// vector the index was built with until the next rebuild.
    pub fn update_chunk(&self, id: &ChunkId, patch: ChunkPatch) -> Result<Chunk> {
        let mut chunk = self.get_chunk(id)?;
        if let Some(embedding) = patch.embedding {
            validate_embedding(&embedding)?;
            chunk.embedding = embedding;
        }
        if let Some(text) = patch.text {
            chunk.text = validate_text(&text)?;
        }
        if let Some(metadata) = patch.metadata {
            chunk.metadata = sanitize_metadata(metadata);
        }

        let document = self.get_document(&chunk.document_id)?;
        let updated = self.store.admit_chunk(&document.library_id, chunk)?;
        info!(chunk = %updated.id, "chunk updated");
        Ok(updated)
    }

    /// Unknown ids are a no-op. The chunk's id may linger in a built index;
    /// searches drop it on hydration.
    pub fn delete_chunk(&self, id: &ChunkId) {
        self.store.delete_chunk(id);
        info!(chunk = %id, "chunk deleted");
    }

    // ------------------------------------------------------------------
    // Index and search
    // ------------------------------------------------------------------

    /// Build (or rebuild) the library's index.
    pub fn build_index(
        &self,
        library_id: &LibraryId,
        algorithm: &str,
        metric: &str,
    ) -> Result<()> {
        self.get_library(library_id)?;
        self.registry.build_index(library_id, algorithm, metric)
    }

    /// k-nearest-neighbour search, optionally filtered by exact metadata
    /// equality. Results are hydrated; ids whose chunk has been deleted
    /// since the index was built are dropped, never surfaced.
    pub fn search(
        &self,
        library_id: &LibraryId,
        vector: &[f32],
        k: usize,
        filters: HashMap<String, String>,
    ) -> Result<Vec<SearchHit>> {
        if vector.is_empty() {
            return Err(QuiverError::InvalidInput(
                "query vector must not be empty".to_string(),
            ));
        }
        let filters = sanitize_metadata(filters);
        let results = self.registry.search(library_id, vector, k, &filters)?;

        Ok(results
            .into_iter()
            .filter_map(|(chunk_id, score)| {
                self.store.get_chunk(&chunk_id).map(|chunk| SearchHit {
                    chunk_id,
                    document_id: chunk.document_id,
                    score,
                    text: chunk.text,
                    metadata: chunk.metadata,
                })
            })
            .collect())
    }

    pub fn index_info(&self, library_id: &LibraryId) -> IndexInfo {
        self.registry.index_info(library_id)
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Persist all tables and index metadata. `None` writes a timestamped
    /// `snapshot_YYYYMMDD_HHMMSS.json` under the configured data
    /// directory; returns the final path.
    pub fn save_snapshot(&self, path: Option<PathBuf>) -> Result<PathBuf> {
        snapshot::save(&self.store, &self.registry, &self.settings.data_dir, path)
    }

    /// Restore tables and rebuild indexes from a snapshot file. `None`
    /// tries `data_dir/snapshot.json` and treats a missing file as a
    /// logged no-op.
    pub fn load_snapshot(&self, path: Option<PathBuf>) -> Result<()> {
        snapshot::load(&self.store, &self.registry, &self.settings.data_dir, path)
    }

    /// Snapshot files under the data directory, newest first.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        snapshot::list(&self.settings.data_dir)
    }

    /// Delete one snapshot file by id.
    pub fn delete_snapshot(&self, id: &str) -> Result<()> {
        snapshot::delete(&self.settings.data_dir, id)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
