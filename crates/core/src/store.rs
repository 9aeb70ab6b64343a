//! In-memory entity tables.
//!
//! Three `HashMap` tables — libraries, documents, chunks — behind one
//! `parking_lot::RwLock`. Reads run in parallel; writes are exclusive, and
//! the lock's fair queueing blocks newly arriving readers while a writer
//! waits, so writers cannot starve. Every listing returns owned clones, so
//! callers never iterate while holding the lock.
//!
//! The store is deliberately dumb about cross-entity rules: the one
//! exception is [`Store::admit_chunk`], because the library's
//! `embedding_dim` freeze must happen under the same writer acquisition as
//! the chunk insert.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{Chunk, ChunkId, Document, DocumentId, Library, LibraryId, QuiverError, Result};

/// A deep copy of all three tables, id-sorted so serialized snapshots are
/// byte-stable across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    pub libraries: Vec<Library>,
    pub documents: Vec<Document>,
    pub chunks: Vec<Chunk>,
}

#[derive(Default)]
struct Tables {
    libraries: HashMap<LibraryId, Library>,
    documents: HashMap<DocumentId, Document>,
    chunks: HashMap<ChunkId, Chunk>,
}

/// Authoritative single-node entity storage.
#[derive(Default)]
pub struct Store {
    inner: RwLock<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Libraries
    // ------------------------------------------------------------------

    pub fn create_library(&self, library: Library) -> Library {
        let mut tables = self.inner.write();
        tables.libraries.insert(library.id.clone(), library.clone());
        library
    }

    pub fn get_library(&self, id: &LibraryId) -> Option<Library> {
        self.inner.read().libraries.get(id).cloned()
    }

    pub fn list_libraries(&self) -> Vec<Library> {
        let tables = self.inner.read();
        let mut libraries: Vec<Library> = tables.libraries.values().cloned().collect();
        libraries.sort_by(|a, b| a.id.cmp(&b.id));
        libraries
    }

    /// Upsert: an unknown id is inserted rather than rejected.
    pub fn update_library(&self, library: Library) -> Library {
        let mut tables = self.inner.write();
        tables.libraries.insert(library.id.clone(), library.clone());
        library
    }

    /// Cascade: removes the library's documents and their chunks in the
    /// same writer-locked step. Absent library is a no-op.
    pub fn delete_library(&self, id: &LibraryId) {
        let mut tables = self.inner.write();
        let doc_ids: HashSet<DocumentId> = tables
            .documents
            .values()
            .filter(|d| &d.library_id == id)
            .map(|d| d.id.clone())
            .collect();

        tables.chunks.retain(|_, c| !doc_ids.contains(&c.document_id));
        tables.documents.retain(|doc_id, _| !doc_ids.contains(doc_id));
        tables.libraries.remove(id);
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    pub fn create_document(&self, document: Document) -> Document {
        let mut tables = self.inner.write();
        tables.documents.insert(document.id.clone(), document.clone());
        document
    }

    pub fn get_document(&self, id: &DocumentId) -> Option<Document> {
        self.inner.read().documents.get(id).cloned()
    }

    pub fn list_documents(&self, library_id: &LibraryId) -> Vec<Document> {
        let tables = self.inner.read();
        let mut documents: Vec<Document> = tables
            .documents
            .values()
            .filter(|d| &d.library_id == library_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        documents
    }

    pub fn update_document(&self, document: Document) -> Document {
        let mut tables = self.inner.write();
        tables.documents.insert(document.id.clone(), document.clone());
        document
    }

    /// Cascade: removes the document's chunks first. Absent document is a
    /// no-op.
    pub fn delete_document(&self, id: &DocumentId) {
        let mut tables = self.inner.write();
        tables.chunks.retain(|_, c| &c.document_id != id);
        tables.documents.remove(id);
    }

    // ------------------------------------------------------------------
    // Chunks
    // ------------------------------------------------------------------

    pub fn get_chunk(&self, id: &ChunkId) -> Option<Chunk> {
        self.inner.read().chunks.get(id).cloned()
    }

    pub fn list_chunks(&self, library_id: &LibraryId) -> Vec<Chunk> {
        let tables = self.inner.read();
        let doc_ids: HashSet<&DocumentId> = tables
            .documents
            .values()
            .filter(|d| &d.library_id == library_id)
            .map(|d| &d.id)
            .collect();
        let mut chunks: Vec<Chunk> = tables
            .chunks
            .values()
            .filter(|c| doc_ids.contains(&c.document_id))
            .cloned()
            .collect();
        chunks.sort_by(|a, b| a.id.cmp(&b.id));
        chunks
    }

    /// Insert or replace a chunk, enforcing the owning library's embedding
    /// dimensionality under a single writer acquisition.
    ///
    /// The `None → Some(d)` freeze of `Library::embedding_dim` happens
    /// here, atomically with the chunk insert — two racing first inserts
    /// cannot freeze two different dimensions.
    pub fn admit_chunk(&self, library_id: &LibraryId, chunk: Chunk) -> Result<Chunk> {
        let mut tables = self.inner.write();
        let library =
            tables
                .libraries
                .get_mut(library_id)
                .ok_or_else(|| QuiverError::NotFound {
                    kind: "Library",
                    id: library_id.to_string(),
                })?;

        if !chunk.embedding.is_empty() {
            match library.embedding_dim {
                None => library.embedding_dim = Some(chunk.embedding.len()),
                Some(dim) if dim != chunk.embedding.len() => {
                    return Err(QuiverError::DimensionMismatch {
                        expected: dim,
                        got: chunk.embedding.len(),
                    });
                }
                Some(_) => {}
            }
        }

        tables.chunks.insert(chunk.id.clone(), chunk.clone());
        Ok(chunk)
    }

    pub fn delete_chunk(&self, id: &ChunkId) {
        self.inner.write().chunks.remove(id);
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Read-only deep copy of all three tables.
    pub fn snapshot(&self) -> StoreState {
        let tables = self.inner.read();
        let mut state = StoreState {
            libraries: tables.libraries.values().cloned().collect(),
            documents: tables.documents.values().cloned().collect(),
            chunks: tables.chunks.values().cloned().collect(),
        };
        state.libraries.sort_by(|a, b| a.id.cmp(&b.id));
        state.documents.sort_by(|a, b| a.id.cmp(&b.id));
        state.chunks.sort_by(|a, b| a.id.cmp(&b.id));
        state
    }

    /// Replace all three tables wholesale.
    pub fn load_snapshot(&self, state: StoreState) {
        let mut tables = self.inner.write();
        tables.libraries = state
            .libraries
            .into_iter()
            .map(|l| (l.id.clone(), l))
            .collect();
        tables.documents = state
            .documents
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();
        tables.chunks = state.chunks.into_iter().map(|c| (c.id.clone(), c)).collect();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
