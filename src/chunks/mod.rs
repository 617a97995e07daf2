//! Per-document chunk collections.
//!
//! A chunk carries its verbatim text and two parallel lists: the candidate
//! questions generated for it and the ids of their vectors. Position `i` in
//! both lists always refers to the same question.

mod file;
mod memory;

pub use file::FileChunkStore;
pub use memory::InMemoryChunkStore;

use crate::types::{ChunkIndex, DocumentId, get_utc_timestamp};
use crate::vector::VectorId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    #[serde(default)]
    pub candidate_questions: Vec<String>,
    #[serde(default)]
    pub vector_ids: Vec<VectorId>,
}

impl Chunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            candidate_questions: Vec::new(),
            vector_ids: Vec::new(),
        }
    }

    /// Appends a question together with the id of its vector.
    pub fn push_question(&mut self, question: impl Into<String>, vector_id: VectorId) {
        self.candidate_questions.push(question.into());
        self.vector_ids.push(vector_id);
    }

    /// Removes the pair at `position`, if both lists have one.
    pub fn remove_question(&mut self, position: usize) -> Option<(String, VectorId)> {
        if position >= self.candidate_questions.len() || position >= self.vector_ids.len() {
            return None;
        }
        let question = self.candidate_questions.remove(position);
        let vector_id = self.vector_ids.remove(position);
        Some((question, vector_id))
    }

    pub fn is_consistent(&self) -> bool {
        self.candidate_questions.len() == self.vector_ids.len()
    }

    pub fn question_count(&self) -> usize {
        self.candidate_questions.len()
    }
}

/// All chunks of one document, keyed by chunk index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkCollection {
    pub document_id: DocumentId,
    pub chunks: BTreeMap<ChunkIndex, Chunk>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ChunkCollection {
    pub fn new(document_id: DocumentId) -> Self {
        let now = get_utc_timestamp();
        Self {
            document_id,
            chunks: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = get_utc_timestamp();
    }

    pub fn vector_count(&self) -> usize {
        self.chunks.values().map(|chunk| chunk.vector_ids.len()).sum()
    }

    /// Chunks whose question and vector lists disagree in length.
    pub fn inconsistent_chunks(&self) -> Vec<ChunkIndex> {
        self.chunks
            .iter()
            .filter(|(_, chunk)| !chunk.is_consistent())
            .map(|(index, _)| *index)
            .collect()
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("A chunk collection for document '{0}' already exists")]
    AlreadyExists(DocumentId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt chunk collection at {}: {reason}\nSuggestion: Delete the file and re-index the document", .path.display())]
    Corrupt { path: PathBuf, reason: String },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Store of chunk collections, one per document.
///
/// Collections are written whole: `create_collection` and `put_collection`
/// replace everything stored for the document in one step.
pub trait ChunkStore: Send + Sync {
    /// Stores a new collection; fails if the document already has one.
    fn create_collection(&self, collection: ChunkCollection) -> StorageResult<()>;

    /// Replaces (or creates) the collection for `collection.document_id`.
    fn put_collection(&self, collection: ChunkCollection) -> StorageResult<()>;

    fn get_collection(&self, document_id: &DocumentId) -> StorageResult<Option<ChunkCollection>>;

    /// Returns whether a collection was removed. Missing collections are not an error.
    fn delete_collection(&self, document_id: &DocumentId) -> StorageResult<bool>;

    /// Every document that has a collection, sorted.
    fn document_ids(&self) -> StorageResult<Vec<DocumentId>>;

    fn contains(&self, document_id: &DocumentId) -> StorageResult<bool> {
        Ok(self.get_collection(document_id)?.is_some())
    }

    fn get_chunk(
        &self,
        document_id: &DocumentId,
        chunk_index: ChunkIndex,
    ) -> StorageResult<Option<Chunk>> {
        Ok(self
            .get_collection(document_id)?
            .and_then(|mut collection| collection.chunks.remove(&chunk_index)))
    }

    /// A window of a document's chunks in index order plus the total chunk count.
    /// `None` when the document has no collection.
    fn list_chunks(
        &self,
        document_id: &DocumentId,
        offset: usize,
        limit: usize,
    ) -> StorageResult<Option<(Vec<(ChunkIndex, Chunk)>, usize)>> {
        Ok(self.get_collection(document_id)?.map(|collection| {
            let total = collection.chunks.len();
            let items = collection
                .chunks
                .into_iter()
                .skip(offset)
                .take(limit)
                .collect();
            (items, total)
        }))
    }
}
