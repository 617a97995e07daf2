//! The vector index contract.
//!
//! An index stores `(id, vector, metadata)` triples. Each entry stands for
//! one candidate question and points back at the chunk that produced it,
//! but nothing enforces that link: the pipeline keeps both sides in sync.

use crate::types::{ChunkIndex, DocumentId, FacultyScope};
use crate::vector::{Distance, VectorError, VectorId};
use serde::{Deserialize, Serialize};

/// Back-reference stored with every vector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub document_id: DocumentId,
    pub chunk_index: ChunkIndex,
    pub faculty_scope: FacultyScope,
}

impl VectorMetadata {
    pub fn new(document_id: DocumentId, chunk_index: ChunkIndex, faculty_scope: FacultyScope) -> Self {
        Self {
            document_id,
            chunk_index,
            faculty_scope,
        }
    }
}

/// Metadata predicate for search and bulk deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFilter {
    /// Matches every entry.
    All,
    /// `faculty_scope == F OR faculty_scope == ""`.
    FacultyOrGlobal(FacultyScope),
    /// `document_id == D`.
    Document(DocumentId),
}

impl MetadataFilter {
    /// The search filter for a caller's scope: unscoped callers see everything.
    pub fn for_scope(scope: &FacultyScope) -> Self {
        if scope.is_global() {
            Self::All
        } else {
            Self::FacultyOrGlobal(scope.clone())
        }
    }

    pub fn matches(&self, metadata: &VectorMetadata) -> bool {
        match self {
            Self::All => true,
            Self::FacultyOrGlobal(scope) => {
                metadata.faculty_scope == *scope || metadata.faculty_scope.is_global()
            }
            Self::Document(document_id) => metadata.document_id == *document_id,
        }
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: VectorId,
    pub metadata: VectorMetadata,
    pub distance: Distance,
}

/// A stored entry, as returned by listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: VectorId,
    pub vector: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// Filtered nearest-neighbour store for candidate-question vectors.
///
/// Implementations must be safe to share across threads; every method takes
/// `&self`.
pub trait VectorIndex: Send + Sync {
    /// Stores the vector under a fresh id and returns that id.
    fn insert(&self, vector: Vec<f32>, metadata: VectorMetadata) -> Result<VectorId, VectorError>;

    /// Up to `top_k` entries matching `filter`, closest first.
    ///
    /// Returning fewer than `top_k` hits is not an error.
    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>, VectorError>;

    /// Removes the given ids; unknown ids are ignored. Returns how many were removed.
    fn delete(&self, ids: &[VectorId]) -> Result<usize, VectorError>;

    /// Removes every entry matching `filter`. Returns how many were removed.
    fn delete_by_metadata(&self, filter: &MetadataFilter) -> Result<usize, VectorError>;

    /// Drops all entries. The index stays usable.
    fn reset(&self) -> Result<(), VectorError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in a stable order, for paging through the index.
    fn list(&self, offset: usize, limit: usize) -> Result<Vec<VectorEntry>, VectorError>;
}

/// Cosine similarity; zero-magnitude vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}
