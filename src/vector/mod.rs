//! Embedding, reranking and vector search.
//!
//! Text reaches a model only through [`Embedder`], which normalizes and
//! segments it first. Vectors are stored in a [`VectorIndex`]; the bundled
//! [`InMemoryVectorIndex`] does an exact cosine scan and snapshots to disk.

mod embedding;
mod index;
mod memory;
mod metadata;
mod rerank;
mod segment;
mod types;

pub use embedding::{
    Embedder, EmbeddingGenerator, FastEmbedGenerator, HASHING_MODEL_NAME,
    HashingEmbeddingGenerator, create_embedding_generator, parse_embedding_model,
};
pub use index::{
    MetadataFilter, SearchHit, VectorEntry, VectorIndex, VectorMetadata, cosine_similarity,
};
pub use memory::InMemoryVectorIndex;
pub use metadata::IndexSnapshotMetadata;
pub use rerank::{
    CrossEncoder, FastEmbedCrossEncoder, LEXICAL_MODEL_NAME, LexicalCrossEncoder,
    create_cross_encoder, parse_reranker_model,
};
pub use segment::{DictionarySegmenter, Segmenter, normalize_whitespace};
pub use types::{Distance, VectorDimension, VectorError, VectorId};
