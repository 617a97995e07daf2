//! Question-anchored retrieval for grounded answers.
//!
//! Documents are indexed through synthetic candidate questions: every chunk
//! gets a handful of questions it answers, and those questions (not the
//! chunk text) are embedded and searched. Hits resolve back to chunks,
//! which a cross-encoder reranks before they are handed to generation.

pub mod chunks;
pub mod config;
pub mod error;
pub mod external;
pub mod pipeline;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use chunks::{
    Chunk, ChunkCollection, ChunkStore, FileChunkStore, InMemoryChunkStore, StorageError,
    StorageResult,
};
pub use config::{RebuildFailurePolicy, Settings};
pub use error::{ErrorKind, RagError, RagResult, Service};
pub use external::{
    AnswerGenerator, DocumentLocator, DocumentRecord, DocumentStore, ExternalError,
    ExternalResult, InMemoryDocumentStore, QueryTranslator, QuestionGenerator,
    parse_question_list,
};
pub use pipeline::{
    Answer, ChunkView, ConsistencyReport, DeletionReport, IndexReport, MaintenanceGate,
    PipelineOptions, PreparedChunk, RagPipeline, RankedContext, RebuildFailure, RebuildReport,
    RetrieveOptions, Timeouts,
};
pub use types::{ChunkIndex, DocumentId, FacultyScope, Page};
pub use vector::{
    CrossEncoder, Embedder, EmbeddingGenerator, InMemoryVectorIndex, MetadataFilter, VectorId,
    VectorIndex, VectorMetadata,
};
