//! Error types for the retrieval pipeline
//!
//! Lower layers keep their own error enums (`VectorError`, `StorageError`).
//! `RagError` is what callers of the pipeline see, and it classifies every
//! failure into one of the kinds the callers act on.

use crate::types::{ChunkIndex, DocumentId};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// External collaborator a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Embedder,
    VectorIndex,
    ChunkStore,
    DocumentStore,
    QuestionGenerator,
    AnswerGenerator,
    CrossEncoder,
    Translator,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Embedder => "embedder",
            Self::VectorIndex => "vector index",
            Self::ChunkStore => "chunk store",
            Self::DocumentStore => "document store",
            Self::QuestionGenerator => "question generator",
            Self::AnswerGenerator => "answer generator",
            Self::CrossEncoder => "cross-encoder",
            Self::Translator => "translator",
        };
        f.write_str(name)
    }
}

/// Coarse classification used for retry and surfacing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced document, chunk or question position does not exist.
    NotFound,
    /// A backend was unreachable, errored or timed out. Retryable by the caller.
    ExternalServiceFailure,
    /// Chunk and vector lists disagree.
    ConsistencyViolation,
    /// The request conflicts with existing state.
    Conflict,
    /// Invalid configuration or startup failure.
    Configuration,
}

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Document '{document_id}' has no chunk collection")]
    DocumentNotFound { document_id: DocumentId },

    #[error("Chunk {chunk_index} not found in document '{document_id}'")]
    ChunkNotFound {
        document_id: DocumentId,
        chunk_index: ChunkIndex,
    },

    #[error(
        "Question position {position} out of range for chunk {chunk_index} of document '{document_id}' ({len} questions)"
    )]
    QuestionNotFound {
        document_id: DocumentId,
        chunk_index: ChunkIndex,
        position: usize,
        len: usize,
    },

    #[error("{service} failed: {reason}")]
    ExternalService { service: Service, reason: String },

    #[error("{service} did not answer within {}ms", .after.as_millis())]
    Timeout { service: Service, after: Duration },

    #[error(
        "Chunk {chunk_index} of document '{document_id}' has {questions} questions but {vector_ids} vector ids"
    )]
    ConsistencyViolation {
        document_id: DocumentId,
        chunk_index: ChunkIndex,
        questions: usize,
        vector_ids: usize,
    },

    #[error("Document '{document_id}' is already indexed")]
    AlreadyIndexed { document_id: DocumentId },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl RagError {
    pub fn external(service: Service, reason: impl fmt::Display) -> Self {
        Self::ExternalService {
            service,
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DocumentNotFound { .. }
            | Self::ChunkNotFound { .. }
            | Self::QuestionNotFound { .. } => ErrorKind::NotFound,
            Self::ExternalService { .. } | Self::Timeout { .. } => {
                ErrorKind::ExternalServiceFailure
            }
            Self::ConsistencyViolation { .. } => ErrorKind::ConsistencyViolation,
            Self::AlreadyIndexed { .. } => ErrorKind::Conflict,
            Self::Config { .. } => ErrorKind::Configuration,
        }
    }

    /// Whether the caller may retry the same request with backoff.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ExternalServiceFailure
    }

    /// Get a stable status code for this error type.
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::DocumentNotFound { .. } => "DOCUMENT_NOT_FOUND",
            Self::ChunkNotFound { .. } => "CHUNK_NOT_FOUND",
            Self::QuestionNotFound { .. } => "QUESTION_NOT_FOUND",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_FAILURE",
            Self::Timeout { .. } => "EXTERNAL_SERVICE_TIMEOUT",
            Self::ConsistencyViolation { .. } => "CONSISTENCY_VIOLATION",
            Self::AlreadyIndexed { .. } => "ALREADY_INDEXED",
            Self::Config { .. } => "CONFIG_ERROR",
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::ExternalService { .. } | Self::Timeout { .. } => vec![
                "The service is temporarily unavailable, retry with backoff",
                "If indexing was interrupted, delete the document index before retrying",
            ],
            Self::ConsistencyViolation { .. } => vec![
                "Run 'qarag rebuild' to rewrite the vector index from the chunk store",
            ],
            Self::AlreadyIndexed { .. } => {
                vec!["Delete the document index first, then index it again"]
            }
            Self::DocumentNotFound { .. } | Self::ChunkNotFound { .. } => {
                vec!["Check the document id and chunk index against 'qarag stats'"]
            }
            Self::Config { .. } => vec!["Run 'qarag init --force' to regenerate settings"],
            Self::QuestionNotFound { .. } => vec![],
        }
    }
}

/// Result type alias for pipeline operations
pub type RagResult<T> = Result<T, RagError>;
