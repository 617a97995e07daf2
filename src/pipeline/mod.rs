//! The question-anchored retrieval pipeline.
//!
//! [`RagPipeline`] owns handles to every component and exposes the
//! operations callers use: indexing and deleting documents, editing
//! candidate questions, retrieving ranked contexts and rebuilding the
//! vector index from the chunk store.
//!
//! Components are injected at construction. Nothing here is global, so
//! tests build a pipeline from in-memory stores and deterministic models.

mod deadline;
mod gate;
mod indexing;
mod rebuild;
mod retrieval;

pub use deadline::Timeouts;
pub use gate::MaintenanceGate;
pub use indexing::{DeletionReport, IndexReport, PreparedChunk};
pub use rebuild::{ConsistencyReport, RebuildFailure, RebuildReport};
pub use retrieval::{Answer, ChunkView, RankedContext, RetrieveOptions};

use crate::chunks::{Chunk, ChunkCollection, ChunkStore, StorageError};
use crate::config::{RebuildFailurePolicy, Settings};
use crate::error::{RagError, RagResult, Service};
use crate::external::{AnswerGenerator, DocumentStore, QueryTranslator, QuestionGenerator};
use crate::types::{ChunkIndex, DocumentId, Page};
use crate::vector::{CrossEncoder, Embedder, VectorEntry, VectorIndex};
use gate::DocumentLocks;
use std::sync::Arc;

/// Tunables of the pipeline, usually taken from [`Settings`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub questions_per_chunk: usize,
    pub top_k_search: usize,
    pub top_k_rerank: usize,
    /// `{name}`, `{text}` and `{url}` are substituted per context
    pub context_template: String,
    pub rebuild_failure_policy: RebuildFailurePolicy,
    pub timeouts: Timeouts,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            questions_per_chunk: settings.indexing.questions_per_chunk,
            top_k_search: settings.retrieval.top_k_search,
            top_k_rerank: settings.retrieval.top_k_rerank,
            context_template: settings.retrieval.context_template.clone(),
            rebuild_failure_policy: settings.rebuild.on_failure,
            timeouts: Timeouts::from_settings(settings),
        }
    }
}

pub struct RagPipeline {
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    chunks: Arc<dyn ChunkStore>,
    documents: Arc<dyn DocumentStore>,
    cross_encoder: Arc<dyn CrossEncoder>,
    question_generator: Option<Arc<dyn QuestionGenerator>>,
    answer_generator: Option<Arc<dyn AnswerGenerator>>,
    translator: Option<Arc<dyn QueryTranslator>>,
    options: PipelineOptions,
    gate: MaintenanceGate,
    document_locks: DocumentLocks,
}

impl std::fmt::Debug for RagPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagPipeline")
            .field("embedder", &self.embedder)
            .field("vectors", &self.index.len())
            .field("cross_encoder", &self.cross_encoder.model_name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl RagPipeline {
    pub fn new(
        embedder: Embedder,
        index: Arc<dyn VectorIndex>,
        chunks: Arc<dyn ChunkStore>,
        documents: Arc<dyn DocumentStore>,
        cross_encoder: Arc<dyn CrossEncoder>,
    ) -> Self {
        Self {
            embedder,
            index,
            chunks,
            documents,
            cross_encoder,
            question_generator: None,
            answer_generator: None,
            translator: None,
            options: PipelineOptions::default(),
            gate: MaintenanceGate::new(),
            document_locks: DocumentLocks::default(),
        }
    }

    pub fn with_question_generator(mut self, generator: Arc<dyn QuestionGenerator>) -> Self {
        self.question_generator = Some(generator);
        self
    }

    pub fn with_answer_generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.answer_generator = Some(generator);
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn QueryTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn gate(&self) -> &MaintenanceGate {
        &self.gate
    }

    /// Number of vectors currently in the index.
    pub fn vector_count(&self) -> usize {
        self.index.len()
    }

    /// One page of a document's chunks, in index order. `page` is 1-based.
    pub fn list_chunks(
        &self,
        document_id: &DocumentId,
        page: usize,
        limit: usize,
    ) -> RagResult<Page<(ChunkIndex, Chunk)>> {
        let _traffic = self.gate.shared();
        let (offset, limit) = Page::<()>::window(page, limit);

        let (items, total) = self
            .chunks
            .list_chunks(document_id, offset, limit)
            .map_err(chunk_store_failure)?
            .ok_or_else(|| RagError::DocumentNotFound {
                document_id: document_id.clone(),
            })?;

        Ok(Page::new(items, total, page, limit))
    }

    /// One page of the vector index in insertion order. `page` is 1-based.
    pub fn list_vectors(&self, page: usize, limit: usize) -> RagResult<Page<VectorEntry>> {
        let _traffic = self.gate.shared();
        let (offset, limit) = Page::<()>::window(page, limit);

        let total = self.index.len();
        let items = self
            .index
            .list(offset, limit)
            .map_err(|e| RagError::external(Service::VectorIndex, e))?;

        Ok(Page::new(items, total, page, limit))
    }

    fn load_collection(&self, document_id: &DocumentId) -> RagResult<ChunkCollection> {
        self.chunks
            .get_collection(document_id)
            .map_err(chunk_store_failure)?
            .ok_or_else(|| RagError::DocumentNotFound {
                document_id: document_id.clone(),
            })
    }
}

fn chunk_store_failure(error: StorageError) -> RagError {
    match error {
        StorageError::AlreadyExists(document_id) => RagError::AlreadyIndexed { document_id },
        other => RagError::external(Service::ChunkStore, other),
    }
}

/// Fills the context template for one chunk.
fn render_context(template: &str, name: &str, text: &str, url: &str) -> String {
    template
        .replace("{name}", name)
        .replace("{url}", url)
        .replace("{text}", text)
}
