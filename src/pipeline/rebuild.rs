//! Reconciliation between the chunk store and the vector index.
//!
//! The chunk store is the source of truth. `rebuild_all` empties the index
//! and re-embeds every stored candidate question, writing the new ids back
//! in place. `check_consistency` only reads and reports what a rebuild
//! would fix.

use super::{RagPipeline, chunk_store_failure};
use crate::config::RebuildFailurePolicy;
use crate::error::{RagError, RagResult, Service};
use crate::types::{ChunkIndex, DocumentId, FacultyScope};
use crate::vector::{VectorId, VectorMetadata};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const LIST_PAGE: usize = 1024;

/// One thing a rebuild could not restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildFailure {
    pub document_id: DocumentId,
    /// `None` when the whole document failed.
    pub chunk_index: Option<ChunkIndex>,
    /// `None` when the whole chunk failed.
    pub position: Option<usize>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    /// Collections re-embedded and written back
    pub collections: usize,
    pub chunks: usize,
    pub questions_embedded: usize,
    pub failures: Vec<RebuildFailure>,
    /// Collections whose document is no longer in the document store.
    /// They are left as they are and get no vectors.
    pub orphaned_documents: Vec<DocumentId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub documents: usize,
    pub chunks: usize,
    pub vectors: usize,
    /// Chunks whose question and vector lists differ in length
    pub inconsistent_chunks: Vec<(DocumentId, ChunkIndex)>,
    /// Ids stored in chunks that the index no longer has
    pub dangling_vector_ids: usize,
    /// Index entries no chunk points at
    pub orphaned_vectors: usize,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.inconsistent_chunks.is_empty()
            && self.dangling_vector_ids == 0
            && self.orphaned_vectors == 0
    }
}

impl RagPipeline {
    /// Rewrites the vector index from the chunk store.
    ///
    /// Runs exclusively: it waits for in-flight operations and blocks new
    /// ones until it finishes. A question that fails to embed is logged and
    /// skipped, or stops the rebuild when the policy is `Abort`.
    pub fn rebuild_all(&self) -> RagResult<RebuildReport> {
        let _maintenance = self.gate.exclusive();
        let policy = self.options.rebuild_failure_policy;

        tracing::info!(?policy, "rebuild started");

        self.index
            .reset()
            .map_err(|e| RagError::external(Service::VectorIndex, e))?;

        let document_ids = self.chunks.document_ids().map_err(chunk_store_failure)?;
        let mut report = RebuildReport::default();

        for document_id in document_ids {
            match self.rebuild_document(&document_id, policy, &mut report) {
                Ok(None) => {}
                // Already recorded in the report
                Ok(Some(abort)) => return Err(abort),
                Err(e) => {
                    tracing::warn!(document = %document_id, error = %e, "document not rebuilt");
                    report.failures.push(RebuildFailure {
                        document_id: document_id.clone(),
                        chunk_index: None,
                        position: None,
                        reason: e.to_string(),
                    });
                    if policy == RebuildFailurePolicy::Abort {
                        return Err(e);
                    }
                }
            }
        }

        tracing::info!(
            collections = report.collections,
            chunks = report.chunks,
            questions = report.questions_embedded,
            failures = report.failures.len(),
            orphaned = report.orphaned_documents.len(),
            "rebuild finished"
        );
        Ok(report)
    }

    /// Re-embeds one collection and writes it back once all its vectors exist.
    ///
    /// Chunk and question failures are recorded in `report`; under `Abort`
    /// the first of them comes back as `Ok(Some(_))`. `Err` means the
    /// document as a whole could not be processed.
    fn rebuild_document(
        &self,
        document_id: &DocumentId,
        policy: RebuildFailurePolicy,
        report: &mut RebuildReport,
    ) -> RagResult<Option<RagError>> {
        let Some(mut collection) = self
            .chunks
            .get_collection(document_id)
            .map_err(chunk_store_failure)?
        else {
            // Deleted between listing and reading
            return Ok(None);
        };

        let Some(faculty_scope) = self
            .documents
            .get_faculty_scope(document_id)
            .map_err(|e| RagError::external(Service::DocumentStore, e))?
        else {
            tracing::warn!(document = %document_id, "chunk collection has no document, skipping");
            report.orphaned_documents.push(document_id.clone());
            return Ok(None);
        };

        let mut abort = None;

        for (&chunk_index, chunk) in collection.chunks.iter_mut() {
            report.chunks += 1;

            if !chunk.is_consistent() {
                let violation = RagError::ConsistencyViolation {
                    document_id: document_id.clone(),
                    chunk_index,
                    questions: chunk.candidate_questions.len(),
                    vector_ids: chunk.vector_ids.len(),
                };
                tracing::warn!(error = %violation, "skipping inconsistent chunk");
                report.failures.push(RebuildFailure {
                    document_id: document_id.clone(),
                    chunk_index: Some(chunk_index),
                    position: None,
                    reason: violation.to_string(),
                });
                if policy == RebuildFailurePolicy::Abort {
                    abort = Some(violation);
                    break;
                }
                continue;
            }

            for position in 0..chunk.candidate_questions.len() {
                let question = chunk.candidate_questions[position].clone();
                match self.reembed(document_id, chunk_index, &faculty_scope, question) {
                    Ok(id) => {
                        chunk.vector_ids[position] = id;
                        report.questions_embedded += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            document = %document_id,
                            chunk = chunk_index,
                            position,
                            error = %e,
                            "candidate question not re-embedded"
                        );
                        report.failures.push(RebuildFailure {
                            document_id: document_id.clone(),
                            chunk_index: Some(chunk_index),
                            position: Some(position),
                            reason: e.to_string(),
                        });
                        if policy == RebuildFailurePolicy::Abort {
                            abort = Some(e);
                            break;
                        }
                    }
                }
            }

            if abort.is_some() {
                break;
            }
        }

        // Ids written so far are valid, so keep them even when aborting
        collection.touch();
        self.chunks
            .put_collection(collection)
            .map_err(chunk_store_failure)?;
        report.collections += 1;

        Ok(abort)
    }

    fn reembed(
        &self,
        document_id: &DocumentId,
        chunk_index: ChunkIndex,
        faculty_scope: &FacultyScope,
        question: String,
    ) -> RagResult<VectorId> {
        let embedding = self
            .embed_questions(vec![question])?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::external(Service::Embedder, "no embedding returned"))?;

        self.index
            .insert(
                embedding,
                VectorMetadata::new(document_id.clone(), chunk_index, faculty_scope.clone()),
            )
            .map_err(|e| RagError::external(Service::VectorIndex, e))
    }

    /// Compares the chunk store with the index without changing either.
    pub fn check_consistency(&self) -> RagResult<ConsistencyReport> {
        let _traffic = self.gate.shared();
        let mut report = ConsistencyReport::default();

        let mut indexed: HashSet<VectorId> = HashSet::with_capacity(self.index.len());
        let mut offset = 0;
        loop {
            let page = self
                .index
                .list(offset, LIST_PAGE)
                .map_err(|e| RagError::external(Service::VectorIndex, e))?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            indexed.extend(page.into_iter().map(|entry| entry.id));
        }
        report.vectors = indexed.len();

        let mut referenced: HashSet<VectorId> = HashSet::new();
        for document_id in self.chunks.document_ids().map_err(chunk_store_failure)? {
            let Some(collection) = self
                .chunks
                .get_collection(&document_id)
                .map_err(chunk_store_failure)?
            else {
                continue;
            };
            report.documents += 1;

            for (&chunk_index, chunk) in &collection.chunks {
                report.chunks += 1;
                if !chunk.is_consistent() {
                    report
                        .inconsistent_chunks
                        .push((document_id.clone(), chunk_index));
                }
                referenced.extend(chunk.vector_ids.iter().copied());
            }
        }

        report.dangling_vector_ids = referenced.difference(&indexed).count();
        report.orphaned_vectors = indexed.difference(&referenced).count();
        Ok(report)
    }
}
