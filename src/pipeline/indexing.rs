//! Writing documents and candidate questions into the index.
//!
//! Vectors are always written before the chunk collection that points at
//! them. Deletion runs in the same order: vectors first, then the
//! collection. Either step can be repeated safely, so a caller that saw a
//! failure simply calls the operation again.

use super::deadline::run_with_deadline;
use super::{RagPipeline, chunk_store_failure};
use crate::chunks::{Chunk, ChunkCollection};
use crate::error::{RagError, RagResult, Service};
use crate::types::{ChunkIndex, DocumentId, FacultyScope};
use crate::vector::{MetadataFilter, VectorId, VectorMetadata};
use serde::{Deserialize, Serialize};

/// A chunk whose candidate questions were produced ahead of time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedChunk {
    pub text: String,
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub document_id: DocumentId,
    pub chunks: usize,
    pub vectors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub vectors_removed: usize,
    pub collection_removed: bool,
}

impl RagPipeline {
    /// Indexes a document: generates candidate questions for every chunk,
    /// embeds and inserts them, then stores the chunk collection in one write.
    ///
    /// On failure nothing is rolled back. Vectors already inserted stay in
    /// the index until the caller runs [`delete_document_index`](Self::delete_document_index).
    pub fn index_document(
        &self,
        document_id: &DocumentId,
        chunks: &[String],
        faculty_scope: &FacultyScope,
    ) -> RagResult<IndexReport> {
        let generator = self
            .question_generator
            .as_ref()
            .ok_or_else(|| RagError::Config {
                reason: "no question generator configured".to_string(),
            })?;
        let count = self.options.questions_per_chunk;

        self.write_document(document_id, faculty_scope, chunks.len(), |position| {
            let text = &chunks[position];
            let questions = generator
                .generate(text, count)
                .map_err(|e| RagError::external(Service::QuestionGenerator, e))?;

            if questions.len() != count {
                return Err(RagError::external(
                    Service::QuestionGenerator,
                    format!(
                        "returned {} questions for chunk {position}, expected {count}",
                        questions.len()
                    ),
                ));
            }
            Ok((text.clone(), questions))
        })
    }

    /// Indexes a document whose candidate questions are already known.
    pub fn index_prepared_document(
        &self,
        document_id: &DocumentId,
        chunks: &[PreparedChunk],
        faculty_scope: &FacultyScope,
    ) -> RagResult<IndexReport> {
        self.write_document(document_id, faculty_scope, chunks.len(), |position| {
            let chunk = &chunks[position];
            Ok((chunk.text.clone(), chunk.questions.clone()))
        })
    }

    fn write_document<F>(
        &self,
        document_id: &DocumentId,
        faculty_scope: &FacultyScope,
        chunk_count: usize,
        mut chunk_at: F,
    ) -> RagResult<IndexReport>
    where
        F: FnMut(usize) -> RagResult<(String, Vec<String>)>,
    {
        let _traffic = self.gate.shared();
        let document_lock = self.document_locks.for_document(document_id);
        let _document = document_lock.lock();

        if self.chunks.contains(document_id).map_err(chunk_store_failure)? {
            return Err(RagError::AlreadyIndexed {
                document_id: document_id.clone(),
            });
        }

        let mut collection = ChunkCollection::new(document_id.clone());
        let mut vectors = 0;

        for position in 0..chunk_count {
            let chunk_index = position as ChunkIndex;
            let (text, questions) = chunk_at(position)?;

            let vector_ids = self
                .insert_questions(document_id, chunk_index, faculty_scope, &questions)
                .inspect_err(|e| {
                    tracing::warn!(
                        document = %document_id,
                        chunk = chunk_index,
                        error = %e,
                        "indexing stopped; delete the document index before retrying"
                    );
                })?;

            let mut chunk = Chunk::new(text);
            for (question, id) in questions.into_iter().zip(vector_ids) {
                chunk.push_question(question, id);
            }
            vectors += chunk.question_count();
            collection.chunks.insert(chunk_index, chunk);
        }

        self.chunks
            .create_collection(collection)
            .map_err(chunk_store_failure)?;

        tracing::info!(
            document = %document_id,
            scope = %faculty_scope,
            chunks = chunk_count,
            vectors,
            "document indexed"
        );

        Ok(IndexReport {
            document_id: document_id.clone(),
            chunks: chunk_count,
            vectors,
        })
    }

    /// Embeds the questions and inserts one vector per question, in order.
    fn insert_questions(
        &self,
        document_id: &DocumentId,
        chunk_index: ChunkIndex,
        faculty_scope: &FacultyScope,
        questions: &[String],
    ) -> RagResult<Vec<VectorId>> {
        if questions.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.embed_questions(questions.to_vec())?;
        let metadata = VectorMetadata::new(document_id.clone(), chunk_index, faculty_scope.clone());

        embeddings
            .into_iter()
            .map(|embedding| {
                self.index
                    .insert(embedding, metadata.clone())
                    .map_err(|e| RagError::external(Service::VectorIndex, e))
            })
            .collect()
    }

    pub(super) fn embed_questions(&self, questions: Vec<String>) -> RagResult<Vec<Vec<f32>>> {
        let embedder = self.embedder.clone();
        run_with_deadline(Service::Embedder, self.options.timeouts.embedding, move || {
            let refs: Vec<&str> = questions.iter().map(String::as_str).collect();
            embedder
                .embed_batch(&refs)
                .map_err(|e| RagError::external(Service::Embedder, e))
        })
    }

    /// Removes every vector of the document, then its chunk collection.
    ///
    /// Safe to call on a document that was never indexed, was partially
    /// indexed, or was already deleted.
    pub fn delete_document_index(&self, document_id: &DocumentId) -> RagResult<DeletionReport> {
        let _traffic = self.gate.shared();

        let (vectors_removed, collection_removed) = {
            let document_lock = self.document_locks.for_document(document_id);
            let _document = document_lock.lock();

            let vectors_removed = self
                .index
                .delete_by_metadata(&MetadataFilter::Document(document_id.clone()))
                .map_err(|e| RagError::external(Service::VectorIndex, e))?;

            let collection_removed = self
                .chunks
                .delete_collection(document_id)
                .map_err(chunk_store_failure)?;

            (vectors_removed, collection_removed)
        };
        self.document_locks.release(document_id);

        tracing::info!(
            document = %document_id,
            vectors_removed,
            collection_removed,
            "document index deleted"
        );

        Ok(DeletionReport {
            vectors_removed,
            collection_removed,
        })
    }

    /// Appends a candidate question to a chunk and returns the new vector id.
    pub fn add_candidate_question(
        &self,
        document_id: &DocumentId,
        chunk_index: ChunkIndex,
        question: &str,
    ) -> RagResult<VectorId> {
        let _traffic = self.gate.shared();
        let document_lock = self.document_locks.for_document(document_id);
        let _document = document_lock.lock();

        let mut collection = self.load_collection(document_id)?;
        let chunk = checked_chunk(&mut collection, document_id, chunk_index)?;

        let faculty_scope = self
            .documents
            .get_faculty_scope(document_id)
            .map_err(|e| RagError::external(Service::DocumentStore, e))?
            .ok_or_else(|| RagError::DocumentNotFound {
                document_id: document_id.clone(),
            })?;

        let id = self
            .insert_questions(
                document_id,
                chunk_index,
                &faculty_scope,
                &[question.to_string()],
            )?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::external(Service::VectorIndex, "no id returned"))?;

        chunk.push_question(question, id);
        collection.touch();

        if let Err(e) = self.chunks.put_collection(collection) {
            // Keep the index free of a vector no chunk points at
            if let Err(cleanup) = self.index.delete(&[id]) {
                tracing::warn!(vector = %id, error = %cleanup, "could not remove vector after failed write");
            }
            return Err(chunk_store_failure(e));
        }

        tracing::debug!(document = %document_id, chunk = chunk_index, vector = %id, "candidate question added");
        Ok(id)
    }

    /// Removes the candidate question at `position` and its vector.
    /// Returns the removed question.
    pub fn remove_candidate_question(
        &self,
        document_id: &DocumentId,
        chunk_index: ChunkIndex,
        position: usize,
    ) -> RagResult<String> {
        let _traffic = self.gate.shared();
        let document_lock = self.document_locks.for_document(document_id);
        let _document = document_lock.lock();

        let mut collection = self.load_collection(document_id)?;
        let chunk = checked_chunk(&mut collection, document_id, chunk_index)?;

        let len = chunk.question_count();
        if position >= len {
            return Err(RagError::QuestionNotFound {
                document_id: document_id.clone(),
                chunk_index,
                position,
                len,
            });
        }

        // Vector first: if the collection write fails, retrying finds the
        // same pair and the repeated delete is a no-op
        let id = chunk.vector_ids[position];
        self.index
            .delete(&[id])
            .map_err(|e| RagError::external(Service::VectorIndex, e))?;

        let (question, _) = chunk.remove_question(position).ok_or_else(|| {
            RagError::QuestionNotFound {
                document_id: document_id.clone(),
                chunk_index,
                position,
                len,
            }
        })?;
        collection.touch();
        self.chunks
            .put_collection(collection)
            .map_err(chunk_store_failure)?;

        tracing::debug!(document = %document_id, chunk = chunk_index, position, vector = %id, "candidate question removed");
        Ok(question)
    }
}

/// The chunk at `chunk_index`, provided its lists agree in length.
fn checked_chunk<'a>(
    collection: &'a mut ChunkCollection,
    document_id: &DocumentId,
    chunk_index: ChunkIndex,
) -> RagResult<&'a mut Chunk> {
    let chunk = collection
        .chunks
        .get_mut(&chunk_index)
        .ok_or_else(|| RagError::ChunkNotFound {
            document_id: document_id.clone(),
            chunk_index,
        })?;

    if !chunk.is_consistent() {
        tracing::error!(
            document = %document_id,
            chunk = chunk_index,
            questions = chunk.candidate_questions.len(),
            vector_ids = chunk.vector_ids.len(),
            "chunk lists disagree"
        );
        return Err(RagError::ConsistencyViolation {
            document_id: document_id.clone(),
            chunk_index,
            questions: chunk.candidate_questions.len(),
            vector_ids: chunk.vector_ids.len(),
        });
    }

    Ok(chunk)
}
