//! Answering-time path: question → vectors → chunks → reranked contexts.

use super::deadline::run_with_deadline;
use super::{RagPipeline, chunk_store_failure, render_context};
use crate::chunks::{Chunk, ChunkCollection};
use crate::error::{RagError, RagResult, Service};
use crate::external::DocumentLocator;
use crate::types::{ChunkIndex, DocumentId, FacultyScope};
use crate::vector::{MetadataFilter, SearchHit};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Per-call overrides of the pipeline defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrieveOptions {
    pub top_k_search: Option<usize>,
    pub top_k_rerank: Option<usize>,
    pub embedding_timeout: Option<Duration>,
    pub rerank_timeout: Option<Duration>,
}

/// A context with its cross-encoder score and the chunk it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedContext {
    pub context: String,
    pub score: f32,
    pub document_id: DocumentId,
    pub chunk_index: ChunkIndex,
}

/// A generated answer with the contexts it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub contexts: Vec<RankedContext>,
}

/// A stored chunk joined with its document's locator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkView {
    pub document_id: DocumentId,
    pub chunk_index: ChunkIndex,
    pub chunk: Chunk,
    pub locator: DocumentLocator,
}

/// Per-call cache so each document is read once however many hits it has.
type ResolvedDocument = Option<(ChunkCollection, DocumentLocator)>;

impl RagPipeline {
    /// Ranked context strings for a question, most relevant first.
    ///
    /// No hits is not an error; the result is simply empty.
    pub fn retrieve(&self, question: &str, faculty_scope: &FacultyScope) -> RagResult<Vec<String>> {
        Ok(self
            .retrieve_ranked(question, faculty_scope, &RetrieveOptions::default())?
            .into_iter()
            .map(|ranked| ranked.context)
            .collect())
    }

    pub fn retrieve_ranked(
        &self,
        question: &str,
        faculty_scope: &FacultyScope,
        options: &RetrieveOptions,
    ) -> RagResult<Vec<RankedContext>> {
        let _traffic = self.gate.shared();
        self.retrieve_unguarded(question, faculty_scope, options)
    }

    /// Translates the question if a translator is configured, retrieves
    /// contexts with the translated text and hands them, together with the
    /// original question, to the answer generator.
    pub fn answer(
        &self,
        question: &str,
        faculty_scope: &FacultyScope,
        language: &str,
    ) -> RagResult<Answer> {
        let generator = self
            .answer_generator
            .as_ref()
            .ok_or_else(|| RagError::Config {
                reason: "no answer generator configured".to_string(),
            })?;

        let _traffic = self.gate.shared();

        let search_text = match &self.translator {
            Some(translator) => translator
                .translate(question)
                .map_err(|e| RagError::external(Service::Translator, e))?,
            None => question.to_string(),
        };

        let contexts =
            self.retrieve_unguarded(&search_text, faculty_scope, &RetrieveOptions::default())?;
        let texts: Vec<String> = contexts.iter().map(|c| c.context.clone()).collect();

        let answer = generator
            .generate_answer(&texts, question, language)
            .map_err(|e| RagError::external(Service::AnswerGenerator, e))?;

        Ok(Answer { answer, contexts })
    }

    /// A single chunk with the locator of its document.
    pub fn chunk_with_locator(
        &self,
        document_id: &DocumentId,
        chunk_index: ChunkIndex,
    ) -> RagResult<ChunkView> {
        let _traffic = self.gate.shared();

        let chunk = self
            .chunks
            .get_chunk(document_id, chunk_index)
            .map_err(chunk_store_failure)?
            .ok_or_else(|| RagError::ChunkNotFound {
                document_id: document_id.clone(),
                chunk_index,
            })?;

        let locator = self
            .documents
            .get_document_locator(document_id)
            .map_err(|e| RagError::external(Service::DocumentStore, e))?
            .ok_or_else(|| RagError::DocumentNotFound {
                document_id: document_id.clone(),
            })?;

        Ok(ChunkView {
            document_id: document_id.clone(),
            chunk_index,
            chunk,
            locator,
        })
    }

    // Callers hold the gate
    fn retrieve_unguarded(
        &self,
        question: &str,
        faculty_scope: &FacultyScope,
        options: &RetrieveOptions,
    ) -> RagResult<Vec<RankedContext>> {
        let top_k_search = options.top_k_search.unwrap_or(self.options.top_k_search);
        let top_k_rerank = options.top_k_rerank.unwrap_or(self.options.top_k_rerank);

        let embedder = self.embedder.clone();
        let text = question.to_string();
        let query = run_with_deadline(
            Service::Embedder,
            options.embedding_timeout.or(self.options.timeouts.embedding),
            move || {
                embedder
                    .embed(&text)
                    .map_err(|e| RagError::external(Service::Embedder, e))
            },
        )?;

        let filter = MetadataFilter::for_scope(faculty_scope);
        let hits = self
            .index
            .search(&query, top_k_search, &filter)
            .map_err(|e| RagError::external(Service::VectorIndex, e))?;

        if hits.is_empty() {
            tracing::debug!(scope = %faculty_scope, "no vector hits");
            return Ok(Vec::new());
        }

        let candidates = self.resolve_hits(&hits)?;
        let unique = candidates.len();
        let ranked = self.rerank(question, candidates, top_k_rerank, options)?;

        tracing::debug!(
            scope = %faculty_scope,
            hits = hits.len(),
            unique,
            returned = ranked.len(),
            "retrieval finished"
        );
        Ok(ranked)
    }

    /// Turns hits into unique contexts, keeping the first occurrence of each.
    /// Hits whose chunk or document cannot be found are dropped.
    fn resolve_hits(&self, hits: &[SearchHit]) -> RagResult<Vec<RankedContext>> {
        let mut documents: HashMap<DocumentId, ResolvedDocument> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut contexts = Vec::new();

        for hit in hits {
            let document_id = &hit.metadata.document_id;
            let chunk_index = hit.metadata.chunk_index;

            if !documents.contains_key(document_id) {
                let resolved = self.resolve_document(document_id)?;
                documents.insert(document_id.clone(), resolved);
            }

            let Some(Some((collection, locator))) = documents.get(document_id) else {
                tracing::debug!(document = %document_id, vector = %hit.id, "dropping hit for unknown document");
                continue;
            };
            let Some(chunk) = collection.chunks.get(&chunk_index) else {
                tracing::debug!(document = %document_id, chunk = chunk_index, vector = %hit.id, "dropping hit for missing chunk");
                continue;
            };

            let context = render_context(
                &self.options.context_template,
                &locator.name,
                &chunk.text,
                &locator.url,
            );
            if seen.insert(context.clone()) {
                contexts.push(RankedContext {
                    context,
                    score: 0.0,
                    document_id: document_id.clone(),
                    chunk_index,
                });
            }
        }

        Ok(contexts)
    }

    fn resolve_document(&self, document_id: &DocumentId) -> RagResult<ResolvedDocument> {
        let Some(collection) = self
            .chunks
            .get_collection(document_id)
            .map_err(chunk_store_failure)?
        else {
            return Ok(None);
        };

        let locator = self
            .documents
            .get_document_locator(document_id)
            .map_err(|e| RagError::external(Service::DocumentStore, e))?;

        Ok(locator.map(|locator| (collection, locator)))
    }

    /// Scores every context against the question and keeps the best `top_k`.
    /// Equal scores keep their first-seen order.
    fn rerank(
        &self,
        question: &str,
        mut candidates: Vec<RankedContext>,
        top_k: usize,
        options: &RetrieveOptions,
    ) -> RagResult<Vec<RankedContext>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let cross_encoder = self.cross_encoder.clone();
        let text = question.to_string();
        let contexts: Vec<String> = candidates.iter().map(|c| c.context.clone()).collect();

        let scores = run_with_deadline(
            Service::CrossEncoder,
            options.rerank_timeout.or(self.options.timeouts.rerank),
            move || {
                let refs: Vec<&str> = contexts.iter().map(String::as_str).collect();
                cross_encoder
                    .score(&text, &refs)
                    .map_err(|e| RagError::external(Service::CrossEncoder, e))
            },
        )?;

        if scores.len() != candidates.len() {
            return Err(RagError::external(
                Service::CrossEncoder,
                format!(
                    "returned {} scores for {} contexts",
                    scores.len(),
                    candidates.len()
                ),
            ));
        }

        for (candidate, score) in candidates.iter_mut().zip(scores) {
            candidate.score = score;
        }
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(top_k);
        Ok(candidates)
    }
}
