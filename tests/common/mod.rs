//! Shared fixtures for integration tests.
//!
//! Every pipeline here runs offline: hashing embeddings, the lexical
//! cross-encoder and in-memory stores.

#![allow(dead_code)]

use qarag::vector::{
    DictionarySegmenter, HashingEmbeddingGenerator, LexicalCrossEncoder, VectorDimension,
    VectorError,
};
use qarag::{
    AnswerGenerator, CrossEncoder, DocumentId, DocumentRecord, Embedder, EmbeddingGenerator, ExternalError,
    ExternalResult, FacultyScope, InMemoryChunkStore, InMemoryDocumentStore, InMemoryVectorIndex,
    PipelineOptions, QueryTranslator, QuestionGenerator, RagPipeline,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub const DIMENSION: usize = 128;

/// Question `i` for a chunk is "question {i} about {chunk text}".
pub struct FixedQuestionGenerator;

impl FixedQuestionGenerator {
    pub fn question(chunk_text: &str, i: usize) -> String {
        format!("question {i} about {chunk_text}")
    }
}

impl QuestionGenerator for FixedQuestionGenerator {
    fn generate(&self, chunk_text: &str, count: usize) -> ExternalResult<Vec<String>> {
        Ok((0..count)
            .map(|i| Self::question(chunk_text, i))
            .collect())
    }
}

/// Always returns one question fewer than asked for.
pub struct ShortQuestionGenerator;

impl QuestionGenerator for ShortQuestionGenerator {
    fn generate(&self, chunk_text: &str, count: usize) -> ExternalResult<Vec<String>> {
        FixedQuestionGenerator.generate(chunk_text, count.saturating_sub(1))
    }
}

/// Succeeds for the first `successes` chunks, then fails.
pub struct FailingQuestionGenerator {
    remaining: AtomicUsize,
}

impl FailingQuestionGenerator {
    pub fn after(successes: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(successes),
        }
    }
}

impl QuestionGenerator for FailingQuestionGenerator {
    fn generate(&self, chunk_text: &str, count: usize) -> ExternalResult<Vec<String>> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left == 0 {
            return Err(ExternalError::new("question service unavailable"));
        }
        self.remaining.store(left - 1, Ordering::SeqCst);
        FixedQuestionGenerator.generate(chunk_text, count)
    }
}

/// Hashing embeddings that fail for any text containing "poison" once armed.
pub struct PoisonedEmbedding {
    inner: HashingEmbeddingGenerator,
    armed: AtomicBool,
}

impl PoisonedEmbedding {
    pub fn new() -> Self {
        Self {
            inner: HashingEmbeddingGenerator::new(dimension()),
            armed: AtomicBool::new(false),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

impl EmbeddingGenerator for PoisonedEmbedding {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if self.armed.load(Ordering::SeqCst) && texts.iter().any(|t| t.contains("poison")) {
            return Err(VectorError::EmbeddingFailed("poisoned input".to_string()));
        }
        self.inner.generate_embeddings(texts)
    }

    fn dimension(&self) -> VectorDimension {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        "poisoned-hashing"
    }
}

/// Hashing embeddings that take `delay` per call.
pub struct SlowEmbedding {
    inner: HashingEmbeddingGenerator,
    delay: Duration,
}

impl SlowEmbedding {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: HashingEmbeddingGenerator::new(dimension()),
            delay,
        }
    }
}

impl EmbeddingGenerator for SlowEmbedding {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        std::thread::sleep(self.delay);
        self.inner.generate_embeddings(texts)
    }

    fn dimension(&self) -> VectorDimension {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        "slow-hashing"
    }
}

/// Lexical scorer that sleeps before every call.
pub struct SlowCrossEncoder {
    delay: Duration,
}

impl SlowCrossEncoder {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl CrossEncoder for SlowCrossEncoder {
    fn score(&self, question: &str, contexts: &[&str]) -> Result<Vec<f32>, VectorError> {
        std::thread::sleep(self.delay);
        LexicalCrossEncoder.score(question, contexts)
    }

    fn model_name(&self) -> &str {
        "slow-lexical"
    }
}

/// Replies with the question, language and number of contexts it saw.
pub struct EchoAnswerGenerator;

impl AnswerGenerator for EchoAnswerGenerator {
    fn generate_answer(
        &self,
        contexts: &[String],
        question: &str,
        language: &str,
    ) -> ExternalResult<String> {
        Ok(format!("[{language}] {question} ({} contexts)", contexts.len()))
    }
}

/// Translates every input to the same fixed text.
pub struct FixedTranslator(pub String);

impl QueryTranslator for FixedTranslator {
    fn translate(&self, _text: &str) -> ExternalResult<String> {
        Ok(self.0.clone())
    }
}

pub fn dimension() -> VectorDimension {
    VectorDimension::new(DIMENSION).expect("non-zero dimension")
}

pub fn hashing_embedder() -> Embedder {
    embedder_with(Arc::new(HashingEmbeddingGenerator::new(dimension())))
}

pub fn embedder_with(generator: Arc<dyn EmbeddingGenerator>) -> Embedder {
    Embedder::new(generator, Arc::new(DictionarySegmenter::new(4)))
}

pub fn test_options() -> PipelineOptions {
    PipelineOptions {
        questions_per_chunk: 5,
        ..PipelineOptions::default()
    }
}

/// A pipeline with handles on its stores for direct inspection.
pub struct TestRag {
    pub pipeline: RagPipeline,
    pub index: Arc<InMemoryVectorIndex>,
    pub chunks: Arc<InMemoryChunkStore>,
    pub documents: InMemoryDocumentStore,
}

impl TestRag {
    pub fn new() -> Self {
        Self::with_parts(
            hashing_embedder(),
            Arc::new(FixedQuestionGenerator),
            test_options(),
        )
    }

    pub fn with_parts(
        embedder: Embedder,
        questions: Arc<dyn QuestionGenerator>,
        options: PipelineOptions,
    ) -> Self {
        Self::build(embedder, questions, options, Arc::new(LexicalCrossEncoder))
    }

    pub fn with_cross_encoder(cross_encoder: Arc<dyn CrossEncoder>) -> Self {
        Self::build(
            hashing_embedder(),
            Arc::new(FixedQuestionGenerator),
            test_options(),
            cross_encoder,
        )
    }

    fn build(
        embedder: Embedder,
        questions: Arc<dyn QuestionGenerator>,
        options: PipelineOptions,
        cross_encoder: Arc<dyn CrossEncoder>,
    ) -> Self {
        let index = Arc::new(InMemoryVectorIndex::new(embedder.dimension()));
        let chunks = Arc::new(InMemoryChunkStore::new());
        let documents = InMemoryDocumentStore::new();

        let pipeline = RagPipeline::new(
            embedder,
            index.clone(),
            chunks.clone(),
            Arc::new(documents.clone()),
            cross_encoder,
        )
        .with_question_generator(questions)
        .with_options(options);

        Self {
            pipeline,
            index,
            chunks,
            documents,
        }
    }

    /// Registers a document in the catalogue and returns its id and scope.
    pub fn register(&self, id: &str, faculty: Option<&str>) -> (DocumentId, FacultyScope) {
        let document_id = DocumentId::new(id);
        self.documents.insert(
            document_id.clone(),
            DocumentRecord {
                name: format!("{id} handbook"),
                url: format!("https://example.edu/{id}.pdf"),
                faculty: faculty.map(str::to_string),
            },
        );
        (document_id, FacultyScope::from_option(faculty))
    }

    /// Registers and indexes a document in one step.
    pub fn index(&self, id: &str, faculty: Option<&str>, chunks: &[&str]) -> DocumentId {
        let (document_id, scope) = self.register(id, faculty);
        let chunks: Vec<String> = chunks.iter().map(|c| c.to_string()).collect();
        self.pipeline
            .index_document(&document_id, &chunks, &scope)
            .expect("indexing should succeed");
        document_id
    }
}
