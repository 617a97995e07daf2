//! Indexing and deleting whole documents.

use crate::common::{
    FailingQuestionGenerator, FixedQuestionGenerator, ShortQuestionGenerator, TestRag,
    hashing_embedder, test_options,
};
use qarag::{ChunkStore, ErrorKind, PreparedChunk, RagError, VectorIndex};
use std::collections::HashMap;
use std::sync::Arc;

const CHUNKS: [&str; 3] = [
    "The library opens at eight in the morning",
    "Tuition fees are paid at the start of each semester",
    "Students may defer an exam with a medical certificate",
];

#[test]
fn test_every_vector_id_points_at_its_own_question() {
    let rag = TestRag::new();
    let document_id = rag.index("handbook", Some("IT"), &CHUNKS);

    let entries: HashMap<_, _> = rag
        .index
        .list(0, usize::MAX)
        .unwrap()
        .into_iter()
        .map(|entry| (entry.id, entry))
        .collect();
    assert_eq!(entries.len(), CHUNKS.len() * 5);

    let collection = rag.chunks.get_collection(&document_id).unwrap().unwrap();
    assert_eq!(collection.chunks.len(), CHUNKS.len());

    let embedder = rag.pipeline.embedder();
    for (&chunk_index, chunk) in &collection.chunks {
        assert_eq!(chunk.text, CHUNKS[chunk_index as usize]);
        assert_eq!(chunk.candidate_questions.len(), chunk.vector_ids.len());

        for (question, id) in chunk.candidate_questions.iter().zip(&chunk.vector_ids) {
            let entry = &entries[id];
            assert_eq!(entry.metadata.document_id, document_id);
            assert_eq!(entry.metadata.chunk_index, chunk_index);
            assert_eq!(entry.metadata.faculty_scope.as_str(), "IT");
            assert_eq!(entry.vector, embedder.embed(question).unwrap());
        }
    }
}

#[test]
fn test_generated_questions_are_stored_in_order() {
    let rag = TestRag::new();
    let document_id = rag.index("handbook", None, &CHUNKS[..1]);

    let chunk = rag.chunks.get_chunk(&document_id, 0).unwrap().unwrap();
    let expected: Vec<String> = (0..5)
        .map(|i| FixedQuestionGenerator::question(CHUNKS[0], i))
        .collect();
    assert_eq!(chunk.candidate_questions, expected);
}

#[test]
fn test_indexing_twice_is_a_conflict() {
    let rag = TestRag::new();
    let document_id = rag.index("handbook", None, &CHUNKS);
    let before = rag.index.len();

    let chunks: Vec<String> = CHUNKS.iter().map(|c| c.to_string()).collect();
    let err = rag
        .pipeline
        .index_document(&document_id, &chunks, &Default::default())
        .unwrap_err();

    assert!(matches!(err, RagError::AlreadyIndexed { .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(rag.index.len(), before, "no vectors added by the rejected call");
}

#[test]
fn test_wrong_question_count_fails_the_document() {
    let rag = TestRag::with_parts(
        hashing_embedder(),
        Arc::new(ShortQuestionGenerator),
        test_options(),
    );
    let (document_id, scope) = rag.register("handbook", None);

    let chunks = vec![CHUNKS[0].to_string()];
    let err = rag
        .pipeline
        .index_document(&document_id, &chunks, &scope)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExternalServiceFailure);
    assert!(err.is_retryable());
    assert!(!rag.chunks.contains(&document_id).unwrap());
    assert_eq!(rag.index.len(), 0);
}

#[test]
fn test_partial_index_is_cleaned_up_by_delete() {
    // First chunk succeeds, second fails
    let rag = TestRag::with_parts(
        hashing_embedder(),
        Arc::new(FailingQuestionGenerator::after(1)),
        test_options(),
    );
    let (document_id, scope) = rag.register("handbook", None);

    let chunks: Vec<String> = CHUNKS.iter().map(|c| c.to_string()).collect();
    let err = rag
        .pipeline
        .index_document(&document_id, &chunks, &scope)
        .unwrap_err();
    assert!(matches!(err, RagError::ExternalService { .. }));

    // Vectors of the first chunk stay behind; no collection was written
    assert_eq!(rag.index.len(), 5);
    assert!(!rag.chunks.contains(&document_id).unwrap());

    let report = rag.pipeline.delete_document_index(&document_id).unwrap();
    assert_eq!(report.vectors_removed, 5);
    assert!(!report.collection_removed);
    assert_eq!(rag.index.len(), 0);
}

#[test]
fn test_delete_removes_vectors_and_collection() {
    let rag = TestRag::new();
    let keep = rag.index("calendar", None, &["Term starts in September"]);
    let document_id = rag.index("handbook", None, &CHUNKS);
    assert_eq!(rag.index.len(), 20);

    let report = rag.pipeline.delete_document_index(&document_id).unwrap();
    assert_eq!(report.vectors_removed, 15);
    assert!(report.collection_removed);
    assert_eq!(rag.index.len(), 5);
    assert!(!rag.chunks.contains(&document_id).unwrap());
    assert!(rag.chunks.contains(&keep).unwrap());

    // Repeating the delete is harmless
    let again = rag.pipeline.delete_document_index(&document_id).unwrap();
    assert_eq!(again.vectors_removed, 0);
    assert!(!again.collection_removed);
}

#[test]
fn test_deleted_document_can_be_indexed_again() {
    let rag = TestRag::new();
    let document_id = rag.index("handbook", None, &CHUNKS);
    rag.pipeline.delete_document_index(&document_id).unwrap();

    let chunks = vec![CHUNKS[1].to_string()];
    let report = rag
        .pipeline
        .index_document(&document_id, &chunks, &Default::default())
        .unwrap();
    assert_eq!(report.chunks, 1);
    assert_eq!(report.vectors, 5);
    assert_eq!(rag.index.len(), 5);
}

#[test]
fn test_prepared_chunks_keep_their_questions() {
    let rag = TestRag::new();
    let (document_id, scope) = rag.register("faq", Some("LAW"));

    let chunks = vec![
        PreparedChunk {
            text: "Appeals go to the faculty board".to_string(),
            questions: vec![
                "Where do I send an appeal?".to_string(),
                "Who handles appeals?".to_string(),
            ],
        },
        PreparedChunk {
            text: "No questions for this one".to_string(),
            questions: Vec::new(),
        },
    ];

    let report = rag
        .pipeline
        .index_prepared_document(&document_id, &chunks, &scope)
        .unwrap();
    assert_eq!(report.chunks, 2);
    assert_eq!(report.vectors, 2);

    let first = rag.chunks.get_chunk(&document_id, 0).unwrap().unwrap();
    assert_eq!(first.candidate_questions, chunks[0].questions);
    let second = rag.chunks.get_chunk(&document_id, 1).unwrap().unwrap();
    assert!(second.candidate_questions.is_empty());
    assert!(second.vector_ids.is_empty());
}

#[test]
fn test_index_document_requires_question_generator() {
    let rag = TestRag::new();
    let pipeline = qarag::RagPipeline::new(
        hashing_embedder(),
        rag.index.clone(),
        rag.chunks.clone(),
        Arc::new(rag.documents.clone()),
        Arc::new(qarag::vector::LexicalCrossEncoder),
    );

    let err = pipeline
        .index_document(&qarag::DocumentId::new("doc"), &["text".to_string()], &Default::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
