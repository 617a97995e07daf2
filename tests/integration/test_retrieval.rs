//! Retrieval, answering and read-only lookups.

use crate::common::{
    EchoAnswerGenerator, FixedQuestionGenerator, FixedTranslator, SlowCrossEncoder,
    SlowEmbedding, TestRag, embedder_with, test_options,
};
use qarag::{
    DocumentId, ErrorKind, FacultyScope, RagError, RetrieveOptions, Service,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const LIBRARY: &str = "The library opens at eight in the morning";
const FEES: &str = "Tuition fees are paid at the start of each semester";

fn documents_in(contexts: &[qarag::RankedContext]) -> HashSet<String> {
    contexts
        .iter()
        .map(|c| c.document_id.as_str().to_string())
        .collect()
}

#[test]
fn test_indexed_question_finds_its_chunk_first() {
    let rag = TestRag::new();
    rag.index("handbook", None, &[LIBRARY, FEES]);

    let question = FixedQuestionGenerator::question(LIBRARY, 2);
    let contexts = rag
        .pipeline
        .retrieve(&question, &FacultyScope::global())
        .unwrap();

    assert_eq!(
        contexts[0],
        format!(
            "Document: handbook handbook. Content: {LIBRARY}. URL: https://example.edu/handbook.pdf"
        )
    );
}

#[test]
fn test_one_context_per_chunk() {
    let rag = TestRag::new();
    rag.index("handbook", None, &[LIBRARY, FEES]);

    // All ten candidate questions are hits, but there are only two chunks
    let contexts = rag
        .pipeline
        .retrieve("when does the library open", &FacultyScope::global())
        .unwrap();
    assert_eq!(contexts.len(), 2);
    assert_ne!(contexts[0], contexts[1]);
}

#[test]
fn test_faculty_filter() {
    let rag = TestRag::new();
    rag.index("it-guide", Some("IT"), &["Programming labs are in building C"]);
    rag.index("law-guide", Some("LAW"), &["Moot court sessions run on Fridays"]);
    rag.index("campus", None, &["The cafeteria serves lunch at noon"]);

    let ask = |scope: &str| {
        let contexts = rag
            .pipeline
            .retrieve_ranked(
                "where are things on campus",
                &FacultyScope::new(scope),
                &RetrieveOptions::default(),
            )
            .unwrap();
        documents_in(&contexts)
    };

    let it: HashSet<String> = ["it-guide", "campus"].map(String::from).into();
    let law: HashSet<String> = ["law-guide", "campus"].map(String::from).into();
    let all: HashSet<String> = ["it-guide", "law-guide", "campus"].map(String::from).into();

    assert_eq!(ask("IT"), it);
    assert_eq!(ask("LAW"), law);
    assert_eq!(ask(""), all);
}

#[test]
fn test_deleted_document_is_not_retrieved() {
    let rag = TestRag::new();
    let document_id = rag.index("handbook", None, &[LIBRARY, FEES]);
    rag.pipeline.delete_document_index(&document_id).unwrap();

    let question = FixedQuestionGenerator::question(LIBRARY, 0);
    let contexts = rag
        .pipeline
        .retrieve(&question, &FacultyScope::global())
        .unwrap();
    assert!(contexts.is_empty());
}

#[test]
fn test_empty_index_returns_nothing() {
    let rag = TestRag::new();
    let contexts = rag
        .pipeline
        .retrieve("anything at all", &FacultyScope::global())
        .unwrap();
    assert!(contexts.is_empty());
}

#[test]
fn test_unrelated_query_is_not_an_error() {
    let rag = TestRag::new();
    rag.index("handbook", None, &[LIBRARY, FEES]);

    let options = RetrieveOptions {
        top_k_search: Some(3),
        top_k_rerank: Some(1),
        ..Default::default()
    };
    let contexts = rag
        .pipeline
        .retrieve_ranked("zxq plorf unrelated nonsense", &FacultyScope::global(), &options)
        .unwrap();
    assert!(contexts.len() <= 1);
}

#[test]
fn test_ranked_scores_are_descending() {
    let rag = TestRag::new();
    rag.index("handbook", None, &[LIBRARY, FEES, "Exams are held in the main hall"]);

    let contexts = rag
        .pipeline
        .retrieve_ranked(
            "when are tuition fees paid",
            &FacultyScope::global(),
            &RetrieveOptions::default(),
        )
        .unwrap();

    assert_eq!(contexts.len(), 3);
    assert!(contexts.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(contexts[0].chunk_index, 1);
}

#[test]
fn test_hits_without_catalogue_entry_are_dropped() {
    let rag = TestRag::new();
    let gone = rag.index("gone", None, &[LIBRARY]);
    rag.index("kept", None, &[FEES]);
    rag.documents.remove(&gone);

    let contexts = rag
        .pipeline
        .retrieve_ranked(
            &FixedQuestionGenerator::question(LIBRARY, 0),
            &FacultyScope::global(),
            &RetrieveOptions::default(),
        )
        .unwrap();

    assert_eq!(documents_in(&contexts), HashSet::from(["kept".to_string()]));
}

#[test]
fn test_embedding_deadline() {
    let rag = TestRag::with_parts(
        embedder_with(Arc::new(SlowEmbedding::new(Duration::from_millis(300)))),
        Arc::new(FixedQuestionGenerator),
        test_options(),
    );

    let options = RetrieveOptions {
        embedding_timeout: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let err = rag
        .pipeline
        .retrieve_ranked("slow question", &FacultyScope::global(), &options)
        .unwrap_err();

    assert!(matches!(
        err,
        RagError::Timeout {
            service: Service::Embedder,
            ..
        }
    ));
    assert!(err.is_retryable());
}

#[test]
fn test_rerank_deadline() {
    let rag = TestRag::with_cross_encoder(Arc::new(SlowCrossEncoder::new(
        Duration::from_millis(300),
    )));
    rag.index("handbook", None, &[LIBRARY, FEES]);

    let options = RetrieveOptions {
        rerank_timeout: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let err = rag
        .pipeline
        .retrieve_ranked(
            &FixedQuestionGenerator::question(LIBRARY, 0),
            &FacultyScope::global(),
            &options,
        )
        .unwrap_err();

    assert!(matches!(
        err,
        RagError::Timeout {
            service: Service::CrossEncoder,
            ..
        }
    ));
    assert!(err.is_retryable());
}

#[test]
fn test_answer_uses_translated_question_for_search() {
    let rag = TestRag::new();
    rag.index("handbook", None, &[LIBRARY, FEES]);

    let translated = FixedQuestionGenerator::question(FEES, 1);
    let pipeline = rag
        .pipeline
        .with_answer_generator(Arc::new(EchoAnswerGenerator))
        .with_translator(Arc::new(FixedTranslator(translated)));

    let answer = pipeline
        .answer("Học phí đóng khi nào?", &FacultyScope::global(), "vi")
        .unwrap();

    assert_eq!(answer.answer, "[vi] Học phí đóng khi nào? (2 contexts)");
    assert_eq!(answer.contexts.len(), 2);
    assert!(answer.contexts[0].context.contains(FEES));
}

#[test]
fn test_answer_requires_generator() {
    let rag = TestRag::new();
    let err = rag
        .pipeline
        .answer("question", &FacultyScope::global(), "en")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_chunk_with_locator() {
    let rag = TestRag::new();
    let document_id = rag.index("handbook", Some("IT"), &[LIBRARY, FEES]);

    let view = rag.pipeline.chunk_with_locator(&document_id, 1).unwrap();
    assert_eq!(view.chunk.text, FEES);
    assert_eq!(view.locator.name, "handbook handbook");
    assert_eq!(view.locator.url, "https://example.edu/handbook.pdf");

    let err = rag.pipeline.chunk_with_locator(&document_id, 9).unwrap_err();
    assert!(matches!(err, RagError::ChunkNotFound { .. }));

    let err = rag
        .pipeline
        .chunk_with_locator(&DocumentId::new("missing"), 0)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_listings_are_paginated() {
    let rag = TestRag::new();
    let chunks = ["one", "two", "three", "four", "five"];
    let document_id = rag.index("numbers", None, &chunks);

    let page = rag.pipeline.list_chunks(&document_id, 2, 2).unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.current_page, 2);
    let indices: Vec<u32> = page.items.iter().map(|(index, _)| *index).collect();
    assert_eq!(indices, vec![2, 3]);
    assert_eq!(page.items[0].1.text, "three");

    let beyond = rag.pipeline.list_chunks(&document_id, usize::MAX, 2).unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total, 5);

    let vectors = rag.pipeline.list_vectors(3, 10).unwrap();
    assert_eq!(vectors.total, 25);
    assert_eq!(vectors.total_pages, 3);
    assert_eq!(vectors.items.len(), 5);

    let err = rag
        .pipeline
        .list_chunks(&DocumentId::new("missing"), 1, 10)
        .unwrap_err();
    assert!(matches!(err, RagError::DocumentNotFound { .. }));
}
