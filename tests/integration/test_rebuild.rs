//! Rebuilding the vector index from the chunk store.

use crate::common::{FixedQuestionGenerator, PoisonedEmbedding, TestRag, embedder_with, test_options};
use qarag::{
    ChunkStore, DocumentId, ErrorKind, PipelineOptions, RebuildFailurePolicy, VectorIndex,
    VectorMetadata,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Asserts that every stored id resolves to an entry built from its question.
fn assert_positional(rag: &TestRag, document_id: &DocumentId) {
    let entries: HashMap<_, _> = rag
        .index
        .list(0, usize::MAX)
        .unwrap()
        .into_iter()
        .map(|entry| (entry.id, entry))
        .collect();
    let embedder = rag.pipeline.embedder();

    let collection = rag.chunks.get_collection(document_id).unwrap().unwrap();
    for (&chunk_index, chunk) in &collection.chunks {
        assert!(chunk.is_consistent());
        for (question, id) in chunk.candidate_questions.iter().zip(&chunk.vector_ids) {
            let entry = entries.get(id).expect("stored id is indexed");
            assert_eq!(&entry.metadata.document_id, document_id);
            assert_eq!(entry.metadata.chunk_index, chunk_index);
            assert_eq!(entry.vector, embedder.embed(question).unwrap());
        }
    }
}

fn poisoned_rag(policy: RebuildFailurePolicy) -> (TestRag, Arc<PoisonedEmbedding>) {
    let embedding = Arc::new(PoisonedEmbedding::new());
    let rag = TestRag::with_parts(
        embedder_with(embedding.clone()),
        Arc::new(FixedQuestionGenerator),
        PipelineOptions {
            rebuild_failure_policy: policy,
            ..test_options()
        },
    );
    (rag, embedding)
}

#[test]
fn test_rebuild_restores_the_same_mapping() {
    let rag = TestRag::new();
    let first = rag.index("handbook", Some("IT"), &["Labs close at ten", "Printing costs extra"]);
    let second = rag.index("calendar", None, &["Term starts in September"]);

    let before = rag.chunks.get_collection(&first).unwrap().unwrap();
    let size = rag.index.len();

    let report = rag.pipeline.rebuild_all().unwrap();
    assert_eq!(report.collections, 2);
    assert_eq!(report.chunks, 3);
    assert_eq!(report.questions_embedded, 15);
    assert!(report.failures.is_empty());
    assert!(report.orphaned_documents.is_empty());

    assert_eq!(rag.index.len(), size);
    assert_positional(&rag, &first);
    assert_positional(&rag, &second);

    // Questions are untouched, ids are fresh
    let after = rag.chunks.get_collection(&first).unwrap().unwrap();
    for (index, chunk) in &after.chunks {
        let old = &before.chunks[index];
        assert_eq!(chunk.candidate_questions, old.candidate_questions);
        assert!(chunk.vector_ids.iter().all(|id| !old.vector_ids.contains(id)));
    }

    // A second rebuild changes nothing observable
    rag.pipeline.rebuild_all().unwrap();
    assert_eq!(rag.index.len(), size);
    assert_positional(&rag, &first);
    assert!(rag.pipeline.check_consistency().unwrap().is_consistent());
    assert!(!rag.pipeline.gate().is_under_maintenance());
}

#[test]
fn test_rebuild_drops_orphaned_vectors() {
    let rag = TestRag::new();
    let document_id = rag.index("handbook", None, &["Labs close at ten"]);

    let stray = rag
        .pipeline
        .embedder()
        .embed("a question nobody stored")
        .unwrap();
    rag.index
        .insert(
            stray,
            VectorMetadata::new(DocumentId::new("ghost"), 0, Default::default()),
        )
        .unwrap();

    let report = rag.pipeline.check_consistency().unwrap();
    assert_eq!(report.orphaned_vectors, 1);
    assert_eq!(report.dangling_vector_ids, 0);
    assert!(!report.is_consistent());

    rag.pipeline.rebuild_all().unwrap();
    assert_eq!(rag.index.len(), 5);
    assert_positional(&rag, &document_id);
    assert!(rag.pipeline.check_consistency().unwrap().is_consistent());
}

#[test]
fn test_rebuild_skips_collections_without_document() {
    let rag = TestRag::new();
    let orphan = rag.index("withdrawn", None, &["Old rules"]);
    rag.index("handbook", None, &["Labs close at ten"]);
    rag.documents.remove(&orphan);

    let report = rag.pipeline.rebuild_all().unwrap();
    assert_eq!(report.orphaned_documents, vec![orphan.clone()]);
    assert_eq!(report.collections, 1);
    assert_eq!(rag.index.len(), 5);

    // The collection is left in place, its ids now dangle
    assert!(rag.chunks.contains(&orphan).unwrap());
    let consistency = rag.pipeline.check_consistency().unwrap();
    assert_eq!(consistency.dangling_vector_ids, 5);
}

#[test]
fn test_rebuild_skip_policy_records_failures() {
    let (rag, embedding) = poisoned_rag(RebuildFailurePolicy::Skip);
    let document_id = rag.index("handbook", None, &["safe chunk", "poison chunk"]);
    assert_eq!(rag.index.len(), 10);

    embedding.arm();
    let report = rag.pipeline.rebuild_all().unwrap();

    assert_eq!(report.questions_embedded, 5);
    assert_eq!(report.failures.len(), 5);
    assert!(report.failures.iter().all(|f| {
        f.document_id == document_id && f.chunk_index == Some(1) && f.position.is_some()
    }));
    assert_eq!(rag.index.len(), 5);

    // The healthy chunk was rewritten with valid ids
    let chunk = rag.chunks.get_chunk(&document_id, 0).unwrap().unwrap();
    let indexed: Vec<_> = rag
        .index
        .list(0, usize::MAX)
        .unwrap()
        .into_iter()
        .map(|entry| entry.id)
        .collect();
    assert!(chunk.vector_ids.iter().all(|id| indexed.contains(id)));
}

#[test]
fn test_rebuild_abort_policy_stops_at_first_failure() {
    let (rag, embedding) = poisoned_rag(RebuildFailurePolicy::Abort);
    let document_id = rag.index("handbook", None, &["safe chunk", "poison chunk"]);

    embedding.arm();
    let err = rag.pipeline.rebuild_all().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalServiceFailure);

    // Chunk 0 was re-embedded before the failure
    assert_eq!(rag.index.len(), 5);
    let chunk = rag.chunks.get_chunk(&document_id, 0).unwrap().unwrap();
    let indexed: Vec<_> = rag
        .index
        .list(0, usize::MAX)
        .unwrap()
        .into_iter()
        .map(|entry| entry.id)
        .collect();
    assert!(chunk.vector_ids.iter().all(|id| indexed.contains(id)));
    assert!(!rag.pipeline.gate().is_under_maintenance());
}

#[test]
fn test_rebuild_skips_inconsistent_chunks() {
    let rag = TestRag::new();
    let document_id = rag.index("handbook", None, &["Labs close at ten", "Printing costs extra"]);

    let mut collection = rag.chunks.get_collection(&document_id).unwrap().unwrap();
    if let Some(chunk) = collection.chunks.get_mut(&0) {
        chunk.vector_ids.pop();
    }
    rag.chunks.put_collection(collection).unwrap();

    let consistency = rag.pipeline.check_consistency().unwrap();
    assert_eq!(consistency.inconsistent_chunks, vec![(document_id.clone(), 0)]);

    let report = rag.pipeline.rebuild_all().unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].chunk_index, Some(0));
    assert_eq!(report.failures[0].position, None);
    assert_eq!(report.questions_embedded, 5);
    assert_eq!(rag.index.len(), 5);
}
