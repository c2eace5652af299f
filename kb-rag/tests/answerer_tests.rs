//! End-to-end tests for search and grounded answers through `KnowledgeBase`.

mod common;

use std::sync::Arc;

use common::{DIM, HashEmbedder, RecordingGenerator, Reply};
use kb_rag::{
    AnswerConfig, ChunkMetadata, Citation, Confidence, Document, DocumentId,
    INSUFFICIENT_INFORMATION, InMemoryVectorIndex, KnowledgeBase, MetadataFilter,
    ProviderErrorKind, RagConfig, RagError,
};

const QUESTION: &str = "What CAGE code does Acme hold?";

fn acme() -> MetadataFilter {
    MetadataFilter::tenant("acme")
}

fn config() -> RagConfig {
    RagConfig::builder().similarity_threshold(0.1).build().unwrap()
}

fn knowledge_base(config: RagConfig, generator: Arc<RecordingGenerator>) -> KnowledgeBase {
    kb_telemetry::init_test_telemetry();
    KnowledgeBase::builder()
        .config(config)
        .embedding_provider(Arc::new(HashEmbedder::default()))
        .generation_provider(generator)
        .vector_index(Arc::new(InMemoryVectorIndex::new(DIM)))
        .build()
        .unwrap()
}

async fn seed(kb: &KnowledgeBase) {
    kb.index_document(&Document::new(
        "17",
        "Acme holds CAGE code 1ABC2 and is registered in SAM.",
        ChunkMetadata::new("acme").with_category("company_profile"),
    ))
    .await
    .unwrap();
    kb.index_document(&Document::new(
        "99",
        "Globex holds CAGE code 9ZZZ9.",
        ChunkMetadata::new("globex").with_category("company_profile"),
    ))
    .await
    .unwrap();
}

#[tokio::test]
async fn empty_knowledge_base_never_calls_the_generator() {
    let generator = Arc::new(RecordingGenerator::new(Reply::CiteContext));
    let kb = knowledge_base(config(), generator.clone());

    let answer = kb.answer(QUESTION, &acme()).await.unwrap();

    assert_eq!(answer.answer_text, INSUFFICIENT_INFORMATION);
    assert_eq!(answer.confidence, Confidence::Low);
    assert!(answer.citations.is_empty());
    assert_eq!(answer.context_chars_used, 0);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn other_tenants_documents_are_invisible() {
    let generator = Arc::new(RecordingGenerator::new(Reply::CiteContext));
    let kb = knowledge_base(config(), generator.clone());
    seed(&kb).await;

    let answer = kb.answer(QUESTION, &MetadataFilter::tenant("initech")).await.unwrap();
    assert_eq!(answer.answer_text, INSUFFICIENT_INFORMATION);
    assert_eq!(generator.calls(), 0);

    let context = kb.search("CAGE code", 5, &MetadataFilter::tenant("globex"), 0.1).await.unwrap();
    assert!(context.contains("[KB:Doc#99_Chunk#0]"));
    assert!(!context.contains("Acme"));
}

#[tokio::test]
async fn answers_cite_only_supplied_chunks() {
    let generator = Arc::new(RecordingGenerator::new(Reply::CiteContext));
    let answer_config = AnswerConfig {
        medium_confidence_chars: 10,
        high_confidence_chars: 10_000,
        ..AnswerConfig::default()
    };
    let config =
        RagConfig::builder().similarity_threshold(0.1).answer(answer_config).build().unwrap();
    let kb = knowledge_base(config, generator.clone());
    seed(&kb).await;

    let answer = kb.answer(QUESTION, &acme()).await.unwrap();

    assert_eq!(generator.calls(), 1);
    // The prompt's own example marker is repeated by the generator but was never supplied.
    let cited = Citation { document_id: DocumentId::new("17"), chunk_index: 0 };
    assert_eq!(answer.citations, vec![cited]);
    assert_eq!(answer.confidence, Confidence::Medium);
    assert!(answer.context_chars_used > 0);

    let prompt = generator.last_prompt().unwrap();
    assert!(prompt.contains("1ABC2"));
    assert!(prompt.contains("[KB:Doc#17_Chunk#0]"));
    assert!(!prompt.contains("9ZZZ9"));
}

#[tokio::test]
async fn ids_with_spaces_and_hashes_are_cited() {
    let generator = Arc::new(RecordingGenerator::new(Reply::CiteContext));
    let kb = knowledge_base(config(), generator);
    kb.index_document(&Document::new(
        "Past Performance #3",
        "Acme delivered the Navy depot contract early.",
        ChunkMetadata::new("acme").with_category("past_performance"),
    ))
    .await
    .unwrap();

    let answer = kb.answer("Which Navy contract did Acme deliver?", &acme()).await.unwrap();

    let cited = Citation { document_id: DocumentId::new("Past Performance #3"), chunk_index: 0 };
    assert_eq!(answer.citations, vec![cited]);
}

#[tokio::test]
async fn uncited_answers_have_low_confidence() {
    let generator = Arc::new(RecordingGenerator::new(Reply::Text("It is 1ABC2.".into())));
    let kb = knowledge_base(config(), generator);
    seed(&kb).await;

    let answer = kb.answer(QUESTION, &acme()).await.unwrap();
    assert_eq!(answer.answer_text, "It is 1ABC2.");
    assert!(answer.citations.is_empty());
    assert_eq!(answer.confidence, Confidence::Low);
}

#[tokio::test]
async fn generation_failure_is_surfaced_without_fallback_text() {
    let reply = Reply::Fail(ProviderErrorKind::Authentication);
    let generator = Arc::new(RecordingGenerator::new(reply));
    let kb = knowledge_base(config(), generator.clone());
    seed(&kb).await;

    let err = kb.answer(QUESTION, &acme()).await.unwrap_err();

    assert!(matches!(
        err,
        RagError::GenerationError { kind: Some(ProviderErrorKind::Authentication), .. }
    ));
    assert_eq!(generator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_generation_is_retried_then_reported() {
    let generator = Arc::new(RecordingGenerator::new(Reply::Fail(ProviderErrorKind::RateLimited)));
    let kb = knowledge_base(config(), generator.clone());
    seed(&kb).await;

    let err = kb.answer(QUESTION, &acme()).await.unwrap_err();

    assert!(matches!(
        err,
        RagError::GenerationError { kind: Some(ProviderErrorKind::RateLimited), .. }
    ));
    assert_eq!(generator.calls(), 3);
}

#[tokio::test]
async fn blank_completion_is_a_generation_error() {
    let generator = Arc::new(RecordingGenerator::new(Reply::Text("   ".into())));
    let kb = knowledge_base(config(), generator);
    seed(&kb).await;

    let err = kb.answer(QUESTION, &acme()).await.unwrap_err();
    assert!(matches!(err, RagError::GenerationError { kind: None, .. }));
}

#[tokio::test]
async fn search_formats_entries_and_validates_input() {
    let kb = knowledge_base(config(), Arc::new(RecordingGenerator::new(Reply::CiteContext)));
    seed(&kb).await;
    let filter = MetadataFilter::tenant("acme").with_category("company_profile");

    let context = kb.search("Acme CAGE code", 5, &filter, 0.1).await.unwrap();
    assert!(context.starts_with("Acme holds CAGE code 1ABC2"));
    assert!(context.contains("\n[KB:Doc#17_Chunk#0] (similarity: "));

    let wrong_category = MetadataFilter::tenant("acme").with_category("past_performance");
    assert_eq!(kb.search("Acme CAGE code", 5, &wrong_category, 0.1).await.unwrap(), "");

    assert!(matches!(kb.search("  ", 5, &filter, 0.1).await, Err(RagError::ConfigError(_))));
    assert!(matches!(kb.search("Acme", 0, &filter, 0.1).await, Err(RagError::ConfigError(_))));
    assert!(matches!(kb.search("Acme", 5, &filter, 1.5).await, Err(RagError::ConfigError(_))));
}

#[tokio::test]
async fn statistics_are_scoped_to_the_filter() {
    let kb = knowledge_base(config(), Arc::new(RecordingGenerator::new(Reply::CiteContext)));
    seed(&kb).await;

    let stats = kb.get_index_statistics(&MetadataFilter::tenant("acme")).await.unwrap();
    assert_eq!(stats.total_documents, 1);
    assert_eq!(stats.total_chunks, 1);
    let content = "Acme holds CAGE code 1ABC2 and is registered in SAM.";
    assert_eq!(stats.avg_chunk_length, content.len() as f64);
}

#[tokio::test]
async fn builder_requires_matching_components() {
    kb_telemetry::init_test_telemetry();
    let missing = KnowledgeBase::builder()
        .embedding_provider(Arc::new(HashEmbedder::default()))
        .vector_index(Arc::new(InMemoryVectorIndex::new(DIM)))
        .build();
    assert!(matches!(missing, Err(RagError::ConfigError(_))));

    let mismatched = KnowledgeBase::builder()
        .embedding_provider(Arc::new(HashEmbedder::default()))
        .generation_provider(Arc::new(RecordingGenerator::new(Reply::CiteContext)))
        .vector_index(Arc::new(InMemoryVectorIndex::new(DIM * 2)))
        .build();
    assert!(matches!(mismatched, Err(RagError::ConfigError(_))));
}
