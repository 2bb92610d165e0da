//! End-to-end pipeline tests: ingest -> retrieve -> assemble against an
//! in-memory store, the deterministic hashing embedder, and a canned
//! generation provider.

use regqa_chunk::{ChunkerConfig, WindowChunker};
use regqa_embed::{EmbeddingBatch, EmbeddingProvider, HashingEmbeddingProvider};
use regqa_retriever::retrieval::{
    AnswerAssembler, AssemblerConfig, INSUFFICIENT_INFORMATION, Indexer, IngestError, NewDocument,
    Retriever, RetrieverConfig, StaticGenerationProvider,
};
use regqa_retriever::storage::sqlite_store::SqliteStore;
use regqa_retriever::storage::{DocumentStatus, DocumentStore};
use std::sync::Arc;

fn upload(title: &str, language: Option<&str>, text: &str) -> NewDocument {
    NewDocument {
        title: title.to_string(),
        source_url: None,
        language: language.map(str::to_string),
        bytes: text.as_bytes().to_vec(),
    }
}

async fn pipeline() -> (Arc<SqliteStore>, Arc<HashingEmbeddingProvider>, Indexer) {
    let store = Arc::new(SqliteStore::open_memory().await.unwrap());
    let embedder = Arc::new(HashingEmbeddingProvider::default());
    let chunker = WindowChunker::new(ChunkerConfig::default()).unwrap();
    let indexer = Indexer::new(store.clone(), embedder.clone(), chunker);
    (store, embedder, indexer)
}

fn retriever(
    store: &Arc<SqliteStore>,
    embedder: &Arc<HashingEmbeddingProvider>,
) -> Retriever {
    Retriever::new(
        store.clone(),
        embedder.clone(),
        RetrieverConfig::default(),
    )
}

#[tokio::test]
async fn test_ingest_produces_indexed_document_with_ordered_chunks() {
    let (store, _embedder, indexer) = pipeline().await;

    let text: String = (0..2500).map(|i| format!("tok{i} ")).collect();
    let document = indexer
        .ingest(upload("Tax Proclamation", Some("en"), &text))
        .await
        .unwrap();

    assert_eq!(document.status, DocumentStatus::Indexed);

    // 2500 tokens at 1024/100 -> windows at 0, 924, 1848.
    let chunks = store.get_chunks(document.id).await.unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(
        chunks.iter().map(|c| c.seq_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(chunks[1].content.starts_with("tok924"));
    for chunk in &chunks {
        assert!(chunk.embedding.is_some());
        assert_eq!(chunk.model_id.as_deref(), Some("hashing:fnv:256"));
    }
}

#[tokio::test]
async fn test_reingesting_identical_bytes_is_idempotent() {
    let (store, _embedder, indexer) = pipeline().await;

    let text = "Value added tax applies to every taxable transaction.";
    let first = indexer.ingest(upload("VAT Directive", None, text)).await.unwrap();
    let chunk_count = store.get_chunks(first.id).await.unwrap().len();

    // Same bytes, different title: content identity wins.
    let second = indexer
        .ingest(upload("VAT Directive (copy)", None, text))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.title, "VAT Directive");
    assert_eq!(store.get_chunks(first.id).await.unwrap().len(), chunk_count);
    assert_eq!(store.stats().await.unwrap().documents, 1);
}

#[tokio::test]
async fn test_concurrent_identical_ingests_yield_one_document() {
    let (store, _embedder, indexer) = pipeline().await;
    let indexer = Arc::new(indexer);

    let text = "Excise duty rates are revised annually by directive.";
    let (a, b) = tokio::join!(
        indexer.ingest(upload("Excise A", None, text)),
        indexer.ingest(upload("Excise B", None, text)),
    );

    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.id, b.id);
    assert_eq!(store.stats().await.unwrap().documents, 1);

    let chunks = store.get_chunks(a.id).await.unwrap();
    let mut seqs: Vec<i64> = chunks.iter().map(|c| c.seq_index).collect();
    seqs.dedup();
    assert_eq!(seqs.len(), chunks.len(), "no duplicate sequence indices");
}

#[tokio::test]
async fn test_retrieval_is_deterministic_and_relevant() {
    let (store, embedder, indexer) = pipeline().await;

    indexer
        .ingest(upload(
            "Income Tax Proclamation",
            Some("en"),
            "Employment income tax is withheld monthly by the employer from each payment.",
        ))
        .await
        .unwrap();
    indexer
        .ingest(upload(
            "Customs Directive",
            Some("en"),
            "Customs valuation of imported vehicles follows the transaction value method.",
        ))
        .await
        .unwrap();

    let retriever = retriever(&store, &embedder);
    let first = retriever
        .retrieve("employment income tax withheld", Some("en"), 5)
        .await;
    let second = retriever
        .retrieve("employment income tax withheld", Some("en"), 5)
        .await;

    assert!(!first.is_empty());
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.chunk.id, b.chunk.id);
        assert_eq!(a.score, b.score);
        assert_eq!(a.signal, b.signal);
    }
    assert_eq!(first[0].document.title, "Income Tax Proclamation");
}

#[tokio::test]
async fn test_empty_store_retrieves_nothing_and_answers_safely() {
    let (store, embedder, _indexer) = pipeline().await;

    let retriever = retriever(&store, &embedder);
    let ranked = retriever.retrieve("anything at all", None, 10).await;
    assert!(ranked.is_empty());

    let assembler = AnswerAssembler::new(
        Arc::new(StaticGenerationProvider::new("unused", 0.9)),
        AssemblerConfig::default(),
    );
    let answer = assembler.assemble("anything at all", &ranked).await;

    assert_eq!(answer.response_text, INSUFFICIENT_INFORMATION);
    assert!(answer.citations.is_empty());
    assert_eq!(answer.confidence, 0.0);
}

#[tokio::test]
async fn test_language_filter_excludes_other_languages() {
    let (store, embedder, indexer) = pipeline().await;

    indexer
        .ingest(upload(
            "English Guide",
            Some("en"),
            "Taxpayer registration numbers are issued at regional offices.",
        ))
        .await
        .unwrap();
    indexer
        .ingest(upload(
            "Amharic Guide",
            Some("am"),
            "Taxpayer registration numbers are issued by the ministry branch.",
        ))
        .await
        .unwrap();
    indexer
        .ingest(upload(
            "Untagged Notice",
            None,
            "Taxpayer registration numbers must appear on every invoice.",
        ))
        .await
        .unwrap();

    let retriever = retriever(&store, &embedder);
    let results = retriever
        .retrieve("taxpayer registration numbers", Some("am"), 10)
        .await;

    assert!(!results.is_empty());
    for result in &results {
        let language = result.document.language.as_deref();
        assert!(language.is_none() || language == Some("am"));
    }
}

#[tokio::test]
async fn test_failed_ingest_is_excluded_then_retryable() {
    struct FailingEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed_passages(&self, _texts: &[String]) -> regqa_embed::Result<EmbeddingBatch> {
            Err(regqa_embed::EmbedError::invalid_config(
                "embedding service down",
            ))
        }
        async fn embed_query(&self, _text: &str) -> regqa_embed::Result<Vec<half::f16>> {
            Err(regqa_embed::EmbedError::invalid_config(
                "embedding service down",
            ))
        }
        fn dimension(&self) -> usize {
            256
        }
        // Same identity as the hashing embedder so retried vectors are
        // comparable.
        fn model_id(&self) -> String {
            "hashing:fnv:256".to_string()
        }
    }

    let store = Arc::new(SqliteStore::open_memory().await.unwrap());
    let chunker = WindowChunker::new(ChunkerConfig::default()).unwrap();
    let text = "Withholding tax applies to payments for imported services.";

    let broken = Indexer::new(store.clone(), Arc::new(FailingEmbedder), chunker.clone());
    let result = broken.ingest(upload("Withholding Rules", None, text)).await;
    assert!(matches!(result, Err(IngestError::Embedding { .. })));

    let failed = store
        .list_documents()
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    assert_eq!(failed.status, DocumentStatus::Failed);

    // Failed documents are invisible to retrieval.
    let embedder = Arc::new(HashingEmbeddingProvider::default());
    let retriever = retriever(&store, &embedder);
    assert!(
        retriever
            .retrieve("withholding tax imported services", None, 10)
            .await
            .is_empty()
    );

    // Caller-driven retry: re-ingest the same bytes with the service back.
    let healthy = Indexer::new(store.clone(), embedder.clone(), chunker);
    let document = healthy
        .ingest(upload("Withholding Rules", None, text))
        .await
        .unwrap();
    assert_eq!(document.id, failed.id);
    assert_eq!(document.status, DocumentStatus::Indexed);

    let results = retriever
        .retrieve("withholding tax imported services", None, 10)
        .await;
    assert!(!results.is_empty());
}

#[tokio::test]
async fn test_answers_cite_only_retrieved_chunks() {
    let (store, embedder, indexer) = pipeline().await;

    indexer
        .ingest(upload(
            "VAT Proclamation",
            Some("en"),
            "A person must register for value added tax when annual turnover exceeds the threshold set by directive.",
        ))
        .await
        .unwrap();

    let retriever = retriever(&store, &embedder);
    let ranked = retriever
        .retrieve("when must a person register for value added tax", Some("en"), 5)
        .await;
    assert!(!ranked.is_empty());

    let assembler = AnswerAssembler::new(
        Arc::new(StaticGenerationProvider::new(
            "Registration is required once turnover exceeds the directive threshold [1].",
            0.85,
        )),
        AssemblerConfig::default(),
    );
    let answer = assembler.assemble("when must a person register?", &ranked).await;

    assert!(!answer.citations.is_empty());
    assert!(answer.confidence > 0.0 && answer.confidence <= 1.0);

    // Citation grounding: every citation maps back to a ranked chunk.
    for citation in &answer.citations {
        let grounded = ranked.iter().any(|r| {
            r.document.title == citation.source_title
                && r.chunk
                    .content
                    .starts_with(citation.excerpt.trim_end_matches("..."))
        });
        assert!(grounded, "citation not grounded in ranked chunks");
    }
}
