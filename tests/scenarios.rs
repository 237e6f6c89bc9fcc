mod common;

use std::sync::Arc;

use hybrid_search::error::Error;
use hybrid_search::models::{ResultUnit, SearchMethod, SearchRequest};
use hybrid_search::store::{IndexStore, InMemoryStore, SqliteStore};

use common::*;

async fn ingest_manuals(services: &hybrid_search::app::Services, index: &str) {
    let source = StaticSource::new(&[
        ("manuals/billing/policy.pdf", POLICY_TEXT),
        ("manuals/logistics/shipping.pdf", SHIPPING_TEXT),
    ]);
    let report = services
        .ingestor
        .ingest(index, &source)
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(report.succeeded.len(), 2);
}

#[tokio::test]
async fn keyword_chunk_search_finds_refund_policy() {
    let services = memory_services(TopicProvider::new());
    ingest_manuals(&services, "docs-2024").await;

    let req = SearchRequest::new("docs-2024", "refund policy", SearchMethod::Keyword, ResultUnit::Chunk);
    let results = services.search.search(&req).await.unwrap();

    assert!(!results.is_empty());
    assert!(results.len() <= 5);
    let top = &results[0];
    assert_eq!(top.doc_name, "manuals/billing/policy.pdf");
    assert_eq!(top.docs_root, "s3://bucket");
    assert_eq!(top.service, "billing");
    assert!(top.text.to_lowercase().contains("refund"));
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn vector_document_search_on_empty_index_returns_nothing() {
    let services = memory_services(TopicProvider::new());
    services.indices.create_index("empty", DIMS).await.unwrap();

    let req = SearchRequest::new("empty", "refund", SearchMethod::Vector, ResultUnit::Document);
    assert!(services.search.search(&req).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_then_list() {
    let services = memory_services(TopicProvider::new());
    services.indices.create_index("docs-2023", DIMS).await.unwrap();
    services.indices.create_index("docs-2024", DIMS).await.unwrap();

    assert!(services.indices.delete_index("docs-2023").await.unwrap());
    assert!(!services.indices.delete_index("docs-2023").await.unwrap());

    let names = services.indices.list_indices().await.unwrap();
    assert!(!names.contains("docs-2023"));
    assert!(names.contains("docs-2024"));
}

#[tokio::test]
async fn throttled_twice_then_succeeds() {
    let provider = Arc::new(TopicProvider::throttling_first(2));
    let services = services_with(Arc::new(InMemoryStore::new()), provider.clone());
    let source = StaticSource::new(&[("policy.txt", "Refunds within 30 days.")]);

    let report = services.ingestor.ingest("docs", &source).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.succeeded, vec!["policy.txt"]);
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn always_throttled_document_fails_others_succeed() {
    let services = memory_services(TopicProvider::always_throttling("OVERLOAD"));
    let source = StaticSource::new(&[
        ("a/hot.txt", "OVERLOAD every single time."),
        ("a/calm.txt", "Refunds within 30 days."),
        ("a/broken.txt", "never fetched"),
    ]);

    let report = services.ingestor.ingest("docs", &source).await.unwrap();
    assert_eq!(report.succeeded, vec!["a/calm.txt"]);
    let failed: Vec<(&str, &str)> = report
        .failed
        .iter()
        .map(|f| (f.doc_name.as_str(), f.code.as_str()))
        .collect();
    assert_eq!(
        failed,
        vec![("a/broken.txt", "fetch_failed"), ("a/hot.txt", "embedding_unavailable")]
    );

    match report.into_result() {
        Err(Error::IngestionPartialFailure(r)) => assert_eq!(r.failed.len(), 2),
        other => panic!("expected partial failure, got {:?}", other),
    }
}

#[tokio::test]
async fn document_unit_never_exceeds_distinct_documents() {
    let services = memory_services(TopicProvider::new());
    ingest_manuals(&services, "docs").await;

    for method in [SearchMethod::Hybrid, SearchMethod::Keyword, SearchMethod::Vector] {
        let req = SearchRequest::new("docs", "refund shipping", method, ResultUnit::Document);
        let results = services.search.search(&req).await.unwrap();
        assert!(results.len() <= 2, "{} returned {} items", method, results.len());
        let mut names: Vec<&str> = results.iter().map(|r| r.doc_name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), results.len());
    }
}

#[tokio::test]
async fn hybrid_scores_stay_in_unit_interval() {
    let services = memory_services(TopicProvider::new());
    ingest_manuals(&services, "docs").await;

    let req = SearchRequest::new("docs", "refund", SearchMethod::Hybrid, ResultUnit::Chunk);
    let results = services.search.search(&req).await.unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    assert_eq!(results[0].doc_name, "manuals/billing/policy.pdf");
}

#[tokio::test]
async fn unknown_method_is_rejected_before_index_access() {
    let err = SearchRequest::parse("does-not-exist", "refund", "fuzzy", "chunk").unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    let err = SearchRequest::parse("does-not-exist", "refund", "keyword", "page").unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
}

#[tokio::test]
async fn reingestion_keeps_entry_count_stable_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn IndexStore> =
        Arc::new(SqliteStore::open(&dir.path().join("index.sqlite")).await.unwrap());
    let services = services_with(store.clone(), Arc::new(TopicProvider::new()));

    ingest_manuals(&services, "docs").await;
    let first = store.count_entries("docs", None).await.unwrap();
    assert!(first >= 2);

    ingest_manuals(&services, "docs").await;
    assert_eq!(store.count_entries("docs", None).await.unwrap(), first);

    let req = SearchRequest::new("docs", "refund policy", SearchMethod::Hybrid, ResultUnit::Document);
    let results = services.search.search(&req).await.unwrap();
    assert_eq!(results[0].doc_name, "manuals/billing/policy.pdf");
}

#[tokio::test]
async fn index_dimension_must_match_provider() {
    let services = memory_services(TopicProvider::new());
    services.indices.create_index("wide", 1024).await.unwrap();

    let source = StaticSource::new(&[("a.txt", "Refunds within 30 days.")]);
    let err = services.ingestor.ingest("wide", &source).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let req = SearchRequest::new("wide", "refund", SearchMethod::Vector, ResultUnit::Chunk);
    assert!(matches!(services.search.search(&req).await.unwrap_err(), Error::Config(_)));
}

const JAPANESE_POLICY: &str =
    "返金ポリシーについて説明します。購入から三十日以内であれば返金を受け付けます。";

async fn assert_japanese_keyword_hit(services: &hybrid_search::app::Services) {
    let source = StaticSource::new(&[
        ("manuals/billing/refund-ja.txt", JAPANESE_POLICY),
        ("manuals/logistics/shipping.txt", SHIPPING_TEXT),
    ]);
    services.ingestor.ingest("docs-ja", &source).await.unwrap();

    let req = SearchRequest::new("docs-ja", "返金", SearchMethod::Keyword, ResultUnit::Chunk);
    let results = services.search.search(&req).await.unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.doc_name == "manuals/billing/refund-ja.txt"));
    assert!(results[0].text.contains("返金"));

    let req = SearchRequest::new("docs-ja", "返金ポリシー", SearchMethod::Hybrid, ResultUnit::Document);
    let results = services.search.search(&req).await.unwrap();
    assert_eq!(results[0].doc_name, "manuals/billing/refund-ja.txt");
}

#[tokio::test]
async fn japanese_keyword_search_in_memory() {
    assert_japanese_keyword_hit(&memory_services(TopicProvider::new())).await;
}

#[tokio::test]
async fn japanese_keyword_search_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn IndexStore> =
        Arc::new(SqliteStore::open(&dir.path().join("index.sqlite")).await.unwrap());
    assert_japanese_keyword_hit(&services_with(store, Arc::new(TopicProvider::new()))).await;
}
