use std::sync::Arc;

use docstore_core::config::FederationConfig;
use docstore_core::types::CollectionStatus;
use docstore_core::{
    CollectionRef, ConnectorError, DenseMatch, Fusion, FusionMethod, Metric, SearchRequest, TextMatch,
};
use docstore_hybrid::Federation;
use docstore_sqlite::{AttributeKind, CollectionSchema, SqliteBackend, SqliteStore, StoreDocument};
use docstore_text::{TantivyBackend, TextCollection, TextDocument};

fn text_backend() -> TantivyBackend {
    let guides = TextCollection::create_in_ram().expect("ram index");
    let doc = |id: &str, content: &str, year: u64| TextDocument {
        id: id.into(),
        title: String::new(),
        content: content.into(),
        category: "guide".into(),
        year,
    };
    guides
        .add_documents(&[
            doc("g1", "fire building in wet weather", 2019),
            doc("g2", "water filters and fire starters", 2021),
            doc("g3", "knots for shelters", 2020),
        ])
        .expect("index");
    TantivyBackend::new("text").with_collection("guides", guides)
}

fn sqlite_backend() -> SqliteBackend {
    let store = SqliteStore::open_in_memory().expect("store");
    store
        .create_collection("notes", CollectionSchema::new(2).with_attribute("year", AttributeKind::Integer))
        .expect("create");
    store
        .insert(
            "notes",
            &[
                StoreDocument::new("n1", "fire safety checklist").with_embedding(vec![1.0, 0.0]).with_attribute("year", 2022i64),
                StoreDocument::new("n2", "garden notes").with_embedding(vec![0.0, 1.0]).with_attribute("year", 2018i64),
            ],
        )
        .expect("insert");
    SqliteBackend::new("sqlite", Arc::new(store))
}

fn federation() -> Federation {
    Federation::new(FederationConfig::default())
        .with_backend(Arc::new(text_backend()))
        .with_backend(Arc::new(sqlite_backend()))
}

fn targets() -> Vec<CollectionRef> {
    vec![CollectionRef::new("text", "guides"), CollectionRef::new("sqlite", "notes")]
}

#[tokio::test]
async fn text_query_spans_both_backends() {
    let req = SearchRequest::new(TextMatch::new("content", "fire").unwrap(), targets(), 0, 10).unwrap();
    let response = federation().search(&req).await.expect("search");

    assert_eq!(response.total, 3);
    let mut collections: Vec<_> = response.rows.iter().map(|r| r.collection.as_str()).collect();
    collections.sort();
    collections.dedup();
    assert_eq!(collections, vec!["guides", "notes"]);
    assert!(response.rows.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(response.diagnostics["guides"].entity_count, Some(3));
    assert_eq!(response.diagnostics["notes"].entity_count, Some(2));
}

#[tokio::test]
async fn filters_are_routed_per_backend() {
    let req = SearchRequest::new(TextMatch::new("content", "fire").unwrap(), targets(), 0, 10)
        .unwrap()
        .with_filter("text", "year:2021")
        .with_filter("sqlite", "year > 2030");
    let response = federation().search(&req).await.expect("search");

    let ids: Vec<_> = response.rows.iter().map(|r| r.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["g2"]);
}

#[tokio::test]
async fn hybrid_fusion_degrades_to_capable_backend() {
    let fusion = Fusion::new(
        vec![
            TextMatch::new("content", "fire").unwrap().into(),
            DenseMatch::new("embedding", vec![1.0, 0.0], Metric::L2, 5).unwrap().into(),
        ],
        FusionMethod::RankFusion,
        vec![1.0, 1.0],
    )
    .unwrap();
    let req = SearchRequest::new(fusion, targets(), 0, 10).unwrap();
    let response = federation().search(&req).await.expect("search");

    assert!(matches!(
        &response.diagnostics["guides"].status,
        CollectionStatus::Failed { error: ConnectorError::UnsupportedQueryType(_) }
    ));
    assert_eq!(response.diagnostics["notes"].status, CollectionStatus::Ok);
    assert_eq!(response.rows[0].doc_id, "n1");
    assert_eq!(response.total, 2);
}

#[tokio::test]
async fn health_of_real_backends() {
    let health = federation().health().await;
    assert!(health.values().all(Result::is_ok));
}
