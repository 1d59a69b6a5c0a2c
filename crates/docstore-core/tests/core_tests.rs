use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use figment::providers::{Format, Toml};
use figment::Figment;
use tempfile::TempDir;

use docstore_core::config::{resolve_with_base, Config, FederationConfig};
use docstore_core::fusion::ScoreScale;
use docstore_core::{
    Backend, Connector, ConnectorError, DenseMatch, DescriptorKind, Fusion, FusionMethod, Metric, NativeHit,
    QueryDescriptor, SearchScope, TextMatch,
};

struct MockBackend {
    entities: u64,
    kinds: HashSet<DescriptorKind>,
    searches: AtomicUsize,
    candidates: Mutex<Vec<usize>>,
    text_hits: Vec<NativeHit>,
    dense_hits: Vec<NativeHit>,
}

impl MockBackend {
    fn new(entities: u64, kinds: &[DescriptorKind]) -> Self {
        Self {
            entities,
            kinds: kinds.iter().copied().collect(),
            searches: AtomicUsize::new(0),
            candidates: Mutex::new(Vec::new()),
            text_hits: vec![NativeHit::new("a", 3.0), NativeHit::new("b", 1.0)],
            dense_hits: vec![NativeHit::new("b", 0.0), NativeHit::new("c", 1.0)],
        }
    }

    fn record(&self, scope: &SearchScope<'_>) {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.candidates.lock().unwrap().push(scope.candidates);
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports(&self, kind: DescriptorKind) -> bool {
        self.kinds.contains(&kind)
    }

    fn score_scale(&self, descriptor: &QueryDescriptor) -> ScoreScale {
        match descriptor {
            QueryDescriptor::DenseMatch(_) => ScoreScale::Distance,
            _ => ScoreScale::Relevance,
        }
    }

    async fn entity_count(&self, _collection: &str) -> Result<u64, ConnectorError> {
        Ok(self.entities)
    }

    async fn text_search(&self, scope: &SearchScope<'_>, _query: &TextMatch) -> Result<Vec<NativeHit>, ConnectorError> {
        self.record(scope);
        Ok(self.text_hits.clone())
    }

    async fn dense_search(&self, scope: &SearchScope<'_>, _query: &DenseMatch) -> Result<Vec<NativeHit>, ConnectorError> {
        self.record(scope);
        Ok(self.dense_hits.clone())
    }
}

fn federation(candidate_floor: usize) -> FederationConfig {
    FederationConfig { candidate_floor, ..FederationConfig::default() }
}

fn text() -> QueryDescriptor {
    TextMatch::new("content", "rust").unwrap().into()
}

fn dense(topk: usize) -> QueryDescriptor {
    DenseMatch::new("embedding", vec![0.1, 0.2], Metric::L2, topk).unwrap().into()
}

#[tokio::test]
async fn empty_collection_skips_native_search() {
    let backend = Arc::new(MockBackend::new(0, &[DescriptorKind::TextMatch]));
    let connector = Connector::new(backend.clone(), &federation(64));

    let err = connector.search("kb", &text(), None, 10, &[]).await.unwrap_err();

    assert_eq!(err, ConnectorError::EmptyCollection);
    assert_eq!(backend.searches.load(Ordering::SeqCst), 0, "no native call for an empty collection");
}

#[tokio::test]
async fn candidates_respect_window_floor_and_topk() {
    let backend = Arc::new(MockBackend::new(5, &[DescriptorKind::TextMatch, DescriptorKind::DenseMatch]));
    let connector = Connector::new(backend.clone(), &federation(64));

    let out = connector.search("kb", &text(), None, 10, &[]).await.expect("search");
    assert_eq!(out.candidates, 64);
    assert_eq!(out.entity_count, 5);

    connector.search("kb", &text(), None, 500, &[]).await.expect("search");
    connector.search("kb", &dense(200), None, 10, &[]).await.expect("search");

    assert_eq!(*backend.candidates.lock().unwrap(), vec![64, 500, 200]);
}

#[tokio::test]
async fn candidates_are_capped_by_max_window() {
    let backend = Arc::new(MockBackend::new(5, &[DescriptorKind::TextMatch]));
    let config = FederationConfig { max_window: 1_000, ..FederationConfig::default() };
    let connector = Connector::new(backend.clone(), &config);

    let out = connector.search("kb", &text(), None, 20_010, &[]).await.expect("search");
    assert_eq!(out.candidates, 1_000);
    assert_eq!(connector.candidate_count(10), 64);
}

#[tokio::test]
async fn leaf_rows_are_normalized() {
    let backend = Arc::new(MockBackend::new(5, &[DescriptorKind::TextMatch]));
    let connector = Connector::new(backend, &federation(8));

    let out = connector.search("kb", &text(), None, 10, &[]).await.expect("search");
    let a = out.rows.iter().find(|r| r.doc_id == "a").expect("row a");
    assert_eq!(a.collection, "kb");
    assert_eq!(a.native_score, 3.0);
    assert!((a.score - 0.75).abs() < 1e-12);
}

#[tokio::test]
async fn unsupported_leaf_is_reported() {
    let backend = Arc::new(MockBackend::new(5, &[DescriptorKind::TextMatch]));
    let connector = Connector::new(backend, &federation(8));

    let err = connector.search("kb", &dense(4), None, 10, &[]).await.unwrap_err();
    assert!(matches!(err, ConnectorError::UnsupportedQueryType(_)));
}

#[tokio::test]
async fn decomposed_fusion_combines_children() {
    let backend = Arc::new(MockBackend::new(5, &[DescriptorKind::TextMatch, DescriptorKind::DenseMatch]));
    let connector = Connector::new(backend.clone(), &federation(8));
    let fusion: QueryDescriptor =
        Fusion::new(vec![text(), dense(4)], FusionMethod::WeightedSum, vec![0.5, 0.5]).unwrap().into();

    let out = connector.search("kb", &fusion, None, 10, &[]).await.expect("search");

    assert_eq!(backend.searches.load(Ordering::SeqCst), 2);
    let ids: Vec<_> = out.rows.iter().map(|r| r.doc_id.as_str()).collect();
    // b: 0.5 * 0.5 + 0.5 * 1.0, a: 0.5 * 0.75, c: 0.5 * 0.5
    assert_eq!(ids, vec!["b", "a", "c"]);
    assert!((out.rows[0].score - 0.75).abs() < 1e-12);
}

#[tokio::test]
async fn fusion_with_unsupported_child_fails_whole_query() {
    let backend = Arc::new(MockBackend::new(5, &[DescriptorKind::TextMatch]));
    let connector = Connector::new(backend, &federation(8));
    let fusion: QueryDescriptor = Fusion::equal_weights(vec![text(), dense(4)], FusionMethod::RankFusion).unwrap().into();

    let err = connector.search("kb", &fusion, None, 10, &[]).await.unwrap_err();
    assert!(matches!(err, ConnectorError::UnsupportedQueryType(_)));
}

#[test]
fn federation_config_defaults_when_section_missing() {
    let config = Config::from_figment(Figment::new().merge(Toml::string("[stores]\nsqlite = \"db.sqlite\"\n")));
    let federation = FederationConfig::from_config(&config).expect("defaults");
    assert_eq!(federation, FederationConfig::default());
    assert_eq!(federation.candidate_floor, 64);
}

#[test]
fn federation_config_partial_override() {
    let toml = "[federation]\ncandidate_floor = 128\npool_size = 2\n";
    let config = Config::from_figment(Figment::new().merge(Toml::string(toml)));
    let federation = FederationConfig::from_config(&config).expect("federation");
    assert_eq!(federation.candidate_floor, 128);
    assert_eq!(federation.pool_size, 2);
    assert_eq!(federation.max_window, 10_000);
}

#[test]
fn federation_config_rejects_zero() {
    let config = Config::from_figment(Figment::new().merge(Toml::string("[federation]\npool_size = 0\n")));
    let err = FederationConfig::from_config(&config).unwrap_err();
    assert!(err.to_string().contains("pool_size"));
}

#[test]
fn sanitized_config_replaces_only_zero_fields() {
    let config = FederationConfig { pool_size: 0, max_window: 0, candidate_floor: 32, collection_timeout_ms: 100 };
    let sanitized = config.sanitized();
    assert_eq!(sanitized.pool_size, 8);
    assert_eq!(sanitized.max_window, 10_000);
    assert_eq!(sanitized.candidate_floor, 32);
    assert_eq!(sanitized.collection_timeout_ms, 100);
    assert!(sanitized.validate().is_ok());
}

#[test]
fn config_reads_toml_file_and_resolves_paths() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    fs::write(&path, "[stores]\ntext_dir = \"indexes\"\n").unwrap();

    let config = Config::from_figment(Figment::new().merge(Toml::file(&path)));
    let dir: String = config.get("stores.text_dir").expect("text_dir");
    assert_eq!(resolve_with_base(tmp.path(), &dir), tmp.path().join("indexes"));
    assert!(config.get::<String>("stores.missing").is_err());
}
