use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::Connection;

use docstore_core::fusion::{fuse, score_leaf, ScoreScale};
use docstore_core::types::{NativeHit, ResultRow};
use docstore_core::{
    Backend, ConnectorError, DenseMatch, DescriptorKind, Fusion, OrderBy, QueryDescriptor, SearchScope, TextMatch,
};

use crate::schema::{CollectionSchema, EMBEDDING_FIELD};
use crate::store::{self, Scan, SqliteStore};

/// Federation adapter over a [`SqliteStore`].
///
/// Text, dense and order-by leaves run as SQL. Fusion has no SQL form; it is
/// advertised so that every child scan runs under one connection lock, after
/// which the children are scored and ranked in Rust with [`fuse`].
pub struct SqliteBackend {
    name: String,
    store: Arc<SqliteStore>,
}

fn scale_for(descriptor: &QueryDescriptor) -> ScoreScale {
    match descriptor {
        QueryDescriptor::TextMatch(_) => ScoreScale::Relevance,
        QueryDescriptor::DenseMatch(_) => ScoreScale::Distance,
        QueryDescriptor::OrderBy(order) => ScoreScale::Ordinal(order.direction()),
        QueryDescriptor::Fusion(_) => ScoreScale::Identity,
    }
}

/// Owned copy of a [`SearchScope`] that can move onto a blocking thread.
struct OwnedScope {
    collection: String,
    filter: Option<String>,
    candidates: usize,
    select_fields: Vec<String>,
}

impl OwnedScope {
    fn new(scope: &SearchScope<'_>) -> Self {
        Self {
            collection: scope.collection.to_string(),
            filter: scope.filter.map(str::to_string),
            candidates: scope.candidates,
            select_fields: scope.select_fields.to_vec(),
        }
    }

    fn scan<'a>(&'a self, schema: &'a CollectionSchema, candidates: usize) -> Scan<'a> {
        Scan {
            collection: &self.collection,
            schema,
            filter: self.filter.as_deref(),
            candidates,
            select_fields: &self.select_fields,
        }
    }

    fn borrowed(&self) -> SearchScope<'_> {
        SearchScope {
            collection: &self.collection,
            filter: self.filter.as_deref(),
            candidates: self.candidates,
            select_fields: &self.select_fields,
        }
    }
}

impl SqliteBackend {
    pub fn new(name: impl Into<String>, store: Arc<SqliteStore>) -> Self {
        Self { name: name.into(), store }
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    async fn blocking<T, F>(&self, scope: &SearchScope<'_>, work: F) -> Result<T, ConnectorError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &CollectionSchema, &OwnedScope) -> Result<T, ConnectorError> + Send + 'static,
    {
        let schema = self.store.schema(scope.collection)?;
        let owned = OwnedScope::new(scope);
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let conn = store.lock()?;
            work(&conn, &schema, &owned)
        })
        .await
        .map_err(|e| ConnectorError::Unreachable(format!("search task failed: {e}")))?
    }
}

fn run_leaf(
    conn: &Connection,
    schema: &CollectionSchema,
    scope: &OwnedScope,
    descriptor: &QueryDescriptor,
) -> Result<Vec<NativeHit>, ConnectorError> {
    let candidates = scope.borrowed().for_leaf(descriptor).candidates;
    let scan = scope.scan(schema, candidates);
    match descriptor {
        QueryDescriptor::TextMatch(text) => store::text_search(conn, &scan, text),
        QueryDescriptor::DenseMatch(dense) => store::dense_search(conn, &scan, dense),
        QueryDescriptor::OrderBy(order) => store::order_scan(conn, &scan, order),
        QueryDescriptor::Fusion(_) => Err(ConnectorError::UnsupportedQueryType("nested fusion".to_string())),
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, _kind: DescriptorKind) -> bool {
        true
    }

    fn score_scale(&self, descriptor: &QueryDescriptor) -> ScoreScale {
        scale_for(descriptor)
    }

    fn vector_dimension(&self, collection: &str, field: &str) -> Option<usize> {
        if field != EMBEDDING_FIELD {
            return None;
        }
        self.store.schema(collection).ok().map(|s| s.dimension)
    }

    async fn health(&self) -> Result<(), ConnectorError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let conn = store.lock()?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).map_err(store::native)?;
            Ok::<(), ConnectorError>(())
        })
        .await
        .map_err(|e| ConnectorError::Unreachable(format!("health task failed: {e}")))?
    }

    async fn entity_count(&self, collection: &str) -> Result<u64, ConnectorError> {
        let scope = SearchScope { collection, filter: None, candidates: 0, select_fields: &[] };
        self.blocking(&scope, |conn, _, scope| store::entity_count(conn, &scope.collection)).await
    }

    async fn text_search(&self, scope: &SearchScope<'_>, query: &TextMatch) -> Result<Vec<NativeHit>, ConnectorError> {
        let query = query.clone();
        self.blocking(scope, move |conn, schema, scope| {
            store::text_search(conn, &scope.scan(schema, scope.candidates), &query)
        })
        .await
    }

    async fn dense_search(&self, scope: &SearchScope<'_>, query: &DenseMatch) -> Result<Vec<NativeHit>, ConnectorError> {
        let query = query.clone();
        self.blocking(scope, move |conn, schema, scope| {
            store::dense_search(conn, &scope.scan(schema, scope.candidates), &query)
        })
        .await
    }

    async fn order_scan(&self, scope: &SearchScope<'_>, order: &OrderBy) -> Result<Vec<NativeHit>, ConnectorError> {
        let order = order.clone();
        self.blocking(scope, move |conn, schema, scope| {
            store::order_scan(conn, &scope.scan(schema, scope.candidates), &order)
        })
        .await
    }

    /// Child scans share one locked session; fusion itself is the same
    /// in-process [`fuse`] the connector uses when decomposing.
    async fn fusion_search(&self, scope: &SearchScope<'_>, fusion: &Fusion) -> Result<Vec<ResultRow>, ConnectorError> {
        let fusion = fusion.clone();
        self.blocking(scope, move |conn, schema, scope| {
            let mut children = Vec::with_capacity(fusion.children().len());
            for child in fusion.children() {
                let hits = run_leaf(conn, schema, scope, child)?;
                children.push(score_leaf(&scope.collection, child, hits, scale_for(child)));
            }
            Ok(fuse(children, &fusion))
        })
        .await
    }
}
