//! The SQLite store and its native search primitives.
//!
//! Search functions take a `&Connection` so a caller holding the lock can run
//! several of them in one session.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

use anyhow::bail;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};

use docstore_core::types::{Fields, NativeHit};
use docstore_core::{ConnectorError, DenseMatch, Metric, OrderBy, SortDirection, TextMatch};

use crate::schema::{apply_registry, create_collection, ensure_sqlite_vec_loaded, read_registry, CollectionSchema, CONTENT_FIELD, EMBEDDING_FIELD};

/// A document as written into a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreDocument {
    pub id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub attributes: BTreeMap<String, Value>,
}

impl StoreDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { id: id.into(), content: content.into(), embedding: None, attributes: BTreeMap::new() }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// Thread-safe via an internal `Mutex<Connection>`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    schemas: RwLock<HashMap<String, CollectionSchema>>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        ensure_sqlite_vec_loaded();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        ensure_sqlite_vec_loaded();
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        apply_registry(&conn)?;
        let schemas = read_registry(&conn)?.into_iter().collect();
        Ok(Self { conn: Mutex::new(conn), schemas: RwLock::new(schemas) })
    }

    pub fn create_collection(&self, name: &str, schema: CollectionSchema) -> anyhow::Result<()> {
        let conn = self.lock()?;
        create_collection(&conn, name, &schema)?;
        self.schemas
            .write()
            .map_err(|_| anyhow::anyhow!("schema cache poisoned"))?
            .insert(name.to_string(), schema);
        Ok(())
    }

    pub fn insert(&self, collection: &str, docs: &[StoreDocument]) -> anyhow::Result<usize> {
        let schema = self.schema(collection)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let columns: Vec<String> = schema.attributes.iter().map(|a| format!("\"{}\"", a.name)).collect();
        let placeholders: Vec<String> = (1..=columns.len() + 3).map(|i| format!("?{i}")).collect();
        let insert_doc = format!(
            "INSERT INTO \"{collection}\" (id, content, embedding{}{}) VALUES ({})",
            if columns.is_empty() { "" } else { ", " },
            columns.join(", "),
            placeholders.join(", ")
        );
        let insert_fts = format!("INSERT INTO \"{collection}_fts\" (rowid, body) VALUES (?1, ?2)");
        for doc in docs {
            if let Some(unknown) = doc.attributes.keys().find(|k| schema.attribute(k).is_none()) {
                bail!("unknown attribute {unknown:?} for collection {collection}");
            }
            let embedding = match &doc.embedding {
                Some(v) if v.len() != schema.dimension => {
                    bail!("document {} has dimension {}, collection {collection} expects {}", doc.id, v.len(), schema.dimension)
                }
                Some(v) => Value::Blob(vector_blob(v)),
                None => Value::Null,
            };
            let mut values = vec![Value::Text(doc.id.clone()), Value::Text(doc.content.clone()), embedding];
            values.extend(schema.attributes.iter().map(|a| doc.attributes.get(&a.name).cloned().unwrap_or(Value::Null)));
            tx.execute(&insert_doc, params_from_iter(values))?;
            let rowid = tx.last_insert_rowid();
            tx.execute(&insert_fts, rusqlite::params![rowid, doc.content])?;
        }
        tx.commit()?;
        Ok(docs.len())
    }

    pub fn schema(&self, collection: &str) -> Result<CollectionSchema, ConnectorError> {
        self.schemas
            .read()
            .map_err(|_| ConnectorError::Unreachable("schema cache poisoned".to_string()))?
            .get(collection)
            .cloned()
            .ok_or_else(|| ConnectorError::Unreachable(format!("unknown collection {collection}")))
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>, ConnectorError> {
        self.conn.lock().map_err(|_| ConnectorError::Unreachable("connection lock poisoned".to_string()))
    }
}

pub(crate) fn native(err: rusqlite::Error) -> ConnectorError {
    ConnectorError::Unreachable(err.to_string())
}

/// Little-endian f32 bytes, the layout sqlite-vec reads.
pub(crate) fn vector_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Lowercased alphanumeric terms, deduplicated, in first-seen order.
pub(crate) fn terms(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for term in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
        let term = term.to_lowercase();
        if !out.contains(&term) {
            out.push(term);
        }
    }
    out
}

pub(crate) fn entity_count(conn: &Connection, collection: &str) -> Result<u64, ConnectorError> {
    let count: i64 = conn
        .query_row(&format!("SELECT count(*) FROM \"{collection}\""), [], |row| row.get(0))
        .map_err(native)?;
    Ok(u64::try_from(count).unwrap_or(0))
}

pub(crate) struct Scan<'a> {
    pub collection: &'a str,
    pub schema: &'a CollectionSchema,
    pub filter: Option<&'a str>,
    pub candidates: usize,
    pub select_fields: &'a [String],
}

impl Scan<'_> {
    fn select_list(&self) -> (String, Vec<String>) {
        let names: Vec<String> = self.select_fields.iter().filter(|f| self.schema.has_column(f) && f.as_str() != EMBEDDING_FIELD).cloned().collect();
        let list = names.iter().map(|n| format!(", d.\"{n}\"")).collect();
        (list, names)
    }

    fn filter_clause(&self) -> String {
        self.filter.map(|f| format!(" AND ({f})")).unwrap_or_default()
    }

    fn limit(&self) -> i64 {
        i64::try_from(self.candidates).unwrap_or(i64::MAX)
    }

    fn prepare<'c>(&self, conn: &'c Connection, sql: &str) -> Result<rusqlite::Statement<'c>, ConnectorError> {
        tracing::trace!(collection = self.collection, sql, "prepare");
        conn.prepare(sql).map_err(|e| match self.filter {
            Some(_) => ConnectorError::MalformedFilter(e.to_string()),
            None => native(e),
        })
    }
}

fn read_fields(row: &Row<'_>, offset: usize, names: &[String]) -> rusqlite::Result<Fields> {
    let mut fields = Fields::new();
    for (i, name) in names.iter().enumerate() {
        let rendered = match row.get::<_, Value>(offset + i)? {
            Value::Null | Value::Blob(_) => continue,
            Value::Integer(v) => v.to_string(),
            Value::Real(v) => v.to_string(),
            Value::Text(v) => v,
        };
        fields.insert(name.clone(), rendered);
    }
    Ok(fields)
}

/// FTS5 match scored with `-bm25`. Rows are streamed best first until
/// `candidates` of them satisfy `minimum_should_match`.
pub(crate) fn text_search(conn: &Connection, q: &Scan<'_>, text: &TextMatch) -> Result<Vec<NativeHit>, ConnectorError> {
    if text.field() != CONTENT_FIELD {
        return Err(ConnectorError::UnsupportedQueryType(format!("{} is not a full-text field", text.field())));
    }
    let query_terms = terms(text.text());
    if query_terms.is_empty() {
        return Ok(Vec::new());
    }
    let required = text.required_terms(query_terms.len());
    let fts_query = query_terms.iter().map(|t| format!("\"{t}\"")).collect::<Vec<_>>().join(" OR ");

    let (select, names) = q.select_list();
    let c = q.collection;
    let sql = format!(
        "SELECT d.id, -bm25(\"{c}_fts\") AS score, d.content{select} \
         FROM \"{c}_fts\" JOIN \"{c}\" d ON d.rowid = \"{c}_fts\".rowid \
         WHERE \"{c}_fts\" MATCH ?1{} \
         ORDER BY score DESC, d.id ASC",
        q.filter_clause()
    );
    let mut stmt = q.prepare(conn, &sql)?;
    let mut rows = stmt.query([fts_query]).map_err(native)?;

    let mut hits = Vec::new();
    while let Some(row) = rows.next().map_err(native)? {
        if hits.len() >= q.candidates {
            break;
        }
        let content: String = row.get(2).map_err(native)?;
        let present = terms(&content);
        if query_terms.iter().filter(|t| present.contains(t)).count() < required {
            continue;
        }
        let id: String = row.get(0).map_err(native)?;
        let score: f64 = row.get(1).map_err(native)?;
        hits.push(NativeHit::new(id, score).with_fields(read_fields(row, 3, &names).map_err(native)?));
    }
    Ok(hits)
}

/// Brute-force distance scan with sqlite-vec's scalar distance functions.
pub(crate) fn dense_search(conn: &Connection, q: &Scan<'_>, dense: &DenseMatch) -> Result<Vec<NativeHit>, ConnectorError> {
    if dense.field() != EMBEDDING_FIELD {
        return Err(ConnectorError::UnsupportedQueryType(format!("{} is not a vector field", dense.field())));
    }
    if dense.dimension() != q.schema.dimension {
        return Err(ConnectorError::UnsupportedQueryType(format!(
            "query dimension {} does not match {}",
            dense.dimension(),
            q.schema.dimension
        )));
    }
    let distance = match dense.metric() {
        Metric::L2 => "vec_distance_l2",
        Metric::Cosine => "vec_distance_cosine",
        Metric::InnerProduct => {
            return Err(ConnectorError::UnsupportedQueryType("inner product distance".to_string()));
        }
    };

    let (select, names) = q.select_list();
    let sql = format!(
        "SELECT d.id, {distance}(d.embedding, ?1) AS distance{select} \
         FROM \"{}\" d WHERE d.embedding IS NOT NULL{} \
         ORDER BY distance ASC, d.id ASC LIMIT ?2",
        q.collection,
        q.filter_clause()
    );
    let mut stmt = q.prepare(conn, &sql)?;
    let rows = stmt
        .query_map(rusqlite::params![vector_blob(dense.vector()), q.limit()], |row| {
            Ok(NativeHit::new(row.get::<_, String>(0)?, row.get::<_, f64>(1)?).with_fields(read_fields(row, 2, &names)?))
        })
        .map_err(native)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(native)
}

/// Top `candidates` rows by a numeric attribute.
pub(crate) fn order_scan(conn: &Connection, q: &Scan<'_>, order: &OrderBy) -> Result<Vec<NativeHit>, ConnectorError> {
    let field = order.field();
    match q.schema.attribute(field) {
        Some(attr) if attr.kind.is_numeric() => {}
        _ => return Err(ConnectorError::UnsupportedQueryType(format!("{field} is not a numeric attribute"))),
    }
    let direction = match order.direction() {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    let (select, names) = q.select_list();
    let sql = format!(
        "SELECT d.id, d.\"{field}\"{select} FROM \"{}\" d \
         WHERE d.\"{field}\" IS NOT NULL{} \
         ORDER BY d.\"{field}\" {direction}, d.id ASC LIMIT ?1",
        q.collection,
        q.filter_clause()
    );
    let mut stmt = q.prepare(conn, &sql)?;
    let rows = stmt
        .query_map([q.limit()], |row| {
            Ok(NativeHit::new(row.get::<_, String>(0)?, row.get::<_, f64>(1)?).with_fields(read_fields(row, 2, &names)?))
        })
        .map_err(native)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(native)
}
