//! Per-collection DDL and the collection registry.
//!
//! A collection `c` is a row in `docstore_collections`, a document table `c`
//! (`id`, `content`, `embedding` plus declared attribute columns) and an FTS5
//! table `c_fts` whose rowids follow the document table. The FTS tokenizer
//! keeps diacritics so its terms agree with the minimum-should-match check.

use std::sync::Once;

use anyhow::bail;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use docstore_core::types::is_valid_collection_name;

pub const EMBEDDING_FIELD: &str = "embedding";
pub const CONTENT_FIELD: &str = "content";

const RESERVED_COLUMNS: [&str; 3] = ["id", CONTENT_FIELD, EMBEDDING_FIELD];

const REGISTRY_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS docstore_collections (
    name       TEXT PRIMARY KEY,
    dimension  INTEGER NOT NULL,
    attributes TEXT NOT NULL     -- JSON array of AttributeColumn
);
"#;

static VEC_EXTENSION: Once = Once::new();

/// Register sqlite-vec for every connection opened afterwards.
pub fn ensure_sqlite_vec_loaded() {
    VEC_EXTENSION.call_once(|| {
        // SAFETY: sqlite3_vec_init has the signature SQLite expects of an
        // extension entry point and lives for the whole process.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(sqlite_vec::sqlite3_vec_init as *const ())));
        }
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Integer,
    Real,
    Text,
}

impl AttributeKind {
    fn sql_type(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Real)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeColumn {
    pub name: String,
    pub kind: AttributeKind,
}

impl AttributeColumn {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// Shape of one collection: embedding dimensionality and attribute columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub dimension: usize,
    pub attributes: Vec<AttributeColumn>,
}

impl CollectionSchema {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, attributes: Vec::new() }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.push(AttributeColumn::new(name, kind));
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeColumn> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Whether `name` is a column of the document table.
    pub fn has_column(&self, name: &str) -> bool {
        RESERVED_COLUMNS.contains(&name) || self.attribute(name).is_some()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.dimension == 0 {
            bail!("embedding dimension must be greater than zero");
        }
        for (i, attr) in self.attributes.iter().enumerate() {
            if !is_valid_collection_name(&attr.name) {
                bail!("invalid attribute name {:?}", attr.name);
            }
            if RESERVED_COLUMNS.contains(&attr.name.as_str()) {
                bail!("attribute name {:?} is reserved", attr.name);
            }
            if self.attributes[..i].iter().any(|a| a.name == attr.name) {
                bail!("duplicate attribute {:?}", attr.name);
            }
        }
        Ok(())
    }
}

pub(crate) fn apply_registry(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(REGISTRY_SQL)
}

pub(crate) fn create_collection(conn: &Connection, name: &str, schema: &CollectionSchema) -> anyhow::Result<()> {
    if !is_valid_collection_name(name) {
        bail!("invalid collection name {name:?}");
    }
    schema.validate()?;

    let mut columns = vec![
        "id TEXT NOT NULL UNIQUE".to_string(),
        "content TEXT NOT NULL".to_string(),
        "embedding BLOB".to_string(),
    ];
    columns.extend(schema.attributes.iter().map(|a| format!("\"{}\" {}", a.name, a.kind.sql_type())));
    let ddl = format!(
        "CREATE TABLE \"{name}\" ({});\nCREATE VIRTUAL TABLE \"{name}_fts\" USING fts5(body, tokenize = 'unicode61 remove_diacritics 0');",
        columns.join(", ")
    );
    conn.execute_batch(&ddl)?;
    conn.execute(
        "INSERT INTO docstore_collections (name, dimension, attributes) VALUES (?1, ?2, ?3)",
        params![name, i64::try_from(schema.dimension)?, serde_json::to_string(&schema.attributes)?],
    )?;
    Ok(())
}

pub(crate) fn read_registry(conn: &Connection) -> anyhow::Result<Vec<(String, CollectionSchema)>> {
    let mut stmt = conn.prepare("SELECT name, dimension, attributes FROM docstore_collections ORDER BY name")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
    })?;
    let mut collections = Vec::new();
    for row in rows {
        let (name, dimension, attributes) = row?;
        let schema = CollectionSchema { dimension: usize::try_from(dimension)?, attributes: serde_json::from_str(&attributes)? };
        collections.push((name, schema));
    }
    Ok(collections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_collection_registers_schema() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_registry(&conn).expect("registry");
        let schema = CollectionSchema::new(3).with_attribute("year", AttributeKind::Integer);
        create_collection(&conn, "kb", &schema).expect("create");

        let registry = read_registry(&conn).expect("read");
        assert_eq!(registry, vec![("kb".to_string(), schema)]);

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name LIKE 'kb%' ORDER BY name")
            .expect("prepare")
            .query_map([], |row| row.get(0))
            .expect("query")
            .filter_map(|r| r.ok())
            .collect();
        assert!(tables.contains(&"kb".to_string()));
        assert!(tables.contains(&"kb_fts".to_string()));
    }

    #[test]
    fn schema_validation() {
        assert!(CollectionSchema::new(0).validate().is_err());
        assert!(CollectionSchema::new(2).with_attribute("content", AttributeKind::Text).validate().is_err());
        assert!(CollectionSchema::new(2).with_attribute("a-b", AttributeKind::Text).validate().is_err());
        let dup = CollectionSchema::new(2).with_attribute("y", AttributeKind::Real).with_attribute("y", AttributeKind::Integer);
        assert!(dup.validate().is_err());
    }

    #[test]
    fn duplicate_collection_is_rejected() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_registry(&conn).expect("registry");
        create_collection(&conn, "kb", &CollectionSchema::new(2)).expect("create");
        assert!(create_collection(&conn, "kb", &CollectionSchema::new(2)).is_err());
        assert!(create_collection(&conn, "bad-name", &CollectionSchema::new(2)).is_err());
    }
}
