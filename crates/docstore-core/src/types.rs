//! Request, response and row types shared by every backend.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::descriptor::QueryDescriptor;
use crate::error::{ConnectorError, ValidationError};

pub type Fields = BTreeMap<String, String>;

/// A collection inside one registered backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
    pub backend: String,
    pub name: String,
}

impl CollectionRef {
    pub fn new(backend: impl Into<String>, name: impl Into<String>) -> Self {
        Self { backend: backend.into(), name: name.into() }
    }
}

/// Whether `name` can be used as a collection (and native table) name.
pub fn is_valid_collection_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Map an arbitrary knowledge-base identifier onto `[A-Za-z0-9_]`.
pub fn sanitize_collection_name(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// A raw hit as a backend reports it, before normalization.
///
/// `score` is on the backend's own scale: a distance, a BM25 relevance, a
/// sort value. The connector turns it into a comparable score.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeHit {
    pub doc_id: String,
    pub score: f64,
    pub fields: Fields,
}

impl NativeHit {
    pub fn new(doc_id: impl Into<String>, score: f64) -> Self {
        Self { doc_id: doc_id.into(), score, fields: Fields::new() }
    }

    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }
}

/// One matched document.
///
/// - `doc_id` is unique only within `collection`; `key()` is the global key
/// - `native_score` is backend specific (for fused rows, the fused score)
/// - `score` is the normalized, comparable score. Higher is better
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub collection: String,
    pub doc_id: String,
    pub native_score: f64,
    pub score: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: Fields,
}

impl ResultRow {
    pub fn key(&self) -> (&str, &str) {
        (&self.collection, &self.doc_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    descriptor: QueryDescriptor,
    collections: Vec<CollectionRef>,
    offset: usize,
    limit: usize,
    filters: BTreeMap<String, String>,
    select_fields: Vec<String>,
    timeout: Option<Duration>,
}

impl SearchRequest {
    /// Identical collection references are collapsed into one.
    ///
    /// # Errors
    ///
    /// Returns an error if `limit` is zero, the collection list is empty, a
    /// name is not made of `[A-Za-z0-9_]`, or one name is targeted on two
    /// different backends.
    pub fn new(
        descriptor: impl Into<QueryDescriptor>,
        collections: Vec<CollectionRef>,
        offset: usize,
        limit: usize,
    ) -> Result<Self, ValidationError> {
        if limit == 0 {
            return Err(ValidationError::ZeroLimit);
        }
        if collections.is_empty() {
            return Err(ValidationError::NoCollections);
        }
        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        let mut unique = Vec::with_capacity(collections.len());
        for collection in collections {
            if !is_valid_collection_name(&collection.name) {
                return Err(ValidationError::InvalidCollectionName(collection.name));
            }
            match seen.get(&collection.name) {
                Some(backend) if *backend == collection.backend => continue,
                Some(backend) => {
                    return Err(ValidationError::DuplicateCollection {
                        name: collection.name,
                        first: backend.clone(),
                        second: collection.backend,
                    })
                }
                None => {
                    seen.insert(collection.name.clone(), collection.backend.clone());
                    unique.push(collection);
                }
            }
        }
        Ok(Self {
            descriptor: descriptor.into(),
            collections: unique,
            offset,
            limit,
            filters: BTreeMap::new(),
            select_fields: Vec::new(),
            timeout: None,
        })
    }

    /// Attach an opaque, backend-specific filter expression.
    pub fn with_filter(mut self, backend: impl Into<String>, expr: impl Into<String>) -> Self {
        self.filters.insert(backend.into(), expr.into());
        self
    }

    /// Stored fields to copy into every returned row.
    pub fn with_select_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Per-collection deadline, tighter than the configured one if smaller.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    pub fn collections(&self) -> &[CollectionRef] {
        &self.collections
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn select_fields(&self) -> &[String] {
        &self.select_fields
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn filter_for(&self, backend: &str) -> Option<&str> {
        self.filters.get(backend).map(String::as_str)
    }

    /// Number of globally ranked rows needed to serve this page.
    pub fn window(&self) -> usize {
        self.offset.saturating_add(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CollectionStatus {
    Ok,
    Empty,
    Failed { error: ConnectorError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDiagnostics {
    pub backend: String,
    #[serde(flatten)]
    pub status: CollectionStatus,
    pub entity_count: Option<u64>,
    pub candidates: Option<usize>,
    pub rows: usize,
    pub elapsed_ms: u64,
}

impl CollectionDiagnostics {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, CollectionStatus::Failed { .. })
    }
}

/// Ranked, windowed rows plus the distinct match count before windowing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub rows: Vec<ResultRow>,
    pub total: usize,
    pub diagnostics: BTreeMap<String, CollectionDiagnostics>,
}
