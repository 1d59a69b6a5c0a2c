//! Error taxonomy for the federation layer.
//!
//! `ValidationError` is raised before anything is dispatched, `ConnectorError`
//! is scoped to one collection and recorded in diagnostics, and `SearchError`
//! is what a caller of the federation sees.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::DescriptorKind;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("field name must not be empty")]
    EmptyField,

    #[error("query text must not be empty")]
    EmptyQueryText,

    #[error("query vector must not be empty")]
    EmptyVector,

    #[error("query vector has a non-finite component at index {0}")]
    NonFiniteVector(usize),

    #[error("topk must be greater than zero")]
    ZeroTopK,

    #[error("minimum_should_match must be within [0, 1], got {0}")]
    MinimumShouldMatch(f64),

    #[error("similarity threshold must be within [0, 1], got {0}")]
    Similarity(f64),

    #[error("fusion needs at least two children, got {0}")]
    TooFewChildren(usize),

    #[error("fusion children must not be fusion descriptors")]
    NestedFusion,

    #[error("fusion children must not be ordering descriptors")]
    OrderByInFusion,

    #[error("fusion has {children} children but {weights} weights")]
    WeightCount { children: usize, weights: usize },

    #[error("fusion weight {index} must be finite and non-negative, got {value}")]
    InvalidWeight { index: usize, value: f64 },

    #[error("unknown fusion method: {0}")]
    UnknownFusionMethod(String),

    #[error("unknown similarity metric: {0}")]
    UnknownMetric(String),

    #[error("malformed weight list: {0}")]
    MalformedWeights(String),

    #[error("limit must be greater than zero")]
    ZeroLimit,

    #[error("at least one collection is required")]
    NoCollections,

    #[error("invalid collection name: {0:?}")]
    InvalidCollectionName(String),

    #[error("collection {name} is targeted on both {first} and {second}")]
    DuplicateCollection { name: String, first: String, second: String },

    #[error("no backend registered under {0:?}")]
    UnknownBackend(String),

    #[error("{collection}.{field} has dimension {expected}, query vector has {actual}")]
    DimensionMismatch { collection: String, field: String, expected: usize, actual: usize },
}

/// Collection-scoped failure. Serializable so it can be reported in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ConnectorError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("collection holds no entities")]
    EmptyCollection,

    #[error("unsupported query type: {0}")]
    UnsupportedQueryType(String),

    #[error("malformed filter: {0}")]
    MalformedFilter(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),
}

impl ConnectorError {
    pub fn unsupported(backend: &str, kind: DescriptorKind) -> Self {
        Self::UnsupportedQueryType(format!("{backend} cannot execute {kind}"))
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("All collections unavailable: {0}")]
    AllCollectionsUnavailable(String),

    #[error("Search cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SearchError>;
