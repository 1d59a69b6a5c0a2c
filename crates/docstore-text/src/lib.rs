//! docstore-text
//!
//! Tantivy inverted-index backend. Each collection is one tantivy `Index`
//! built from `tantivy_utils::build_schema`; see `collection` for indexing and
//! querying a single collection and `backend` for the federation-facing adapter.

pub mod tantivy_utils;
pub mod collection;
pub mod backend;

pub use backend::TantivyBackend;
pub use collection::{TextCollection, TextDocument};
