//! docstore-sqlite
//!
//! Multi-modal document store on SQLite: FTS5 for full text, sqlite-vec
//! distance functions for dense vectors and plain columns for attributes.
//! Fusion is not pushed down into SQL: the child scans run back to back
//! under one connection lock and are ranked in Rust by the shared `fuse`.

pub mod schema;
pub mod store;
pub mod backend;

pub use backend::SqliteBackend;
pub use schema::{AttributeColumn, AttributeKind, CollectionSchema};
pub use store::{SqliteStore, StoreDocument};
