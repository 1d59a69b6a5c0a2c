//! docstore-hybrid
//!
//! Federated search across backends and collections: fan out one request to
//! every target collection, then merge, rank and window the partial results.

pub mod merge;
pub mod orchestrator;

pub use merge::{merge, RankedRows};
pub use orchestrator::Federation;
