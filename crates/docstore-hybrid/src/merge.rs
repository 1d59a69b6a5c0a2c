//! Global ranking and windowing.
//!
//! Windowing is only reachable through [`RankedRows`], which can only be built
//! from the complete set of partial results. A page is therefore always cut
//! from the fully merged, deduplicated and sorted sequence.
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use docstore_core::fusion::best_first;
use docstore_core::types::{CollectionDiagnostics, ResultRow, SearchResponse};

/// Every distinct row, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedRows {
    rows: Vec<ResultRow>,
}

impl RankedRows {
    /// Rows sharing a (collection, document) key collapse into the best-ranked one.
    pub fn from_rows(rows: impl IntoIterator<Item = ResultRow>) -> Self {
        let mut best: HashMap<(String, String), ResultRow> = HashMap::new();
        for row in rows {
            let key = (row.collection.clone(), row.doc_id.clone());
            match best.get(&key) {
                Some(existing) if best_first(existing, &row) != Ordering::Greater => {}
                _ => {
                    best.insert(key, row);
                }
            }
        }
        let mut rows: Vec<ResultRow> = best.into_values().collect();
        rows.sort_by(best_first);
        Self { rows }
    }

    /// Distinct matches before windowing.
    pub fn total(&self) -> usize {
        self.rows.len()
    }

    /// Rows `[offset, offset + limit)` and the total. An offset past the end
    /// yields no rows, never an error.
    pub fn window(self, offset: usize, limit: usize) -> (Vec<ResultRow>, usize) {
        let total = self.total();
        let rows = self.rows.into_iter().skip(offset).take(limit).collect();
        (rows, total)
    }
}

/// Merge the partial results of every collection into one response page.
pub fn merge(
    partials: Vec<Vec<ResultRow>>,
    offset: usize,
    limit: usize,
    diagnostics: BTreeMap<String, CollectionDiagnostics>,
) -> SearchResponse {
    let (rows, total) = RankedRows::from_rows(partials.into_iter().flatten()).window(offset, limit);
    SearchResponse { rows, total, diagnostics }
}
