use async_trait::async_trait;

use crate::descriptor::{DenseMatch, DescriptorKind, Fusion, OrderBy, QueryDescriptor, TextMatch};
use crate::error::ConnectorError;
use crate::fusion::ScoreScale;
use crate::types::{NativeHit, ResultRow};

/// Where and how much one native call should search.
#[derive(Debug, Clone, Copy)]
pub struct SearchScope<'a> {
    pub collection: &'a str,
    pub filter: Option<&'a str>,
    pub candidates: usize,
    pub select_fields: &'a [String],
}

impl SearchScope<'_> {
    /// Dense searches never ask for fewer candidates than their own `topk`.
    #[must_use]
    pub fn for_leaf(self, descriptor: &QueryDescriptor) -> Self {
        match descriptor {
            QueryDescriptor::DenseMatch(dense) => Self { candidates: self.candidates.max(dense.topk()), ..self },
            QueryDescriptor::TextMatch(_) | QueryDescriptor::OrderBy(_) | QueryDescriptor::Fusion(_) => self,
        }
    }
}

/// A search engine holding named collections.
///
/// Implementations declare which descriptor kinds they execute natively and
/// on which scale their native scores live. Leaf searches return raw hits;
/// the connector normalizes them. A backend that supports [`DescriptorKind::Fusion`]
/// returns fused rows from `fusion_search` and must rank them with
/// [`crate::fusion::fuse`].
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, kind: DescriptorKind) -> bool;

    fn score_scale(&self, descriptor: &QueryDescriptor) -> ScoreScale;

    /// Configured dimensionality of a vector field, when known.
    fn vector_dimension(&self, _collection: &str, _field: &str) -> Option<usize> {
        None
    }

    async fn health(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn entity_count(&self, collection: &str) -> Result<u64, ConnectorError>;

    async fn text_search(&self, _scope: &SearchScope<'_>, _query: &TextMatch) -> Result<Vec<NativeHit>, ConnectorError> {
        Err(ConnectorError::unsupported(self.name(), DescriptorKind::TextMatch))
    }

    async fn dense_search(
        &self,
        _scope: &SearchScope<'_>,
        _query: &DenseMatch,
    ) -> Result<Vec<NativeHit>, ConnectorError> {
        Err(ConnectorError::unsupported(self.name(), DescriptorKind::DenseMatch))
    }

    async fn order_scan(&self, _scope: &SearchScope<'_>, _order: &OrderBy) -> Result<Vec<NativeHit>, ConnectorError> {
        Err(ConnectorError::unsupported(self.name(), DescriptorKind::OrderBy))
    }

    async fn fusion_search(&self, _scope: &SearchScope<'_>, _fusion: &Fusion) -> Result<Vec<ResultRow>, ConnectorError> {
        Err(ConnectorError::unsupported(self.name(), DescriptorKind::Fusion))
    }
}
