//! Per-backend connector.
//!
//! Wraps a [`Backend`] with a bounded session pool, the empty-collection
//! probe, the candidate floor and descriptor dispatch. Fusion runs natively
//! when the backend supports it and is decomposed into child searches
//! otherwise; both paths rank with [`fuse`].
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;

use crate::config::FederationConfig;
use crate::descriptor::{DescriptorKind, Fusion, QueryDescriptor};
use crate::error::ConnectorError;
use crate::fusion::{fuse, score_leaf};
use crate::traits::{Backend, SearchScope};
use crate::types::ResultRow;

/// Rows from one collection plus what was learned while producing them.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorOutput {
    pub rows: Vec<ResultRow>,
    pub entity_count: u64,
    pub candidates: usize,
}

pub struct Connector {
    backend: Arc<dyn Backend>,
    sessions: Semaphore,
    candidate_floor: usize,
    max_window: usize,
}

impl Connector {
    pub fn new(backend: Arc<dyn Backend>, config: &FederationConfig) -> Self {
        Self {
            backend,
            sessions: Semaphore::new(config.pool_size.max(1)),
            candidate_floor: config.candidate_floor,
            max_window: config.max_window.max(1),
        }
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Candidates requested per native call for a page ending at `window`,
    /// never fewer than the floor and never more than `max_window`.
    pub fn candidate_count(&self, window: usize) -> usize {
        window.max(self.candidate_floor).min(self.max_window)
    }

    /// Search one collection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::EmptyCollection`] without searching when the
    /// collection holds no entities, and any error the backend reports.
    pub async fn search(
        &self,
        collection: &str,
        descriptor: &QueryDescriptor,
        filter: Option<&str>,
        window: usize,
        select_fields: &[String],
    ) -> Result<ConnectorOutput, ConnectorError> {
        let _session = self
            .sessions
            .acquire()
            .await
            .map_err(|_| ConnectorError::Unreachable(format!("{} session pool closed", self.name())))?;
        let started = Instant::now();

        let entity_count = self.backend.entity_count(collection).await?;
        if entity_count == 0 {
            tracing::info!(backend = %self.name(), collection, "collection is empty, skipping search");
            return Err(ConnectorError::EmptyCollection);
        }

        let candidates = self.candidate_count(window);
        let scope = SearchScope { collection, filter, candidates, select_fields };
        tracing::trace!(backend = %self.name(), collection, ?descriptor, "dispatching");

        let rows = match descriptor {
            QueryDescriptor::Fusion(fusion) if self.backend.supports(DescriptorKind::Fusion) => {
                self.backend.fusion_search(&scope, fusion).await?
            }
            QueryDescriptor::Fusion(fusion) => self.decompose(&scope, fusion).await?,
            QueryDescriptor::TextMatch(_) | QueryDescriptor::DenseMatch(_) | QueryDescriptor::OrderBy(_) => {
                self.execute_leaf(&scope, descriptor).await?
            }
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(
            backend = %self.name(),
            collection,
            entity_count,
            candidates,
            rows = rows.len(),
            elapsed_ms,
            "collection searched"
        );
        Ok(ConnectorOutput { rows, entity_count, candidates })
    }

    async fn execute_leaf(
        &self,
        scope: &SearchScope<'_>,
        descriptor: &QueryDescriptor,
    ) -> Result<Vec<ResultRow>, ConnectorError> {
        let kind = descriptor.kind();
        if !self.backend.supports(kind) {
            return Err(ConnectorError::unsupported(self.name(), kind));
        }
        let scope = scope.for_leaf(descriptor);
        let hits = match descriptor {
            QueryDescriptor::TextMatch(query) => self.backend.text_search(&scope, query).await?,
            QueryDescriptor::DenseMatch(query) => self.backend.dense_search(&scope, query).await?,
            QueryDescriptor::OrderBy(order) => self.backend.order_scan(&scope, order).await?,
            QueryDescriptor::Fusion(_) => return Err(ConnectorError::unsupported(self.name(), kind)),
        };
        Ok(score_leaf(scope.collection, descriptor, hits, self.backend.score_scale(descriptor)))
    }

    /// Any child the backend cannot run fails the whole fusion; a clause is
    /// never dropped.
    async fn decompose(&self, scope: &SearchScope<'_>, fusion: &Fusion) -> Result<Vec<ResultRow>, ConnectorError> {
        let mut children = Vec::with_capacity(fusion.children().len());
        for child in fusion.children() {
            children.push(self.execute_leaf(scope, child).await?);
        }
        Ok(fuse(children, fusion))
    }
}
