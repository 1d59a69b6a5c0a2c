//! Collection fan-out.
//!
//! One connector invocation per target collection, run concurrently. Each
//! invocation has its own deadline; a failure is recorded in diagnostics and
//! the collection contributes no rows. The orchestrator never windows.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use docstore_core::config::FederationConfig;
use docstore_core::types::{CollectionDiagnostics, CollectionRef, CollectionStatus, ResultRow};
use docstore_core::{
    Backend, Connector, ConnectorError, ConnectorOutput, Result, SearchError, SearchRequest, SearchResponse,
    ValidationError,
};

use crate::merge::merge;

pub struct Federation {
    connectors: HashMap<String, Connector>,
    config: FederationConfig,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Federation {
    /// Zero-valued settings fall back to their defaults.
    pub fn new(config: FederationConfig) -> Self {
        Self { connectors: HashMap::new(), config: config.sanitized() }
    }

    /// Register a backend under its own name, replacing any previous one.
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        let name = backend.name().to_string();
        if self.connectors.insert(name.clone(), Connector::new(backend, &self.config)).is_some() {
            tracing::warn!(backend = %name, "replaced previously registered backend");
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.register(backend);
        self
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// Probe every registered backend.
    pub async fn health(&self) -> BTreeMap<String, std::result::Result<(), ConnectorError>> {
        let probes = self.connectors.iter().map(|(name, connector)| async move {
            let status = connector.backend().health().await;
            if let Err(err) = &status {
                tracing::warn!(backend = %name, error = %err, "backend unhealthy");
            }
            (name.clone(), status)
        });
        join_all(probes).await.into_iter().collect()
    }

    /// # Errors
    ///
    /// Returns [`SearchError::Validation`] for a request rejected before
    /// dispatch and [`SearchError::AllCollectionsUnavailable`] when every
    /// target collection failed.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.search_with_cancel(request, &CancellationToken::new()).await
    }

    /// Like [`Federation::search`], abandoning every in-flight collection
    /// search once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Also returns [`SearchError::Cancelled`] if cancelled before completion.
    pub async fn search_with_cancel(&self, request: &SearchRequest, cancel: &CancellationToken) -> Result<SearchResponse> {
        self.validate(request)?;

        let started = Instant::now();
        let outcomes = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::warn!(collections = request.collections().len(), "search cancelled");
                return Err(SearchError::Cancelled);
            }
            outcomes = join_all(request.collections().iter().map(|c| self.search_collection(c, request))) => outcomes,
        };

        let mut partials = Vec::with_capacity(outcomes.len());
        let mut diagnostics = BTreeMap::new();
        for (collection, rows, diag) in outcomes {
            partials.push(rows);
            diagnostics.insert(collection, diag);
        }

        if diagnostics.values().all(CollectionDiagnostics::is_failure) {
            let summary = diagnostics
                .iter()
                .filter_map(|(name, d)| match &d.status {
                    CollectionStatus::Failed { error } => Some(format!("{name}: {error}")),
                    CollectionStatus::Ok | CollectionStatus::Empty => None,
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SearchError::AllCollectionsUnavailable(summary));
        }

        let response = merge(partials, request.offset(), request.limit(), diagnostics);
        tracing::debug!(
            collections = response.diagnostics.len(),
            total = response.total,
            rows = response.rows.len(),
            elapsed_ms = millis(started.elapsed()),
            "federated search complete"
        );
        Ok(response)
    }

    fn validate(&self, request: &SearchRequest) -> std::result::Result<(), ValidationError> {
        for collection in request.collections() {
            let connector = self
                .connectors
                .get(&collection.backend)
                .ok_or_else(|| ValidationError::UnknownBackend(collection.backend.clone()))?;
            for dense in request.descriptor().dense_matches() {
                match connector.backend().vector_dimension(&collection.name, dense.field()) {
                    Some(expected) if expected != dense.dimension() => {
                        return Err(ValidationError::DimensionMismatch {
                            collection: collection.name.clone(),
                            field: dense.field().to_string(),
                            expected,
                            actual: dense.dimension(),
                        });
                    }
                    Some(_) | None => {}
                }
            }
        }
        Ok(())
    }

    fn deadline(&self, request: &SearchRequest) -> Duration {
        let configured = self.config.collection_timeout();
        request.timeout().map_or(configured, |t| t.min(configured))
    }

    async fn search_collection(
        &self,
        collection: &CollectionRef,
        request: &SearchRequest,
    ) -> (String, Vec<ResultRow>, CollectionDiagnostics) {
        let started = Instant::now();
        let deadline = self.deadline(request);
        let outcome = match self.connectors.get(&collection.backend) {
            Some(connector) => {
                let search = connector.search(
                    &collection.name,
                    request.descriptor(),
                    request.filter_for(&collection.backend),
                    request.window(),
                    request.select_fields(),
                );
                match tokio::time::timeout(deadline, search).await {
                    Ok(result) => result,
                    Err(_) => Err(ConnectorError::Timeout(millis(deadline))),
                }
            }
            None => Err(ConnectorError::Unreachable(format!("no backend {}", collection.backend))),
        };
        let elapsed_ms = millis(started.elapsed());

        let mut diag = CollectionDiagnostics {
            backend: collection.backend.clone(),
            status: CollectionStatus::Ok,
            entity_count: None,
            candidates: None,
            rows: 0,
            elapsed_ms,
        };
        let rows = match outcome {
            Ok(ConnectorOutput { rows, entity_count, candidates }) => {
                diag.entity_count = Some(entity_count);
                diag.candidates = Some(candidates);
                diag.rows = rows.len();
                rows
            }
            Err(ConnectorError::EmptyCollection) => {
                diag.status = CollectionStatus::Empty;
                diag.entity_count = Some(0);
                Vec::new()
            }
            Err(error) => {
                tracing::warn!(
                    backend = %collection.backend,
                    collection = %collection.name,
                    error = %error,
                    elapsed_ms,
                    "collection search failed"
                );
                diag.status = CollectionStatus::Failed { error };
                Vec::new()
            }
        };
        (collection.name.clone(), rows, diag)
    }
}
