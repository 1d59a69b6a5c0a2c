use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use docstore_core::fusion::ScoreScale;
use docstore_core::types::{is_valid_collection_name, NativeHit};
use docstore_core::{Backend, ConnectorError, DescriptorKind, OrderBy, QueryDescriptor, SearchScope, TextMatch};

use crate::collection::TextCollection;

/// Federation adapter over a set of tantivy collections.
///
/// Runs full-text matches and fast-field ordering natively. Dense matches are
/// not supported, so fusions that include one fail for this backend.
pub struct TantivyBackend {
	name: String,
	collections: HashMap<String, Arc<TextCollection>>,
}

impl TantivyBackend {
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into(), collections: HashMap::new() }
	}

	pub fn with_collection(mut self, collection: impl Into<String>, index: TextCollection) -> Self {
		self.collections.insert(collection.into(), Arc::new(index));
		self
	}

	/// Open every index directory under `root`; the directory name is the collection name.
	pub fn open_dir(name: impl Into<String>, root: &Path) -> Result<Self> {
		let mut backend = Self::new(name);
		for entry in std::fs::read_dir(root)? {
			let entry = entry?;
			if !entry.file_type()?.is_dir() { continue; }
			let collection = entry.file_name().to_string_lossy().to_string();
			if !is_valid_collection_name(&collection) {
				tracing::warn!(backend = %backend.name, collection, "skipping index directory with an invalid collection name");
				continue;
			}
			let index = TextCollection::open_in_dir(&entry.path())?;
			backend = backend.with_collection(collection, index);
		}
		tracing::debug!(backend = %backend.name, collections = backend.collections.len(), "opened text collections");
		Ok(backend)
	}

	fn collection(&self, name: &str) -> Result<Arc<TextCollection>, ConnectorError> {
		self.collections
			.get(name)
			.cloned()
			.ok_or_else(|| ConnectorError::Unreachable(format!("unknown collection {name}")))
	}

	async fn blocking<T, F>(&self, collection: &str, work: F) -> Result<T, ConnectorError>
	where
		T: Send + 'static,
		F: FnOnce(&TextCollection) -> Result<T, ConnectorError> + Send + 'static,
	{
		let index = self.collection(collection)?;
		tokio::task::spawn_blocking(move || work(&index))
			.await
			.map_err(|e| ConnectorError::Unreachable(format!("search task failed: {e}")))?
	}
}

#[async_trait]
impl Backend for TantivyBackend {
	fn name(&self) -> &str {
		&self.name
	}

	fn supports(&self, kind: DescriptorKind) -> bool {
		matches!(kind, DescriptorKind::TextMatch | DescriptorKind::OrderBy)
	}

	fn score_scale(&self, descriptor: &QueryDescriptor) -> ScoreScale {
		match descriptor {
			QueryDescriptor::TextMatch(_) => ScoreScale::Relevance,
			QueryDescriptor::OrderBy(order) => ScoreScale::Ordinal(order.direction()),
			QueryDescriptor::DenseMatch(_) | QueryDescriptor::Fusion(_) => ScoreScale::Identity,
		}
	}

	async fn entity_count(&self, collection: &str) -> Result<u64, ConnectorError> {
		Ok(self.collection(collection)?.num_docs())
	}

	async fn text_search(&self, scope: &SearchScope<'_>, query: &TextMatch) -> Result<Vec<NativeHit>, ConnectorError> {
		let query = query.clone();
		let filter = scope.filter.map(str::to_string);
		let select_fields = scope.select_fields.to_vec();
		let candidates = scope.candidates;
		self.blocking(scope.collection, move |index| index.text_search(&query, filter.as_deref(), candidates, &select_fields))
			.await
	}

	async fn order_scan(&self, scope: &SearchScope<'_>, order: &OrderBy) -> Result<Vec<NativeHit>, ConnectorError> {
		let order = order.clone();
		let filter = scope.filter.map(str::to_string);
		let select_fields = scope.select_fields.to_vec();
		let candidates = scope.candidates;
		self.blocking(scope.collection, move |index| index.order_scan(&order, filter.as_deref(), candidates, &select_fields))
			.await
	}
}
