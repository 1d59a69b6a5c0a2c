use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::fastfield::FastValue;
use tantivy::query::{AllQuery, BooleanQuery, ConstScoreQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, FieldType, IndexRecordOption, Value};
use tantivy::tokenizer::TokenStream;
use tantivy::{doc, DocAddress, Index, IndexReader, Order, Searcher, TantivyDocument, Term};

use docstore_core::types::{Fields, NativeHit};
use docstore_core::{ConnectorError, OrderBy, SortDirection, TextMatch};

use crate::tantivy_utils::{build_schema, native, register_tokenizer};

/// A document as written into a text collection.
#[derive(Debug, Clone, Deserialize)]
pub struct TextDocument {
	pub id: String,
	#[serde(default)]
	pub title: String,
	pub content: String,
	#[serde(default)]
	pub category: String,
	#[serde(default)]
	pub year: u64,
}

/// One tantivy index holding one collection.
pub struct TextCollection {
	index: Index,
	reader: IndexReader,
	id_field: Field,
	title_field: Field,
	content_field: Field,
	category_field: Field,
	year_field: Field,
}

impl TextCollection {
	pub fn create_in_ram() -> Result<Self> {
		Self::from_index(Index::create_in_ram(build_schema()))
	}

	pub fn create_in_dir(index_dir: &Path) -> Result<Self> {
		std::fs::create_dir_all(index_dir)?;
		Self::from_index(Index::create_in_dir(index_dir, build_schema())?)
	}

	pub fn open_in_dir(index_dir: &Path) -> Result<Self> {
		Self::from_index(Index::open_in_dir(index_dir)?)
	}

	fn from_index(index: Index) -> Result<Self> {
		register_tokenizer(&index);
		let reader = index.reader()?;
		let schema = index.schema();
		let id_field = schema.get_field("id")?;
		let title_field = schema.get_field("title")?;
		let content_field = schema.get_field("content")?;
		let category_field = schema.get_field("category")?;
		let year_field = schema.get_field("year")?;
		Ok(Self { index, reader, id_field, title_field, content_field, category_field, year_field })
	}

	pub fn add_documents(&self, docs: &[TextDocument]) -> Result<usize> {
		let mut index_writer = self.index.writer(50_000_000)?;
		for d in docs {
			let doc = doc!(
				self.id_field => d.id.clone(),
				self.title_field => d.title.clone(),
				self.content_field => d.content.clone(),
				self.category_field => d.category.clone(),
				self.year_field => d.year,
			);
			index_writer.add_document(doc)?;
		}
		index_writer.commit()?;
		self.reader.reload()?;
		Ok(docs.len())
	}

	pub fn num_docs(&self) -> u64 {
		self.reader.searcher().num_docs()
	}

	/// BM25 search over the analyzed terms of `query`, requiring at least
	/// `required_terms` of them to match.
	pub fn text_search(&self, query: &TextMatch, filter: Option<&str>, candidates: usize, select_fields: &[String]) -> Result<Vec<NativeHit>, ConnectorError> {
		let field = self.full_text_field(query.field())?;
		let mut analyzer = self.index.tokenizer_for_field(field).map_err(native)?;
		let mut stream = analyzer.token_stream(query.text());
		let mut terms = Vec::new();
		while stream.advance() {
			terms.push(stream.token().text.clone());
		}
		terms.sort();
		terms.dedup();
		if terms.is_empty() {
			tracing::debug!(field = query.field(), "query analyzed to no terms");
			return Ok(Vec::new());
		}

		let required = query.required_terms(terms.len());
		let clauses: Vec<Box<dyn Query>> = terms
			.iter()
			.map(|t| Box::new(TermQuery::new(Term::from_field_text(field, t), IndexRecordOption::WithFreqs)) as Box<dyn Query>)
			.collect();
		let matcher = Box::new(BooleanQuery::union_with_minimum_required_clauses(clauses, required));
		let search_query = self.with_filter(matcher, filter)?;

		let searcher = self.reader.searcher();
		let top_docs = searcher.search(search_query.as_ref(), &TopDocs::with_limit(candidates)).map_err(native)?;
		top_docs
			.into_iter()
			.map(|(score, addr)| self.hit(&searcher, addr, f64::from(score), select_fields))
			.collect()
	}

	/// Top `candidates` documents by a fast numeric field; the field value is the score.
	#[allow(clippy::cast_precision_loss)]
	pub fn order_scan(&self, order: &OrderBy, filter: Option<&str>, candidates: usize, select_fields: &[String]) -> Result<Vec<NativeHit>, ConnectorError> {
		let schema = self.index.schema();
		let field = schema
			.get_field(order.field())
			.map_err(|_| ConnectorError::UnsupportedQueryType(format!("unknown field {}", order.field())))?;
		let query = self.with_filter(Box::new(AllQuery), filter)?;
		let direction = match order.direction() {
			SortDirection::Asc => Order::Asc,
			SortDirection::Desc => Order::Desc,
		};
		match schema.get_field_entry(field).field_type() {
			FieldType::U64(opts) if opts.is_fast() => self.ordered::<u64>(query.as_ref(), order.field(), direction, candidates, select_fields, |v| v as f64),
			FieldType::I64(opts) if opts.is_fast() => self.ordered::<i64>(query.as_ref(), order.field(), direction, candidates, select_fields, |v| v as f64),
			FieldType::F64(opts) if opts.is_fast() => self.ordered::<f64>(query.as_ref(), order.field(), direction, candidates, select_fields, |v| v),
			_ => Err(ConnectorError::UnsupportedQueryType(format!("{} is not a fast numeric field", order.field()))),
		}
	}

	fn ordered<T: FastValue>(&self, query: &dyn Query, field: &str, direction: Order, candidates: usize, select_fields: &[String], to_score: fn(T) -> f64) -> Result<Vec<NativeHit>, ConnectorError> {
		let searcher = self.reader.searcher();
		let collector = TopDocs::with_limit(candidates).order_by_fast_field::<T>(field, direction);
		let top_docs = searcher.search(query, &collector).map_err(native)?;
		top_docs
			.into_iter()
			.map(|(value, addr)| self.hit(&searcher, addr, to_score(value), select_fields))
			.collect()
	}

	fn full_text_field(&self, name: &str) -> Result<Field, ConnectorError> {
		let schema = self.index.schema();
		let field = schema
			.get_field(name)
			.map_err(|_| ConnectorError::UnsupportedQueryType(format!("unknown field {name}")))?;
		match schema.get_field_entry(field).field_type() {
			FieldType::Str(opts) if opts.get_indexing_options().is_some() => Ok(field),
			_ => Err(ConnectorError::UnsupportedQueryType(format!("{name} is not a full-text field"))),
		}
	}

	/// The filter must match but never contributes to the score.
	fn with_filter(&self, matcher: Box<dyn Query>, filter: Option<&str>) -> Result<Box<dyn Query>, ConnectorError> {
		let Some(expr) = filter else {
			return Ok(matcher);
		};
		let parser = QueryParser::for_index(&self.index, vec![self.content_field]);
		let parsed = parser.parse_query(expr).map_err(|e| ConnectorError::MalformedFilter(e.to_string()))?;
		Ok(Box::new(BooleanQuery::new(vec![
			(Occur::Must, matcher),
			(Occur::Must, Box::new(ConstScoreQuery::new(parsed, 0.0))),
		])))
	}

	fn hit(&self, searcher: &Searcher, addr: DocAddress, score: f64, select_fields: &[String]) -> Result<NativeHit, ConnectorError> {
		let doc: TantivyDocument = searcher.doc(addr).map_err(native)?;
		let id = doc
			.get_first(self.id_field)
			.and_then(|v| v.as_str())
			.ok_or_else(|| ConnectorError::Unreachable("stored document has no id".to_string()))?
			.to_string();
		Ok(NativeHit::new(id, score).with_fields(self.stored_fields(&doc, select_fields)))
	}

	fn stored_fields(&self, doc: &TantivyDocument, select_fields: &[String]) -> Fields {
		let schema = self.index.schema();
		let mut fields = Fields::new();
		for name in select_fields {
			let Ok(field) = schema.get_field(name) else { continue };
			let Some(value) = doc.get_first(field) else { continue };
			let rendered = value
				.as_str()
				.map(str::to_string)
				.or_else(|| value.as_u64().map(|v| v.to_string()))
				.or_else(|| value.as_i64().map(|v| v.to_string()))
				.or_else(|| value.as_f64().map(|v| v.to_string()));
			if let Some(rendered) = rendered {
				fields.insert(name.clone(), rendered);
			}
		}
		fields
	}
}
