//! Schema, analyzer and error mapping shared by every text collection.
use tantivy::schema::{Schema, TextFieldIndexing, TextOptions, IndexRecordOption, NumericOptions, STRING, STORED};
use tantivy::tokenizer::{TextAnalyzer, SimpleTokenizer, LowerCaser, StopWordFilter};
use tantivy::{Index, TantivyError};

use docstore_core::ConnectorError;

pub const TOKENIZER: &str = "text_with_stopwords";

/// `id` is the document key. `title` and `content` are full-text fields,
/// `category` an exact-match keyword and `year` a fast numeric sort key.
pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field("id", STRING | STORED);
	let text_field_indexing = TextFieldIndexing::default().set_tokenizer(TOKENIZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	let text_options = TextOptions::default().set_indexing_options(text_field_indexing).set_stored();
	schema_builder.add_text_field("title", text_options.clone());
	schema_builder.add_text_field("content", text_options);
	schema_builder.add_text_field("category", STRING | STORED);
	schema_builder.add_u64_field("year", NumericOptions::default().set_indexed().set_stored().set_fast());
	schema_builder.build()
}

pub fn register_tokenizer(index: &Index) {
	let stop_words = vec![
		"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
	];
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(stop_words.into_iter().map(|s| s.to_string())))
		.build();
	index.tokenizers().register(TOKENIZER, tokenizer);
}

pub fn native(err: TantivyError) -> ConnectorError {
	ConnectorError::Unreachable(err.to_string())
}
