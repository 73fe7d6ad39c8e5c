//! Full-text search for a JSON document store.
//!
//! Documents are tokenized into an inverted index maintained by an
//! incremental map-reduce engine, and queries are scored with a
//! TF-IDF-derived dismax function with per-field boosts, field-length
//! normalization, minimum-should-match filtering, wildcard patterns, and
//! result highlighting. The store boundary is the [`store::SearchStore`]
//! trait; [`engine::SledEngine`] is the bundled sled-backed implementation.

pub mod emit;
pub mod engine;
pub mod enrich;
pub mod field;
pub mod identity;
pub mod plan;
pub mod score;
pub mod search;
pub mod store;
pub mod tokenizer;

pub use emit::{DocFilter, EmitOutput, EmitRow, Emitter, DOC_INFO_PREFIX, TOKEN_PREFIX};
pub use engine::SledEngine;
pub use field::{FieldBoost, TextExtractor};
pub use identity::index_identity;
pub use search::{
    FieldSpec, Language, MinimumShouldMatch, ResultPage, ResultRow, SearchHandle, SearchOutput,
    SearchRequest,
};
pub use store::{IndexRow, QueryOptions, QueryResult, SearchStore, Stale};
pub use tokenizer::{Pipeline, PipelineRegistry, TokenizeMode};
