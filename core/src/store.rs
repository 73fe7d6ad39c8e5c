use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::emit::Emitter;

/// Read-consistency mode for queries against a persisted index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stale {
    /// Answer from the index as-is, however old.
    Ok,
    /// Answer from the current snapshot, then bring the index up to date.
    UpdateAfter,
}

/// Options for one map-reduce query against a persisted index.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Persisted-index name; distinct field/filter/language combinations
    /// yield distinct names and never collide.
    pub save_as: String,
    /// Exact multi-key match; `None` performs a range scan over all rows.
    pub keys: Option<Vec<String>>,
    pub stale: Option<Stale>,
    pub limit: Option<usize>,
    /// Delete the persisted index instead of querying it.
    pub destroy: bool,
}

/// One row of a persisted index.
#[derive(Debug, Clone)]
pub struct IndexRow {
    pub id: String,
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Default)]
pub struct QueryResult {
    pub rows: Vec<IndexRow>,
}

/// The boundary to the document store and its persisted incremental
/// map-reduce engine. The search core owns no index state of its own; it
/// drives this interface and discards its working structures after every
/// query.
#[allow(async_fn_in_trait)]
pub trait SearchStore {
    /// Execute the emitter over all documents (or the incrementally
    /// maintained cache of prior emissions) under `opts.save_as` and return
    /// the rows matching `opts.keys`, or all rows in key order.
    async fn query(&self, emitter: &Emitter, opts: QueryOptions) -> Result<QueryResult>;

    /// Fetch a document body. An absent document is an error.
    async fn get_doc(&self, id: &str) -> Result<Value>;

    /// The store's error sink. Filter-predicate failures are reported here
    /// without aborting the indexing batch.
    fn report_error(&self, context: &str, error: &anyhow::Error);
}
