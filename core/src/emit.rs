use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use crate::field::FieldBoost;
use crate::tokenizer::{Pipeline, TokenizeMode};

/// Key prefix for inverted-index rows: `'a' + term`.
pub const TOKEN_PREFIX: &str = "a";
/// Key prefix for per-document field-norm rows: `'b' + doc id`.
pub const DOC_INFO_PREFIX: &str = "b";

/// Filter predicate with a caller-supplied stable identifier.
///
/// Closures cannot be serialized, so the `id` stands in for the predicate
/// inside the persisted-index fingerprint. Callers must change the id
/// whenever the predicate's behavior changes, or the old index is reused.
#[derive(Clone)]
pub struct DocFilter {
    pub id: String,
    pred: Arc<dyn Fn(&Value) -> Result<bool> + Send + Sync>,
}

impl DocFilter {
    pub fn new(
        id: impl Into<String>,
        pred: impl Fn(&Value) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            pred: Arc::new(pred),
        }
    }

    pub fn accepts(&self, doc: &Value) -> Result<bool> {
        (self.pred)(doc)
    }
}

/// One emitted key/value pair.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitRow {
    pub key: String,
    pub value: Value,
}

/// Result of mapping one document.
pub enum EmitOutput {
    Rows(Vec<EmitRow>),
    /// Excluded by the filter predicate.
    Filtered,
    /// The predicate failed; the engine reports this to the error sink and
    /// excludes the document. Never fatal to the indexing run.
    FilterError(anyhow::Error),
}

/// The map function: turns one document into its inverted-index rows and
/// exactly one field-norm row. Pure with respect to the document; the
/// persisted map-reduce engine owns all storage concerns.
pub struct Emitter {
    field_boosts: Vec<FieldBoost>,
    pipeline: Arc<Pipeline>,
    filter: Option<DocFilter>,
}

impl Emitter {
    pub fn new(
        field_boosts: Vec<FieldBoost>,
        pipeline: Arc<Pipeline>,
        filter: Option<DocFilter>,
    ) -> Self {
        Self {
            field_boosts,
            pipeline,
            filter,
        }
    }

    pub fn emit(&self, doc_id: &str, doc: &Value) -> EmitOutput {
        if let Some(filter) = &self.filter {
            match filter.accepts(doc) {
                Ok(true) => {}
                Ok(false) => return EmitOutput::Filtered,
                Err(error) => return EmitOutput::FilterError(error),
            }
        }

        let single_field = self.field_boosts.len() == 1;
        let mut rows = Vec::new();
        let mut norms = Vec::with_capacity(self.field_boosts.len());

        for (field_idx, field_boost) in self.field_boosts.iter().enumerate() {
            let norm = match field_boost.text_for(doc) {
                Some(text) => {
                    let mut terms = self.pipeline.tokenize(&text, TokenizeMode::Index);
                    terms.sort_unstable();
                    terms.dedup();
                    for term in &terms {
                        // A single-field index omits the value to save space.
                        let value = if single_field {
                            Value::Null
                        } else {
                            json!(field_idx)
                        };
                        rows.push(EmitRow {
                            key: format!("{TOKEN_PREFIX}{term}"),
                            value,
                        });
                    }
                    (terms.len() as f64).sqrt()
                }
                None => 0.0,
            };
            norms.push(norm);
        }

        rows.push(EmitRow {
            key: format!("{DOC_INFO_PREFIX}{doc_id}"),
            value: json!(norms),
        });
        EmitOutput::Rows(rows)
    }
}
