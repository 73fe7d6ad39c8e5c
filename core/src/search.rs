use std::collections::{BTreeMap, HashMap};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::emit::{DocFilter, Emitter, DOC_INFO_PREFIX, TOKEN_PREFIX};
use crate::enrich::{self, DEFAULT_HIGHLIGHT_POST, DEFAULT_HIGHLIGHT_PRE};
use crate::field::{FieldBoost, TextExtractor};
use crate::identity::index_identity;
use crate::plan::{plan, QueryPlan, WildcardTerm};
use crate::score::{
    accumulate_matches, apply_min_should_match, calculate_document_scores, paginate, TermMatches,
};
use crate::store::{QueryOptions, SearchStore, Stale};
use crate::tokenizer::PipelineRegistry;

/// Fields to index, either as plain names (default boost 1) or as a
/// name-to-boost map. Map order, and with it the persisted field index, is
/// the sorted key order.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FieldSpec {
    Named(Vec<String>),
    Boosted(BTreeMap<String, f64>),
}

impl Default for FieldSpec {
    fn default() -> Self {
        FieldSpec::Named(Vec::new())
    }
}

/// Languages for the tokenizer pipeline; a list chains one stemmer per
/// language in declared order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Language {
    One(String),
    Many(Vec<String>),
}

impl Default for Language {
    fn default() -> Self {
        Language::One("en".to_string())
    }
}

impl Language {
    pub fn codes(&self) -> Vec<String> {
        match self {
            Language::One(code) => vec![code.clone()],
            Language::Many(codes) => codes.clone(),
        }
    }
}

/// Minimum-should-match threshold, as a percentage: `75`, `"75"`, or
/// `"75%"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MinimumShouldMatch {
    Percent(f64),
    Text(String),
}

impl MinimumShouldMatch {
    fn fraction(&self) -> Result<f64> {
        let percent = match self {
            MinimumShouldMatch::Percent(p) => *p,
            MinimumShouldMatch::Text(s) => s
                .trim()
                .trim_end_matches('%')
                .trim()
                .parse::<f64>()
                .with_context(|| format!("invalid mm value: {s:?}"))?,
        };
        Ok(percent / 100.0)
    }
}

/// One search (or index-maintenance) request.
#[derive(Deserialize)]
pub struct SearchRequest {
    #[serde(alias = "q", default)]
    pub query: String,
    pub fields: FieldSpec,
    #[serde(default)]
    pub mm: Option<MinimumShouldMatch>,
    #[serde(default)]
    pub highlighting: bool,
    #[serde(default)]
    pub highlighting_pre: Option<String>,
    #[serde(default)]
    pub highlighting_post: Option<String>,
    #[serde(default)]
    pub include_docs: bool,
    /// Delete the persisted index for this field/filter/language
    /// combination.
    #[serde(default)]
    pub destroy: bool,
    /// Eagerly build the persisted index with immediate consistency, without
    /// running a query.
    #[serde(default)]
    pub build: bool,
    #[serde(default)]
    pub stale: Option<Stale>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub language: Language,
    /// Predicate restricting which documents are indexed. Not part of the
    /// wire shape; see [`DocFilter`] for how it participates in the index
    /// identity.
    #[serde(skip)]
    pub filter: Option<DocFilter>,
    /// Custom text extractors, keyed by field name.
    #[serde(skip)]
    pub get_text: HashMap<String, TextExtractor>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, fields: FieldSpec) -> Self {
        Self {
            query: query.into(),
            fields,
            mm: None,
            highlighting: false,
            highlighting_pre: None,
            highlighting_post: None,
            include_docs: false,
            destroy: false,
            build: false,
            stale: None,
            limit: None,
            skip: 0,
            language: Language::default(),
            filter: None,
            get_text: HashMap::new(),
        }
    }
}

/// One result row: always an id, a relevance score for exact-term queries,
/// and optionally the document body and per-field highlighted text.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlighting: Option<HashMap<String, String>>,
}

impl ResultRow {
    fn bare(id: String) -> Self {
        Self {
            id,
            score: None,
            doc: None,
            highlighting: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResultPage {
    pub total_rows: usize,
    pub rows: Vec<ResultRow>,
}

impl ResultPage {
    fn empty() -> Self {
        Self {
            total_rows: 0,
            rows: Vec::new(),
        }
    }
}

/// Response shape: a result page, or a plain acknowledgment for `build` and
/// `destroy` requests.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SearchOutput {
    Results(ResultPage),
    Ack { ok: bool },
}

/// Entry point tying the pipeline registry, the emitter, and the store
/// together. Holds no per-query state; everything a query builds is
/// discarded when it completes.
pub struct SearchHandle<S> {
    store: S,
    registry: PipelineRegistry,
}

impl<S: SearchStore> SearchHandle<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            registry: PipelineRegistry::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Eagerly build the persisted index for the request's field
    /// configuration.
    pub async fn build(&self, mut request: SearchRequest) -> Result<()> {
        request.build = true;
        request.destroy = false;
        self.search(request).await.map(|_| ())
    }

    /// Delete the persisted index for the request's field configuration.
    pub async fn destroy(&self, mut request: SearchRequest) -> Result<()> {
        request.destroy = true;
        self.search(request).await.map(|_| ())
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchOutput> {
        let languages = request.language.codes();
        let pipeline = self.registry.get(&languages)?;
        let field_boosts = build_field_boosts(&request.fields, &request.get_text);
        ensure!(!field_boosts.is_empty(), "no fields configured");

        let save_as = index_identity(&languages, &field_boosts, request.filter.as_ref())?;
        let emitter = Emitter::new(
            field_boosts.clone(),
            pipeline.clone(),
            request.filter.clone(),
        );

        if request.destroy {
            self.store
                .query(
                    &emitter,
                    QueryOptions {
                        save_as,
                        destroy: true,
                        ..QueryOptions::default()
                    },
                )
                .await?;
            return Ok(SearchOutput::Ack { ok: true });
        }

        if request.build {
            // update immediately: a build never reads stale
            self.store
                .query(
                    &emitter,
                    QueryOptions {
                        save_as: save_as.clone(),
                        limit: Some(0),
                        ..QueryOptions::default()
                    },
                )
                .await?;
            tracing::info!(index = %save_as, "index build complete");
            return Ok(SearchOutput::Ack { ok: true });
        }

        match plan(&request.query, &pipeline) {
            QueryPlan::Empty => Ok(SearchOutput::Results(ResultPage::empty())),
            QueryPlan::Wildcard(wildcard) => {
                self.wildcard_search(&request, &emitter, &field_boosts, save_as, wildcard)
                    .await
            }
            QueryPlan::Exact(terms) => {
                self.exact_search(&request, &emitter, &field_boosts, save_as, terms)
                    .await
            }
        }
    }

    /// Classic TF-IDF: fetch the rows for every query term, filter by
    /// minimum-should-match, fetch field norms for the survivors, score,
    /// sort, paginate, then enrich only the final page.
    async fn exact_search(
        &self,
        request: &SearchRequest,
        emitter: &Emitter,
        field_boosts: &[FieldBoost],
        save_as: String,
        terms: Vec<String>,
    ) -> Result<SearchOutput> {
        let mm = match &request.mm {
            Some(mm) => mm.fraction()?,
            None => 1.0,
        };

        let keys = terms
            .iter()
            .map(|term| format!("{TOKEN_PREFIX}{term}"))
            .collect();
        let result = self
            .store
            .query(
                emitter,
                QueryOptions {
                    save_as: save_as.clone(),
                    keys: Some(keys),
                    stale: request.stale,
                    ..QueryOptions::default()
                },
            )
            .await?;
        if result.rows.is_empty() {
            return Ok(SearchOutput::Results(ResultPage::empty()));
        }

        let mut matches = accumulate_matches(&result.rows, field_boosts.len());
        apply_min_should_match(&mut matches, terms.len(), mm);
        if matches.doc_terms.is_empty() {
            return Ok(SearchOutput::Results(ResultPage::empty()));
        }

        let doc_norms = self
            .fetch_doc_norms(emitter, &save_as, request.stale, &matches)
            .await?;
        let scored = calculate_document_scores(&terms, &matches, &doc_norms, field_boosts);
        let total_rows = scored.len();
        tracing::debug!(index = %save_as, terms = terms.len(), total_rows, "query scored");

        let mut rows: Vec<ResultRow> = paginate(scored, request.skip, request.limit)
            .into_iter()
            .map(|scored| ResultRow {
                score: Some(scored.score),
                ..ResultRow::bare(scored.id)
            })
            .collect();

        self.enrich_rows(request, &mut rows, field_boosts, &matches.doc_terms)
            .await?;
        Ok(SearchOutput::Results(ResultPage { total_rows, rows }))
    }

    /// Wildcard mode: full scan of the indexed terms, filtered against the
    /// pattern. Results are unscored and keep scan order.
    async fn wildcard_search(
        &self,
        request: &SearchRequest,
        emitter: &Emitter,
        field_boosts: &[FieldBoost],
        save_as: String,
        wildcard: WildcardTerm,
    ) -> Result<SearchOutput> {
        let result = self
            .store
            .query(
                emitter,
                QueryOptions {
                    save_as,
                    stale: request.stale,
                    ..QueryOptions::default()
                },
            )
            .await?;

        let rows: Vec<ResultRow> = result
            .rows
            .into_iter()
            .filter(|row| {
                row.key
                    .strip_prefix(TOKEN_PREFIX)
                    .is_some_and(|term| wildcard.matches(term))
            })
            .map(|row| ResultRow::bare(row.id))
            .collect();
        let total_rows = rows.len();

        let mut rows = paginate(rows, request.skip, request.limit);
        // no matched-term map in wildcard mode, so highlighting adds nothing
        self.enrich_rows(request, &mut rows, field_boosts, &HashMap::new())
            .await?;
        Ok(SearchOutput::Results(ResultPage { total_rows, rows }))
    }

    async fn fetch_doc_norms(
        &self,
        emitter: &Emitter,
        save_as: &str,
        stale: Option<Stale>,
        matches: &TermMatches,
    ) -> Result<HashMap<String, Vec<f64>>> {
        let mut doc_ids: Vec<&String> = matches.doc_terms.keys().collect();
        doc_ids.sort_unstable();
        let keys = doc_ids
            .into_iter()
            .map(|id| format!("{DOC_INFO_PREFIX}{id}"))
            .collect();

        let result = self
            .store
            .query(
                emitter,
                QueryOptions {
                    save_as: save_as.to_string(),
                    keys: Some(keys),
                    stale,
                    ..QueryOptions::default()
                },
            )
            .await?;

        let mut norms = HashMap::with_capacity(result.rows.len());
        for row in result.rows {
            let values: Vec<f64> = serde_json::from_value(row.value)
                .with_context(|| format!("malformed field norms for document {}", row.id))?;
            norms.insert(row.id, values);
        }
        Ok(norms)
    }

    async fn enrich_rows(
        &self,
        request: &SearchRequest,
        rows: &mut [ResultRow],
        field_boosts: &[FieldBoost],
        doc_terms: &HashMap<String, Vec<HashMap<String, usize>>>,
    ) -> Result<()> {
        if request.include_docs {
            enrich::include_docs(&self.store, rows).await?;
        }
        if request.highlighting {
            let pre = request
                .highlighting_pre
                .as_deref()
                .unwrap_or(DEFAULT_HIGHLIGHT_PRE);
            let post = request
                .highlighting_post
                .as_deref()
                .unwrap_or(DEFAULT_HIGHLIGHT_POST);
            enrich::apply_highlighting(&self.store, rows, field_boosts, doc_terms, pre, post)
                .await?;
        }
        Ok(())
    }
}

fn build_field_boosts(
    fields: &FieldSpec,
    get_text: &HashMap<String, TextExtractor>,
) -> Vec<FieldBoost> {
    let pairs: Vec<(String, f64)> = match fields {
        FieldSpec::Named(names) => names.iter().map(|name| (name.clone(), 1.0)).collect(),
        FieldSpec::Boosted(map) => map.iter().map(|(name, boost)| (name.clone(), *boost)).collect(),
    };
    pairs
        .into_iter()
        .map(|(name, boost)| {
            let extractor = get_text.get(&name).cloned();
            FieldBoost::new(name, boost, extractor)
        })
        .collect()
}
