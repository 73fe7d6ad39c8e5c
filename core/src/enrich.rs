use std::collections::HashMap;

use anyhow::Result;
use futures::future::join_all;
use regex::{Captures, Regex, RegexBuilder};

use crate::field::FieldBoost;
use crate::search::ResultRow;
use crate::store::SearchStore;

pub const DEFAULT_HIGHLIGHT_PRE: &str = "<strong>";
pub const DEFAULT_HIGHLIGHT_POST: &str = "</strong>";

/// Attach full document bodies to the page of rows. Fetches fan out
/// concurrently; any single failure fails the stage.
pub async fn include_docs<S: SearchStore>(store: &S, rows: &mut [ResultRow]) -> Result<()> {
    let fetched = join_all(rows.iter().map(|row| store.get_doc(&row.id))).await;
    for (row, doc) in rows.iter_mut().zip(fetched) {
        row.doc = Some(doc?);
    }
    Ok(())
}

/// Solr-style highlighting: for every field of a row with at least one
/// matched query term, wrap each case-insensitive occurrence of the term
/// (plus a trailing lowercase run, to catch simple morphological suffixes)
/// in the pre/post markers, keyed by field name.
///
/// Reuses an already-hydrated document where present; otherwise fetches,
/// with the same fail-fast fan-out as hydration. Rows without an entry in
/// `doc_terms` (wildcard mode) get no highlighting.
pub async fn apply_highlighting<S: SearchStore>(
    store: &S,
    rows: &mut [ResultRow],
    field_boosts: &[FieldBoost],
    doc_terms: &HashMap<String, Vec<HashMap<String, usize>>>,
    pre: &str,
    post: &str,
) -> Result<()> {
    if doc_terms.is_empty() {
        return Ok(());
    }

    let fetched = join_all(rows.iter().map(|row| async move {
        match &row.doc {
            Some(doc) => Ok(doc.clone()),
            None => store.get_doc(&row.id).await,
        }
    }))
    .await;

    let mut regexes: HashMap<String, Regex> = HashMap::new();

    for (row, doc) in rows.iter_mut().zip(fetched) {
        let doc = doc?;
        let Some(fields) = doc_terms.get(&row.id) else {
            continue;
        };
        let highlighting = row.highlighting.get_or_insert_with(HashMap::new);
        for (field_idx, counts) in fields.iter().enumerate() {
            if counts.is_empty() {
                continue;
            }
            let Some(field_boost) = field_boosts.get(field_idx) else {
                continue;
            };
            let Some(mut text) = field_boost.text_for(&doc) else {
                continue;
            };
            let mut terms: Vec<&String> = counts.keys().collect();
            terms.sort_unstable();
            for term in terms {
                if !regexes.contains_key(term.as_str()) {
                    regexes.insert(term.clone(), term_regex(term)?);
                }
                let regex = &regexes[term.as_str()];
                text = regex
                    .replace_all(&text, |caps: &Captures| format!("{pre}{}{post}", &caps[0]))
                    .into_owned();
            }
            highlighting.insert(field_boost.field.clone(), text);
        }
    }
    Ok(())
}

fn term_regex(term: &str) -> Result<Regex> {
    Ok(RegexBuilder::new(&format!("{}[a-z]*", regex::escape(term)))
        .case_insensitive(true)
        .build()?)
}
