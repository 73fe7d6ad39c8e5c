use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::emit::TOKEN_PREFIX;
use crate::field::FieldBoost;
use crate::store::IndexRow;

/// Working structures accumulated from the raw inverted-index rows of one
/// query. Discarded when the query completes.
pub struct TermMatches {
    /// query term -> number of distinct documents containing it.
    pub term_dfs: HashMap<String, usize>,
    /// doc id -> per-field map of matched query term -> occurrence count.
    pub doc_terms: HashMap<String, Vec<HashMap<String, usize>>>,
}

/// Fold the raw rows of the exact-term lookup into document frequencies and
/// per-document, per-field term counts.
pub fn accumulate_matches(rows: &[IndexRow], num_fields: usize) -> TermMatches {
    let mut term_docs: HashMap<String, HashSet<String>> = HashMap::new();
    let mut doc_terms: HashMap<String, Vec<HashMap<String, usize>>> = HashMap::new();

    for row in rows {
        let term = row.key.strip_prefix(TOKEN_PREFIX).unwrap_or(&row.key);
        // A single-field index omits the value; anything non-numeric means
        // field zero.
        let field = row.value.as_u64().unwrap_or(0) as usize;

        term_docs
            .entry(term.to_string())
            .or_default()
            .insert(row.id.clone());

        let fields = doc_terms
            .entry(row.id.clone())
            .or_insert_with(|| vec![HashMap::new(); num_fields]);
        if let Some(counts) = fields.get_mut(field) {
            *counts.entry(term.to_string()).or_insert(0) += 1;
        }
    }

    let term_dfs = term_docs
        .into_iter()
        .map(|(term, docs)| (term, docs.len()))
        .collect();
    TermMatches {
        term_dfs,
        doc_terms,
    }
}

/// Drop candidates matching fewer than `mm` (a fraction) of the distinct
/// query terms. Applies only to multi-term queries. The ratio is floored to
/// two decimals before the comparison, a deliberate floating-point
/// tolerance kept for compatibility.
pub fn apply_min_should_match(matches: &mut TermMatches, num_query_terms: usize, mm: f64) {
    if num_query_terms <= 1 {
        return;
    }
    matches.doc_terms.retain(|_, fields| {
        let mut matched: HashSet<&str> = HashSet::new();
        for counts in fields.iter() {
            matched.extend(counts.keys().map(String::as_str));
        }
        let ratio = matched.len() as f64 / num_query_terms as f64;
        (ratio * 100.0).floor() / 100.0 >= mm
    });
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDoc {
    pub id: String,
    pub score: f64,
}

/// Classic TF-IDF with Lucene-style field-length normalization, combined
/// across query terms with dismax: a query term's score is the sum of its
/// per-field scores, and the document's score is the maximum over query
/// terms rather than the sum. Results come back sorted by score descending,
/// ties left in place.
pub fn calculate_document_scores(
    query_terms: &[String],
    matches: &TermMatches,
    doc_norms: &HashMap<String, Vec<f64>>,
    field_boosts: &[FieldBoost],
) -> Vec<ScoredDoc> {
    let mut doc_ids: Vec<&String> = matches.doc_terms.keys().collect();
    doc_ids.sort_unstable();

    let mut results: Vec<ScoredDoc> = doc_ids
        .into_iter()
        .map(|doc_id| {
            let fields = &matches.doc_terms[doc_id];
            let norms = doc_norms.get(doc_id);
            let mut max_score = 0.0f64;

            for term in query_terms {
                let df = matches.term_dfs.get(term).copied().unwrap_or(0);
                if df == 0 {
                    continue;
                }
                let mut term_score = 0.0f64;
                for (field_idx, counts) in fields.iter().enumerate() {
                    let Some(&tf) = counts.get(term) else { continue };
                    let norm = norms
                        .and_then(|n| n.get(field_idx))
                        .copied()
                        .unwrap_or(0.0);
                    if norm == 0.0 {
                        continue;
                    }
                    let doc_score = tf as f64 / df as f64;
                    // query-side tf is taken as 1 after dedup
                    let query_score = 1.0 / df as f64;
                    term_score += doc_score * query_score * field_boosts[field_idx].boost / norm;
                }
                if term_score > max_score {
                    max_score = term_score;
                }
            }

            ScoredDoc {
                id: doc_id.clone(),
                score: max_score,
            }
        })
        .collect();

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    results
}

/// Skip/limit windowing, applied strictly after scoring and sorting so
/// documents outside the page are never hydrated.
pub fn paginate<T>(rows: Vec<T>, skip: usize, limit: Option<usize>) -> Vec<T> {
    match limit {
        Some(limit) => rows.into_iter().skip(skip).take(limit).collect(),
        None if skip > 0 => rows.into_iter().skip(skip).collect(),
        None => rows,
    }
}
