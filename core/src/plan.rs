use crate::tokenizer::{Pipeline, TokenizeMode};

/// A wildcard pattern from the query, pre-split on `*`.
#[derive(Debug, Clone)]
pub struct WildcardTerm {
    term: String,
    sections: Vec<String>,
}

impl WildcardTerm {
    fn new(term: String) -> Self {
        let sections = term.split('*').map(str::to_string).collect();
        Self { term, sections }
    }

    /// Match a candidate index term against the pattern.
    ///
    /// Leading+trailing `*` around exactly one inner section is substring
    /// containment; any other shape with more than two sections matches
    /// nothing; otherwise the front section must prefix-match and the back
    /// section must suffix-match (empty sections trivially match).
    pub fn matches(&self, candidate: &str) -> bool {
        if self.term.starts_with('*') && self.term.ends_with('*') && self.sections.len() == 3 {
            candidate.contains(self.sections[1].as_str())
        } else if self.sections.len() > 2 {
            false
        } else {
            let front = self.sections[0].as_str();
            let back = self.sections.get(1).map(String::as_str).unwrap_or("");
            candidate.starts_with(front) && candidate.ends_with(back)
        }
    }
}

/// What the query resolves to after tokenization.
#[derive(Debug, Clone)]
pub enum QueryPlan {
    /// No terms survived tokenization; the result set is empty.
    Empty,
    /// Direct multi-key lookup for every query term.
    Exact(Vec<String>),
    /// Full scan of the indexed terms, filtered client-side. Only the first
    /// wildcard term in the query is evaluated; any further wildcard terms
    /// are ignored.
    Wildcard(WildcardTerm),
}

/// Tokenize the query in query mode, deduplicate, and pick the lookup
/// strategy.
pub fn plan(query: &str, pipeline: &Pipeline) -> QueryPlan {
    let mut terms = pipeline.tokenize(query, TokenizeMode::Query);
    terms.sort_unstable();
    terms.dedup();
    if terms.is_empty() {
        return QueryPlan::Empty;
    }
    match terms.iter().find(|t| is_wildcard_term(t)) {
        Some(term) => QueryPlan::Wildcard(WildcardTerm::new(term.clone())),
        None => QueryPlan::Exact(terms),
    }
}

/// A wildcard term contains `*` plus at least one other character.
fn is_wildcard_term(term: &str) -> bool {
    let sections: Vec<&str> = term.split('*').collect();
    sections.len() > 1 && sections.iter().any(|s| !s.is_empty())
}
