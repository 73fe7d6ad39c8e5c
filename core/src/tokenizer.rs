use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref SEPARATORS: Regex = Regex::new(r"[\s\-]+").expect("valid regex");
}

/// Whether a token stream is produced for indexing or for a query.
///
/// Index-time output over-generates: every token appears both trimmed-only
/// and trimmed-then-stemmed, so stemmed and unstemmed queries both match.
/// Query-time output leaves wildcard tokens (containing `*`) untouched,
/// since trimming or stemming would corrupt the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizeMode {
    Index,
    Query,
}

/// One transform stage. Stages run in declared order and the same stage
/// list serves both tokenize modes; if the two ever diverge, term matching
/// silently fails.
enum Stage {
    /// Strip leading/trailing non-word characters.
    Trim,
    /// Snowball stemmer for one language.
    Stem(Stemmer),
}

/// Tokenization pipeline for one language configuration.
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Build a pipeline for the given language codes. Multiple codes chain
    /// their stemmers in declared order.
    pub fn for_languages(codes: &[String]) -> Result<Self> {
        let mut stages = vec![Stage::Trim];
        for code in codes {
            stages.push(Stage::Stem(Stemmer::create(algorithm_for(code)?)));
        }
        Ok(Self { stages })
    }

    /// Split `text` into normalized terms (NFKC, lowercase, whitespace and
    /// hyphen boundaries), then run the transform stages per `mode`.
    pub fn tokenize(&self, text: &str, mode: TokenizeMode) -> Vec<String> {
        let normalized = text.nfkc().collect::<String>().to_lowercase();
        let raw: Vec<&str> = SEPARATORS
            .split(&normalized)
            .filter(|t| !t.is_empty())
            .collect();

        match mode {
            TokenizeMode::Index => {
                let trimmed: Vec<String> = raw
                    .iter()
                    .map(|t| self.apply(t, false))
                    .filter(|t| !t.is_empty())
                    .collect();
                let mut out = trimmed.clone();
                out.extend(trimmed.iter().map(|t| self.apply(t, true)));
                out
            }
            TokenizeMode::Query => raw
                .iter()
                .map(|t| {
                    if t.contains('*') {
                        (*t).to_string()
                    } else {
                        self.apply(t, true)
                    }
                })
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Run the stage list over one token. With `stem` false only the
    /// trimmer stages run, which yields the unstemmed index-time form.
    fn apply(&self, token: &str, stem: bool) -> String {
        let mut current = token.to_string();
        for stage in &self.stages {
            current = match stage {
                Stage::Trim => trim_token(&current),
                Stage::Stem(stemmer) if stem => stemmer.stem(&current).into_owned(),
                Stage::Stem(_) => current,
            };
        }
        current
    }
}

fn trim_token(token: &str) -> String {
    token
        .trim_matches(|c: char| !(c.is_alphanumeric() || c == '_'))
        .to_string()
}

fn algorithm_for(code: &str) -> Result<Algorithm> {
    Ok(match code {
        "en" => Algorithm::English,
        "ar" => Algorithm::Arabic,
        "da" => Algorithm::Danish,
        "nl" => Algorithm::Dutch,
        "fi" => Algorithm::Finnish,
        "fr" => Algorithm::French,
        "de" => Algorithm::German,
        "el" => Algorithm::Greek,
        "hu" => Algorithm::Hungarian,
        "it" => Algorithm::Italian,
        "no" => Algorithm::Norwegian,
        "pt" => Algorithm::Portuguese,
        "ro" => Algorithm::Romanian,
        "ru" => Algorithm::Russian,
        "es" => Algorithm::Spanish,
        "sv" => Algorithm::Swedish,
        "ta" => Algorithm::Tamil,
        "tr" => Algorithm::Turkish,
        other => bail!("unsupported language: {other}"),
    })
}

/// Builds each pipeline at most once per language-code list and hands out
/// shared references afterwards. Owned by the search handle rather than
/// living in a process-wide static.
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: RwLock<HashMap<Vec<String>, Arc<Pipeline>>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, codes: &[String]) -> Result<Arc<Pipeline>> {
        if let Some(pipeline) = self.pipelines.read().get(codes) {
            return Ok(pipeline.clone());
        }
        let built = Arc::new(Pipeline::for_languages(codes)?);
        let mut pipelines = self.pipelines.write();
        Ok(pipelines.entry(codes.to_vec()).or_insert(built).clone())
    }
}
