use anyhow::Result;
use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::emit::DocFilter;
use crate::field::FieldBoost;

/// Canonical fingerprint input. Only inputs that change index *content*
/// belong here; boosts, pagination, and other query-time options must not
/// affect the persisted-index name.
#[derive(Serialize)]
struct IndexParams<'a> {
    language: &'a [String],
    fields: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a str>,
}

/// Deterministic persisted-index name for a field/language/filter
/// combination: `search-` plus the hex SHA-1 of the canonical parameters.
/// Field names are sorted, so reordering the configured fields yields the
/// same identity.
pub fn index_identity(
    languages: &[String],
    field_boosts: &[FieldBoost],
    filter: Option<&DocFilter>,
) -> Result<String> {
    let mut fields: Vec<&str> = field_boosts.iter().map(|f| f.field.as_str()).collect();
    fields.sort_unstable();
    let params = IndexParams {
        language: languages,
        fields,
        filter: filter.map(|f| f.id.as_str()),
    };
    let canonical = serde_json::to_string(&params)?;
    let mut hasher = Sha1::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Ok(format!("search-{hex}"))
}
