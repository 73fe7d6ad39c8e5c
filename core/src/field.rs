use std::sync::Arc;

use serde_json::Value;

/// Caller-supplied replacement for the built-in field traversal.
pub type TextExtractor = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// How text is pulled out of a document for one configured field.
enum FieldPath {
    /// Plain top-level key.
    Key(String),
    /// Dotted path through nested objects; array hops flatten per-element
    /// matches and join them with a space.
    Nested(Vec<String>),
}

/// One indexed field: its name (dotted paths allowed), relative weight,
/// and an optional custom text extractor.
pub struct FieldBoost {
    pub field: String,
    pub boost: f64,
    path: FieldPath,
    extractor: Option<TextExtractor>,
}

impl Clone for FieldBoost {
    fn clone(&self) -> Self {
        Self::new(self.field.clone(), self.boost, self.extractor.clone())
    }
}

impl FieldBoost {
    pub fn new(field: String, boost: f64, extractor: Option<TextExtractor>) -> Self {
        let path = if field.contains('.') {
            FieldPath::Nested(field.split('.').map(str::to_string).collect())
        } else {
            FieldPath::Key(field.clone())
        };
        Self {
            field,
            boost,
            path,
            extractor,
        }
    }

    /// Text for this field in `doc`, or `None` when the path resolves to
    /// nothing tokenizable.
    pub fn text_for(&self, doc: &Value) -> Option<String> {
        if let Some(extract) = &self.extractor {
            return extract(doc);
        }
        let segments: &[String] = match &self.path {
            FieldPath::Key(key) => std::slice::from_ref(key),
            FieldPath::Nested(segments) => segments,
        };
        let mut fragments = Vec::new();
        collect_text(doc, segments, &mut fragments);
        if fragments.is_empty() {
            None
        } else {
            Some(fragments.join(" "))
        }
    }
}

/// Recursive tagged traversal: arrays fan out over their elements with the
/// remaining path, objects follow the next segment, scalars at the end of
/// the path become text fragments.
fn collect_text(value: &Value, segments: &[String], out: &mut Vec<String>) {
    if let Value::Array(items) = value {
        for item in items {
            collect_text(item, segments, out);
        }
        return;
    }
    match segments.split_first() {
        None => match value {
            Value::String(s) if !s.is_empty() => out.push(s.clone()),
            Value::Number(n) => out.push(n.to_string()),
            Value::Bool(b) => out.push(b.to_string()),
            _ => {}
        },
        Some((head, rest)) => {
            if let Some(next) = value.get(head) {
                collect_text(next, rest, out);
            }
        }
    }
}
