//! Structured-output repair for backend responses.
//!
//! Backends are asked for one JSON object, but replies still arrive wrapped in
//! markdown fences or prose. Parsing falls back in three steps: the whole
//! text, the first well-formed object embedded in it, then the caller's
//! default. The raw text is always kept for audit.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ParseSource {
    Whole,
    Extracted,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub value: Value,
    pub raw: String,
    pub source: ParseSource,
}

impl ParsedDocument {
    pub fn used_default(&self) -> bool {
        self.source == ParseSource::Default
    }
}

/// First JSON object that parses cleanly starting at some `{` in `raw`.
fn extract_first_object(raw: &str) -> Option<Value> {
    raw.char_indices()
        .filter(|(_, c)| *c == '{')
        .find_map(|(start, _)| {
            let mut stream =
                serde_json::Deserializer::from_str(&raw[start..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value)) if value.is_object() => Some(value),
                _ => None,
            }
        })
}

pub fn parse_document(raw: &str, default: &Value) -> ParsedDocument {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && value.is_object()
    {
        return ParsedDocument {
            value,
            raw: raw.to_string(),
            source: ParseSource::Whole,
        };
    }

    if let Some(value) = extract_first_object(trimmed) {
        return ParsedDocument {
            value,
            raw: raw.to_string(),
            source: ParseSource::Extracted,
        };
    }

    tracing::debug!(chars = raw.len(), "backend response had no JSON object; using default");
    ParsedDocument {
        value: default.clone(),
        raw: raw.to_string(),
        source: ParseSource::Default,
    }
}
