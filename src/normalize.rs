//! Document normalization.
//!
//! Backend records carry several fields that may arrive either as native JSON
//! or as JSON encoded inside a string (and, for list fields, sometimes as a
//! bare comma-joined string). `normalize` resolves each of them to one
//! canonical shape so nothing downstream needs to branch on representation.
//!
//! Normalization never fails: anything it cannot interpret degrades to the
//! field's empty default.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::logging::log_fallback;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Ordered sequence (`Value::Array`)
    Sequence,
    /// Keyed group (`Value::Object`)
    Mapping,
}

impl FieldKind {
    pub fn default_value(&self) -> Value {
        match self {
            FieldKind::Sequence => Value::Array(Vec::new()),
            FieldKind::Mapping => Value::Object(Map::new()),
        }
    }
}

/// Fields whose representation is ambiguous upstream.
pub const DESIGNATED_FIELDS: &[(&str, FieldKind)] = &[
    ("tags", FieldKind::Sequence),
    ("improvements", FieldKind::Sequence),
    ("goals", FieldKind::Sequence),
    ("params", FieldKind::Mapping),
    ("summary", FieldKind::Mapping),
    ("metrics", FieldKind::Mapping),
    ("financial_metrics", FieldKind::Mapping),
    ("ml_metrics", FieldKind::Mapping),
];

/// A record whose designated fields all hold their canonical kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NormalizedDocument(Map<String, Value>);

impl NormalizedDocument {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// A designated mapping field. Always present after normalization.
    pub fn mapping(&self, key: &str) -> Option<&Map<String, Value>> {
        self.0.get(key).and_then(Value::as_object)
    }

    /// A designated sequence field. Always present after normalization.
    pub fn sequence(&self, key: &str) -> &[Value] {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

/// Coerce a raw backend record into its canonical shape.
pub fn normalize(record: &Value) -> NormalizedDocument {
    let mut out = match record {
        Value::Object(m) => m.clone(),
        _ => {
            log_fallback("<record>", "record is not an object");
            Map::new()
        }
    };
    for (field, kind) in DESIGNATED_FIELDS {
        let coerced = coerce_field(field, *kind, out.get(*field));
        out.insert((*field).to_string(), coerced);
    }
    NormalizedDocument(out)
}

/// Coerce one field to `kind`, falling back to the kind's default.
pub fn coerce_field(field: &str, kind: FieldKind, raw: Option<&Value>) -> Value {
    match kind {
        FieldKind::Sequence => Value::Array(coerce_sequence(field, raw)),
        FieldKind::Mapping => Value::Object(coerce_mapping(field, raw)),
    }
}

fn coerce_sequence(field: &str, raw: Option<&Value>) -> Vec<Value> {
    match raw {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(text)) => decode_sequence_text(field, text),
        Some(_) => {
            log_fallback(field, "expected sequence");
            Vec::new()
        }
    }
}

fn decode_sequence_text(field: &str, text: &str) -> Vec<Value> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => items,
        Ok(Value::String(inner)) => split_commas(&inner),
        Ok(Value::Object(_)) => {
            log_fallback(field, "encoded object where sequence expected");
            Vec::new()
        }
        // Bare "a, b, c" lands here as a parse error.
        _ => split_commas(text),
    }
}

fn coerce_mapping(field: &str, raw: Option<&Value>) -> Map<String, Value> {
    match raw {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(m)) => m.clone(),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(m)) => m,
            _ => {
                if !text.trim().is_empty() {
                    log_fallback(field, "undecodable mapping text");
                }
                Map::new()
            }
        },
        Some(_) => {
            log_fallback(field, "expected mapping");
            Map::new()
        }
    }
}

/// Split on commas, trim, drop empty tokens.
pub fn split_commas(text: &str) -> Vec<Value> {
    text.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| Value::String(t.to_string()))
        .collect()
}
