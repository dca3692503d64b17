// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Field transform hooks.
//!
//! A transform maps the wire representation of one field to its stored column
//! representation (on write) and back (on read). Hashing always sees the
//! stored form, so a transform must be deterministic in the `to_stored`
//! direction.

use serde_json::Value;
use std::fmt::Debug;

use super::value::FieldValue;

/// Bidirectional wire ↔ stored mapping for a single field.
pub trait FieldTransform: Send + Sync + Debug {
    /// Wire value → stored column value.
    fn to_stored(&self, wire: &Value) -> FieldValue;

    /// Stored column value → wire value.
    fn to_wire(&self, stored: &FieldValue) -> Value;
}

/// Ordered ID list stored as the canonical bracketed string `"[1,2,3]"`.
///
/// On write, a JSON array (or an already bracketed string) is sorted
/// ascending. On read, the string is parsed back into a JSON array of
/// integers.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdListTransform;

impl IdListTransform {
    /// Render integer IDs in canonical form.
    #[must_use]
    pub fn canonical(ids: &[i64]) -> String {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        let parts: Vec<String> = sorted.iter().map(i64::to_string).collect();
        format!("[{}]", parts.join(","))
    }

    fn parse(text: &str) -> Option<Vec<i64>> {
        let inner = text
            .trim()
            .trim_start_matches(['[', '{'])
            .trim_end_matches([']', '}'])
            .trim();
        if inner.is_empty() {
            return Some(Vec::new());
        }
        inner.split(',').map(|p| p.trim().parse().ok()).collect()
    }
}

impl FieldTransform for IdListTransform {
    fn to_stored(&self, wire: &Value) -> FieldValue {
        match wire {
            Value::Null => FieldValue::Null,
            Value::Array(items) => {
                let ids: Option<Vec<i64>> = items
                    .iter()
                    .map(|v| match v {
                        Value::Number(n) => n.as_i64(),
                        Value::String(s) => s.trim().parse().ok(),
                        _ => None,
                    })
                    .collect();
                match ids {
                    Some(ids) => FieldValue::Text(Self::canonical(&ids)),
                    None => FieldValue::Text(Value::Array(items.clone()).to_string()),
                }
            }
            Value::String(s) => match Self::parse(s) {
                Some(ids) => FieldValue::Text(Self::canonical(&ids)),
                None => FieldValue::Text(s.clone()),
            },
            other => FieldValue::Text(other.to_string()),
        }
    }

    fn to_wire(&self, stored: &FieldValue) -> Value {
        match stored {
            FieldValue::Text(s) if s.trim().is_empty() => Value::Null,
            FieldValue::Text(s) => match Self::parse(s) {
                Some(ids) => Value::Array(ids.into_iter().map(Value::from).collect()),
                None => Value::String(s.clone()),
            },
            other => other.to_json(),
        }
    }
}

/// Structured JSON document stored as canonical JSON text.
///
/// `serde_json` maps keep keys sorted, so `to_string` is canonical.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonTransform;

impl FieldTransform for JsonTransform {
    fn to_stored(&self, wire: &Value) -> FieldValue {
        match wire {
            Value::Null => FieldValue::Null,
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed @ (Value::Object(_) | Value::Array(_))) => FieldValue::Text(parsed.to_string()),
                _ => FieldValue::Text(s.clone()),
            },
            other => FieldValue::Text(other.to_string()),
        }
    }

    fn to_wire(&self, stored: &FieldValue) -> Value {
        match stored {
            FieldValue::Text(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
            other => other.to_json(),
        }
    }
}
