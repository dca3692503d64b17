// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed field values and rows.
//!
//! A [`Row`] is the stored form of one entity: the primary key plus one
//! [`FieldValue`] per declared column, in declaration order. The wire form
//! exchanged with the remote and the host application is a JSON object
//! ([`Record`]).

use serde_json::{Number, Value};

/// Wire representation of one entity (JSON object keyed by column name).
pub type Record = serde_json::Map<String, Value>;

/// A single stored column value.
///
/// Mirrors what the embedded SQLite engine can hold. Booleans are kept as a
/// distinct variant in memory and stored as `0`/`1`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Text(String),
}

impl FieldValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text content if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, accepting integral reals and numeric text.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Real(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Convert to the plain JSON value used on the wire.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Integer(i) => Value::Number((*i).into()),
            Self::Real(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Text(s) => Value::String(s.clone()),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One stored entity row.
///
/// `values` is aligned with the owning schema's column list; the primary key
/// column appears in it as well (as `FieldValue::Integer(id)`).
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: i64,
    pub values: Vec<FieldValue>,
}

impl Row {
    /// Value at a column index, `Null` when out of range.
    #[must_use]
    pub fn value(&self, index: usize) -> &FieldValue {
        const NULL: &FieldValue = &FieldValue::Null;
        self.values.get(index).unwrap_or(NULL)
    }
}
