// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity descriptors and compiled schemas.
//!
//! An [`EntityDescriptor`] is the construction-time description of one mirrored
//! table: its local table name, the authority's table name, the REST endpoint,
//! the ordered column list, the hash field list, and optional transform hooks.
//! [`Schema::compile`] validates it once and produces the encoder plan used by
//! every hash computation.
//!
//! # Example
//!
//! ```
//! use entity_mirror::schema::{ColumnDescriptor, EntityDescriptor, Schema, IdListTransform};
//!
//! let descriptor = EntityDescriptor::new("teams", "/api/teams")
//!     .column(ColumnDescriptor::integer("id").primary_key())
//!     .column(ColumnDescriptor::text("name"))
//!     .column(ColumnDescriptor::text("member_ids"))
//!     .column(ColumnDescriptor::timestamp("updated_at"))
//!     .transform("member_ids", IdListTransform);
//!
//! let schema = Schema::compile(descriptor).unwrap();
//! assert_eq!(schema.id_field(), "id");
//! assert_eq!(schema.hash_fields().len(), 4);
//! ```

mod transform;
mod value;

pub use transform::{FieldTransform, IdListTransform, JsonTransform};
pub use value::{FieldValue, Record, Row};

use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use crate::merkle::encoder::is_truthy;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Entity table name must not be empty")]
    EmptyTableName,
    #[error("Entity '{0}' declares no primary key column")]
    NoPrimaryKey(String),
    #[error("Entity '{0}' declares more than one primary key column")]
    MultiplePrimaryKeys(String),
    #[error("Primary key '{0}' must be an integer column")]
    NonIntegerPrimaryKey(String),
    #[error("Column '{0}' is declared twice")]
    DuplicateColumn(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Entity '{0}' is already registered")]
    DuplicateEntity(String),
}

/// Declared storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Boolean,
    Text,
    Timestamp,
}

impl ColumnType {
    /// SQLite column type used when creating or migrating the table.
    ///
    /// Timestamps get NUMERIC affinity so epoch-millisecond integers stay
    /// integers while date strings stay text.
    #[must_use]
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Timestamp => "NUMERIC",
        }
    }
}

/// Semantic kind that selects the normalization rule for a hash field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Identifier,
    Boolean,
    Timestamp,
    IdList,
    Default,
}

impl FieldKind {
    /// Classify a column the way the authority's normalizer does.
    ///
    /// Naming conventions come first (`*_ids`, `*_id`, `is_*`/`has_*`,
    /// `enabled`/`required`, `*_at`/`*_date`), then the declared type.
    #[must_use]
    pub fn classify(name: &str, column_type: Option<ColumnType>) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with("_ids") {
            Self::IdList
        } else if lower.ends_with("_id") {
            Self::Identifier
        } else if lower.starts_with("is_")
            || lower.starts_with("has_")
            || lower == "enabled"
            || lower == "required"
        {
            Self::Boolean
        } else if lower.ends_with("_at") || lower.ends_with("_date") {
            Self::Timestamp
        } else {
            match column_type {
                Some(ColumnType::Boolean) => Self::Boolean,
                Some(ColumnType::Timestamp) => Self::Timestamp,
                _ => Self::Default,
            }
        }
    }
}

/// One declared column.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, rename = "isPrimaryKey", alias = "primary_key")]
    pub primary_key: bool,
    /// Explicit normalization kind, overriding convention-based classification.
    #[serde(default)]
    pub kind: Option<FieldKind>,
}

impl ColumnDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            kind: None,
        }
    }

    #[must_use]
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    #[must_use]
    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Real)
    }

    #[must_use]
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    #[must_use]
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    #[must_use]
    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Timestamp)
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: FieldKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Effective normalization kind.
    #[must_use]
    pub fn field_kind(&self) -> FieldKind {
        self.kind
            .unwrap_or_else(|| FieldKind::classify(&self.name, Some(self.column_type)))
    }
}

/// Construction-time description of one mirrored entity.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityDescriptor {
    /// Local table name.
    pub table_name: String,
    /// Table name the integrity authority knows this entity by.
    /// Defaults to `table_name` when empty.
    #[serde(default)]
    pub authority_table: String,
    /// REST resource endpoint (e.g. `/api/teams`).
    pub endpoint: String,
    pub columns: Vec<ColumnDescriptor>,
    /// Ordered hash fields; `None` means every column in declaration order.
    #[serde(default)]
    pub hash_fields: Option<Vec<String>>,
    #[serde(skip)]
    pub transforms: HashMap<String, Arc<dyn FieldTransform>>,
}

impl EntityDescriptor {
    #[must_use]
    pub fn new(table_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let table_name = table_name.into();
        Self {
            authority_table: table_name.clone(),
            table_name,
            endpoint: endpoint.into(),
            columns: Vec::new(),
            hash_fields: None,
            transforms: HashMap::new(),
        }
    }

    #[must_use]
    pub fn authority_table(mut self, name: impl Into<String>) -> Self {
        self.authority_table = name.into();
        self
    }

    #[must_use]
    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn hash_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hash_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn transform(mut self, field: impl Into<String>, transform: impl FieldTransform + 'static) -> Self {
        self.transforms.insert(field.into(), Arc::new(transform));
        self
    }
}

/// A hash field resolved against the column list.
#[derive(Debug, Clone, PartialEq)]
pub struct HashField {
    pub name: String,
    pub kind: FieldKind,
    /// Column index; `None` when the field names no declared column.
    pub column: Option<usize>,
}

/// Validated, compiled entity schema.
#[derive(Debug, Clone)]
pub struct Schema {
    table_name: String,
    authority_table: String,
    endpoint: String,
    columns: Vec<ColumnDescriptor>,
    id_index: usize,
    hash_plan: Vec<HashField>,
    transforms: HashMap<String, Arc<dyn FieldTransform>>,
}

impl Schema {
    /// Validate a descriptor and build the hash plan.
    pub fn compile(descriptor: EntityDescriptor) -> Result<Self, SchemaError> {
        let EntityDescriptor {
            table_name,
            authority_table,
            endpoint,
            columns,
            hash_fields,
            transforms,
        } = descriptor;

        if table_name.trim().is_empty() {
            return Err(SchemaError::EmptyTableName);
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(column.name.clone()));
            }
        }

        let mut keys = columns.iter().enumerate().filter(|(_, c)| c.primary_key);
        let (id_index, id_column) = keys
            .next()
            .ok_or_else(|| SchemaError::NoPrimaryKey(table_name.clone()))?;
        if keys.next().is_some() {
            return Err(SchemaError::MultiplePrimaryKeys(table_name));
        }
        if id_column.column_type != ColumnType::Integer {
            return Err(SchemaError::NonIntegerPrimaryKey(id_column.name.clone()));
        }

        let names: Vec<String> = match hash_fields {
            Some(fields) => fields,
            None => columns.iter().map(|c| c.name.clone()).collect(),
        };
        let hash_plan = names
            .into_iter()
            .map(|name| {
                let column = columns.iter().position(|c| c.name == name);
                let kind = match column {
                    Some(idx) => columns[idx].field_kind(),
                    None => FieldKind::classify(&name, None),
                };
                HashField { name, kind, column }
            })
            .collect();

        let authority_table = if authority_table.trim().is_empty() {
            table_name.clone()
        } else {
            authority_table
        };

        Ok(Self {
            table_name,
            authority_table,
            endpoint,
            columns,
            id_index,
            hash_plan,
            transforms,
        })
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    #[must_use]
    pub fn authority_table(&self) -> &str {
        &self.authority_table
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    #[must_use]
    pub fn id_field(&self) -> &str {
        &self.columns[self.id_index].name
    }

    #[must_use]
    pub fn id_index(&self) -> usize {
        self.id_index
    }

    #[must_use]
    pub fn hash_fields(&self) -> &[HashField] {
        &self.hash_plan
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Convert a wire record into a stored row (input transforms applied).
    pub fn row_from_record(&self, record: &Record) -> Result<Row, SchemaError> {
        let id = record
            .get(self.id_field())
            .and_then(wire_id)
            .ok_or_else(|| {
                SchemaError::InvalidRecord(format!(
                    "'{}' record without integer '{}'",
                    self.table_name,
                    self.id_field()
                ))
            })?;

        let values = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                if idx == self.id_index {
                    return FieldValue::Integer(id);
                }
                let wire = record.get(&column.name).unwrap_or(&Value::Null);
                match self.transforms.get(&column.name) {
                    Some(transform) => transform.to_stored(wire),
                    None => coerce(wire, column.column_type),
                }
            })
            .collect();

        Ok(Row { id, values })
    }

    /// Convert a stored row into its wire record (output transforms applied).
    #[must_use]
    pub fn record_from_row(&self, row: &Row) -> Record {
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let stored = row.value(idx);
                let wire = match self.transforms.get(&column.name) {
                    Some(transform) => transform.to_wire(stored),
                    None => present(stored, column.column_type),
                };
                (column.name.clone(), wire)
            })
            .collect()
    }
}

fn wire_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Wire value → stored value by declared column type.
fn coerce(wire: &Value, column_type: ColumnType) -> FieldValue {
    match (column_type, wire) {
        (_, Value::Null) => FieldValue::Null,
        (ColumnType::Boolean, Value::Bool(b)) => FieldValue::Boolean(*b),
        (ColumnType::Boolean, Value::Number(n)) => FieldValue::Boolean(n.as_f64().is_some_and(|f| f != 0.0)),
        (ColumnType::Boolean, Value::String(s)) => FieldValue::Boolean(is_truthy(s)),
        (ColumnType::Integer | ColumnType::Timestamp, Value::Number(n)) => match n.as_i64() {
            Some(i) => FieldValue::Integer(i),
            None => n.as_f64().map_or(FieldValue::Null, FieldValue::Real),
        },
        (ColumnType::Integer, Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(i) => FieldValue::Integer(i),
            Err(_) => FieldValue::Text(s.clone()),
        },
        (ColumnType::Integer | ColumnType::Real, Value::Bool(b)) => FieldValue::Integer(i64::from(*b)),
        (ColumnType::Real, Value::Number(n)) => n.as_f64().map_or(FieldValue::Null, FieldValue::Real),
        (ColumnType::Real, Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(f) => FieldValue::Real(f),
            Err(_) => FieldValue::Text(s.clone()),
        },
        (_, Value::String(s)) => FieldValue::Text(s.clone()),
        (ColumnType::Text, Value::Number(n)) => FieldValue::Text(n.to_string()),
        (ColumnType::Text | ColumnType::Timestamp, Value::Bool(b)) => FieldValue::Text(b.to_string()),
        (_, structured) => FieldValue::Text(structured.to_string()),
    }
}

/// Stored value → wire value by declared column type.
fn present(stored: &FieldValue, column_type: ColumnType) -> Value {
    match (column_type, stored) {
        (ColumnType::Boolean, FieldValue::Integer(i)) => Value::Bool(*i != 0),
        (ColumnType::Boolean, FieldValue::Real(f)) => Value::Bool(*f != 0.0),
        (ColumnType::Boolean, FieldValue::Text(s)) => Value::Bool(is_truthy(s)),
        (_, other) => other.to_json(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn teams() -> EntityDescriptor {
        EntityDescriptor::new("teams", "/api/teams")
            .column(ColumnDescriptor::integer("id").primary_key())
            .column(ColumnDescriptor::text("name"))
            .column(ColumnDescriptor::boolean("active"))
            .column(ColumnDescriptor::text("member_ids"))
            .transform("member_ids", IdListTransform)
    }

    #[test]
    fn test_classify_conventions() {
        assert_eq!(FieldKind::classify("owner_id", Some(ColumnType::Integer)), FieldKind::Identifier);
        assert_eq!(FieldKind::classify("member_ids", Some(ColumnType::Text)), FieldKind::IdList);
        assert_eq!(FieldKind::classify("is_archived", Some(ColumnType::Text)), FieldKind::Boolean);
        assert_eq!(FieldKind::classify("enabled", Some(ColumnType::Integer)), FieldKind::Boolean);
        assert_eq!(FieldKind::classify("created_at", Some(ColumnType::Text)), FieldKind::Timestamp);
        assert_eq!(FieldKind::classify("due_date", None), FieldKind::Timestamp);
        assert_eq!(FieldKind::classify("active", Some(ColumnType::Boolean)), FieldKind::Boolean);
        assert_eq!(FieldKind::classify("seen", Some(ColumnType::Timestamp)), FieldKind::Timestamp);
        assert_eq!(FieldKind::classify("id", Some(ColumnType::Integer)), FieldKind::Default);
        assert_eq!(FieldKind::classify("title", Some(ColumnType::Text)), FieldKind::Default);
    }

    #[test]
    fn test_explicit_kind_overrides_convention() {
        let column = ColumnDescriptor::text("legacy_id").with_kind(FieldKind::Default);
        assert_eq!(column.field_kind(), FieldKind::Default);
    }

    #[test]
    fn test_compile_rejects_bad_descriptors() {
        let no_pk = EntityDescriptor::new("t", "/t").column(ColumnDescriptor::integer("id"));
        assert!(matches!(Schema::compile(no_pk), Err(SchemaError::NoPrimaryKey(_))));

        let two_pk = EntityDescriptor::new("t", "/t")
            .column(ColumnDescriptor::integer("id").primary_key())
            .column(ColumnDescriptor::integer("other").primary_key());
        assert!(matches!(Schema::compile(two_pk), Err(SchemaError::MultiplePrimaryKeys(_))));

        let text_pk = EntityDescriptor::new("t", "/t").column(ColumnDescriptor::text("id").primary_key());
        assert!(matches!(Schema::compile(text_pk), Err(SchemaError::NonIntegerPrimaryKey(_))));

        let dup = EntityDescriptor::new("t", "/t")
            .column(ColumnDescriptor::integer("id").primary_key())
            .column(ColumnDescriptor::text("id"));
        assert!(matches!(Schema::compile(dup), Err(SchemaError::DuplicateColumn(_))));

        let empty = EntityDescriptor::new(" ", "/t").column(ColumnDescriptor::integer("id").primary_key());
        assert_eq!(Schema::compile(empty).unwrap_err(), SchemaError::EmptyTableName);
    }

    #[test]
    fn test_hash_plan_defaults_to_all_columns() {
        let schema = Schema::compile(teams()).unwrap();
        let names: Vec<_> = schema.hash_fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "active", "member_ids"]);
        assert_eq!(schema.authority_table(), "teams");
    }

    #[test]
    fn test_hash_plan_resolves_unknown_fields() {
        let schema = Schema::compile(teams().hash_fields(["id", "ghost_id"])).unwrap();
        let ghost = &schema.hash_fields()[1];
        assert_eq!(ghost.column, None);
        assert_eq!(ghost.kind, FieldKind::Identifier);
    }

    #[test]
    fn test_record_round_trip_through_transforms() {
        let schema = Schema::compile(teams()).unwrap();
        let record = json!({"id": 7, "name": "Ops", "active": "yes", "member_ids": [9, 3]});
        let row = schema.row_from_record(record.as_object().unwrap()).unwrap();

        assert_eq!(row.id, 7);
        assert_eq!(row.values[2], FieldValue::Boolean(true));
        assert_eq!(row.values[3], FieldValue::Text("[3,9]".into()));

        let back = schema.record_from_row(&row);
        assert_eq!(
            Value::Object(back),
            json!({"id": 7, "name": "Ops", "active": true, "member_ids": [3, 9]})
        );
    }

    #[test]
    fn test_record_without_id_is_rejected() {
        let schema = Schema::compile(teams()).unwrap();
        let record = json!({"name": "nobody"});
        assert!(matches!(
            schema.row_from_record(record.as_object().unwrap()),
            Err(SchemaError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_descriptor_deserializes() {
        let descriptor: EntityDescriptor = serde_json::from_value(json!({
            "table_name": "tags",
            "endpoint": "/api/tags",
            "columns": [
                {"name": "id", "type": "integer", "isPrimaryKey": true},
                {"name": "label", "type": "text"}
            ]
        }))
        .unwrap();
        let schema = Schema::compile(descriptor).unwrap();
        assert_eq!(schema.authority_table(), "tags");
        assert_eq!(schema.columns().len(), 2);
    }
}
