// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Row expression builder.
//!
//! The row expression is the `|`-joined list of encoded hash fields, in
//! hash-field declaration order. It is the exact string the authority hashes.

use super::encoder::encode;
use crate::schema::{Row, Schema};

/// Delimiter between encoded fields.
pub const FIELD_DELIMITER: &str = "|";

/// Encoded hash fields of a row, one entry per hash field.
#[must_use]
pub fn encoded_fields(schema: &Schema, row: &Row) -> Vec<String> {
    schema
        .hash_fields()
        .iter()
        .map(|field| match field.column {
            Some(idx) => encode(field.kind, row.value(idx)),
            None => String::new(),
        })
        .collect()
}

/// Build the canonical row expression for a stored row.
#[must_use]
pub fn row_expression(schema: &Schema, row: &Row) -> String {
    encoded_fields(schema, row).join(FIELD_DELIMITER)
}
