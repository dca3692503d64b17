// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Parameterized statements.
//!
//! Values always travel as bound parameters. Identifiers (table and column
//! names from entity descriptors) are quoted with [`quote_ident`].

use crate::schema::FieldValue;

/// SQL text plus its positional (`?`) parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<FieldValue>,
}

impl Statement {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append one positional parameter.
    #[must_use]
    pub fn bind(mut self, value: impl Into<FieldValue>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Append several positional parameters.
    #[must_use]
    pub fn bind_all<I>(mut self, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<FieldValue>,
    {
        self.params.extend(values.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn params(&self) -> &[FieldValue] {
        &self.params
    }

    #[must_use]
    pub fn into_parts(self) -> (String, Vec<FieldValue>) {
        (self.sql, self.params)
    }
}

/// Quote an identifier for SQLite (`"name"`, embedded quotes doubled).
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `?, ?, ?` for `n` parameters.
#[must_use]
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_collects_params_in_order() {
        let stmt = Statement::new("SELECT * FROM t WHERE a = ? AND b = ?")
            .bind(1_i64)
            .bind("x");
        assert_eq!(
            stmt.params(),
            &[FieldValue::Integer(1), FieldValue::Text("x".into())]
        );
    }

    #[test]
    fn test_bind_all() {
        let stmt = Statement::new("DELETE FROM t WHERE id IN (?, ?, ?)").bind_all([1_i64, 2, 3]);
        assert_eq!(stmt.params().len(), 3);
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("tasks"), "\"tasks\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(0), "");
    }
}
