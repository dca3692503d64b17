// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Canonical value encoding for row hashing.
//!
//! Every rule here mirrors the authority's normalizer byte-for-byte. The
//! encoder is total: any value/kind combination yields a string, never an
//! error.
//!
//! | Kind        | `null` | Value                                        |
//! |-------------|--------|----------------------------------------------|
//! | Identifier  | `"0"`  | trimmed text                                 |
//! | Boolean     | `"f"`  | `"t"` / `"f"`                                |
//! | Timestamp   | `""`   | UTC epoch milliseconds                       |
//! | IdList      | `""`   | `"[a,b,c]"` sorted ascending, `"[]"` if empty |
//! | Default     | `""`   | trimmed text                                 |

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::schema::{FieldKind, FieldValue};

/// Case-insensitive tokens that count as `true` for text-stored booleans.
pub const TRUTHY_TOKENS: [&str; 6] = ["TRUE", "T", "1", "YES", "Y", "ON"];

/// Whether a text value is one of [`TRUTHY_TOKENS`].
#[must_use]
pub fn is_truthy(text: &str) -> bool {
    let trimmed = text.trim();
    TRUTHY_TOKENS.iter().any(|t| t.eq_ignore_ascii_case(trimmed))
}

/// Encode one field value under its semantic kind.
#[must_use]
pub fn encode(kind: FieldKind, value: &FieldValue) -> String {
    match kind {
        FieldKind::Identifier => encode_identifier(value),
        FieldKind::Boolean => encode_boolean(value),
        FieldKind::Timestamp => encode_timestamp(value),
        FieldKind::IdList => encode_id_list(value),
        FieldKind::Default => encode_default(value),
    }
}

fn encode_identifier(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => "0".to_string(),
        other => text_form(other).trim().to_string(),
    }
}

fn encode_boolean(value: &FieldValue) -> String {
    let truth = match value {
        FieldValue::Null => false,
        FieldValue::Boolean(b) => *b,
        FieldValue::Integer(i) => *i != 0,
        FieldValue::Real(f) => *f != 0.0,
        FieldValue::Text(s) => is_truthy(s),
    };
    if truth { "t" } else { "f" }.to_string()
}

fn encode_timestamp(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => String::new(),
        FieldValue::Integer(ms) => ms.to_string(),
        FieldValue::Real(ms) if ms.is_finite() => (ms.trunc() as i64).to_string(),
        FieldValue::Text(s) => parse_epoch_millis(s).map(|ms| ms.to_string()).unwrap_or_default(),
        _ => String::new(),
    }
}

fn encode_id_list(value: &FieldValue) -> String {
    let text = match value {
        FieldValue::Null => return String::new(),
        other => text_form(other),
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let inner = trimmed
        .trim_start_matches(['[', '{'])
        .trim_end_matches([']', '}'])
        .trim();
    if inner.is_empty() {
        return "[]".to_string();
    }

    let mut parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    let numeric: Option<Vec<i64>> = parts.iter().map(|p| p.parse().ok()).collect();
    let rendered: Vec<String> = match numeric {
        Some(mut ids) => {
            ids.sort_unstable();
            ids.iter().map(i64::to_string).collect()
        }
        None => {
            parts.sort_unstable();
            parts.iter().map(|p| (*p).to_string()).collect()
        }
    };
    format!("[{}]", rendered.join(","))
}

fn encode_default(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => String::new(),
        other => text_form(other).trim().to_string(),
    }
}

/// Plain text rendering of a stored value.
fn text_form(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => String::new(),
        FieldValue::Integer(i) => i.to_string(),
        FieldValue::Real(f) => render_real(*f),
        FieldValue::Boolean(b) => b.to_string(),
        FieldValue::Text(s) => s.clone(),
    }
}

/// Integral reals render without a fractional part (`3.0` → `"3"`).
fn render_real(f: f64) -> String {
    if !f.is_finite() {
        return String::new();
    }
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

/// Parse the timestamp forms the authority emits into epoch milliseconds.
fn parse_epoch_millis(text: &str) -> Option<i64> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(ms) = s.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.timestamp_millis());
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    #[test]
    fn test_identifier() {
        assert_eq!(encode(FieldKind::Identifier, &FieldValue::Null), "0");
        assert_eq!(encode(FieldKind::Identifier, &text("   ")), "");
        assert_eq!(encode(FieldKind::Identifier, &text(" 42 ")), "42");
        assert_eq!(encode(FieldKind::Identifier, &FieldValue::Integer(17)), "17");
    }

    #[test]
    fn test_boolean() {
        assert_eq!(encode(FieldKind::Boolean, &FieldValue::Null), "f");
        assert_eq!(encode(FieldKind::Boolean, &FieldValue::Boolean(true)), "t");
        assert_eq!(encode(FieldKind::Boolean, &FieldValue::Boolean(false)), "f");
        assert_eq!(encode(FieldKind::Boolean, &FieldValue::Integer(1)), "t");
        assert_eq!(encode(FieldKind::Boolean, &FieldValue::Integer(0)), "f");
        for token in ["true", "T", "1", "yes", "Y", "On", " TRUE "] {
            assert_eq!(encode(FieldKind::Boolean, &text(token)), "t", "token {token}");
        }
        for token in ["false", "no", "0", "", "maybe"] {
            assert_eq!(encode(FieldKind::Boolean, &text(token)), "f", "token {token}");
        }
    }

    #[test]
    fn test_timestamp_forms() {
        let expected = "1704067200000"; // 2024-01-01T00:00:00Z
        assert_eq!(encode(FieldKind::Timestamp, &text("2024-01-01T00:00:00Z")), expected);
        assert_eq!(encode(FieldKind::Timestamp, &text("2024-01-01T02:00:00+02:00")), expected);
        assert_eq!(encode(FieldKind::Timestamp, &text("2024-01-01 00:00:00")), expected);
        assert_eq!(encode(FieldKind::Timestamp, &text("2024-01-01")), expected);
        assert_eq!(encode(FieldKind::Timestamp, &text(expected)), expected);
        assert_eq!(encode(FieldKind::Timestamp, &FieldValue::Integer(1704067200000)), expected);
        assert_eq!(
            encode(FieldKind::Timestamp, &text("2024-01-01T00:00:00.123Z")),
            "1704067200123"
        );
    }

    #[test]
    fn test_timestamp_empty_and_invalid() {
        assert_eq!(encode(FieldKind::Timestamp, &FieldValue::Null), "");
        assert_eq!(encode(FieldKind::Timestamp, &text("")), "");
        assert_eq!(encode(FieldKind::Timestamp, &text("not a date")), "");
    }

    #[test]
    fn test_id_list() {
        assert_eq!(encode(FieldKind::IdList, &FieldValue::Null), "");
        assert_eq!(encode(FieldKind::IdList, &text("")), "");
        assert_eq!(encode(FieldKind::IdList, &text("[]")), "[]");
        assert_eq!(encode(FieldKind::IdList, &text("[3, 1,2]")), "[1,2,3]");
        assert_eq!(encode(FieldKind::IdList, &text("{10,9}")), "[9,10]");
        assert_eq!(encode(FieldKind::IdList, &text("[b,a]")), "[a,b]");
    }

    #[test]
    fn test_default() {
        assert_eq!(encode(FieldKind::Default, &FieldValue::Null), "");
        assert_eq!(encode(FieldKind::Default, &text("  hello ")), "hello");
        assert_eq!(encode(FieldKind::Default, &text("   ")), "");
        assert_eq!(encode(FieldKind::Default, &FieldValue::Integer(-5)), "-5");
        assert_eq!(encode(FieldKind::Default, &FieldValue::Real(3.0)), "3");
        assert_eq!(encode(FieldKind::Default, &FieldValue::Real(2.5)), "2.5");
        assert_eq!(encode(FieldKind::Default, &text("{\"a\":1}")), "{\"a\":1}");
    }
}
