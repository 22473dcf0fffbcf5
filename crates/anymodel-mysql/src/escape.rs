//! Client-side parameter binding for `?` placeholders.
//!
//! The text protocol has no server-side binding, so values are escaped into
//! SQL literals and spliced where the placeholders sit — after the
//! placeholder count has been checked against the bound values, so a
//! mismatch surfaces as [`Error::UndefinedBindValue`] before any bytes reach
//! the server.

use anymodel_core::{Error, Result, Value};

/// Escape a string into a single-quoted MySQL literal.
#[must_use]
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Render a bound value as a SQL literal.
pub fn literal(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(true) => Ok("TRUE".to_string()),
        Value::Bool(false) => Ok("FALSE".to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Text(s) => Ok(escape_string(s)),
        Value::Json(j) => Ok(escape_string(&j.to_string())),
        Value::Array(_) => Err(Error::protocol(
            "array values must be expanded by the query compiler before binding",
        )),
    }
}

/// Substitute every `?` placeholder (outside quoted strings and identifiers)
/// with the escaped literal of the corresponding value.
pub fn bind_placeholders(sql: &str, params: &[Value]) -> Result<String> {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut next = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\'' | b'"' | b'`' => {
                let start = i;
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b {
                        if i + 1 < bytes.len() && bytes[i + 1] == b {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    // Backslash escapes inside string literals.
                    if b != b'`' && bytes[i] == b'\\' && i + 1 < bytes.len() {
                        i += 1;
                    }
                    i += 1;
                }
                i = (i + 1).min(bytes.len());
                out.push_str(&sql[start..i]);
            }
            b'?' => {
                let value = params.get(next).ok_or(Error::UndefinedBindValue {
                    expected: next + 1,
                    actual: params.len(),
                })?;
                out.push_str(&literal(value)?);
                next += 1;
                i += 1;
            }
            _ => {
                // SQL is ASCII at the structural level; copy the raw byte
                // run up to the next interesting character.
                let start = i;
                while i < bytes.len() && !matches!(bytes[i], b'\'' | b'"' | b'`' | b'?') {
                    i += 1;
                }
                out.push_str(&sql[start..i]);
            }
        }
    }
    if next != params.len() {
        return Err(Error::UndefinedBindValue {
            expected: next,
            actual: params.len(),
        });
    }
    Ok(out)
}
