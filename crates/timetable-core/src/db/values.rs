//! Conversions between Rust values and libSQL parameters/columns.

use libsql::{Row, Value};

use crate::error::{Error, Result};

pub fn text_or_null(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |text| Value::Text(text.to_string()))
}

pub fn real_or_null(value: Option<f64>) -> Value {
    value.map_or(Value::Null, Value::Real)
}

pub fn flag(value: bool) -> Value {
    Value::Integer(i64::from(value))
}

pub fn optional_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        other => Err(Error::Database(format!(
            "expected TEXT or NULL in column {idx}, found {other:?}"
        ))),
    }
}

pub fn optional_real(row: &Row, idx: i32) -> Result<Option<f64>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Real(real) => Ok(Some(real)),
        #[allow(clippy::cast_precision_loss)]
        Value::Integer(int) => Ok(Some(int as f64)),
        other => Err(Error::Database(format!(
            "expected REAL or NULL in column {idx}, found {other:?}"
        ))),
    }
}

pub fn read_flag(row: &Row, idx: i32) -> Result<bool> {
    Ok(row.get::<i64>(idx)? != 0)
}

/// `?, ?, ?` for an `IN (...)` list of `count` parameters.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_builds_parameter_list() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn text_or_null_maps_none_to_null() {
        assert_eq!(text_or_null(None), Value::Null);
        assert_eq!(text_or_null(Some("x")), Value::Text("x".to_string()));
    }
}
