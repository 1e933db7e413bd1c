//! Dynamic values bound to statements.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dynamic value type for statement parameters and literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Interpret the value as an integer, the way SQLite coerces LIMIT operands.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Bool(b) => Some(*b as i64),
            SqlValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Parse a SQL literal as it appears in source text.
    ///
    /// Returns `None` for anything that is not a plain literal (expressions,
    /// function calls, identifiers).
    pub fn from_literal(text: &str) -> Option<SqlValue> {
        let t = text.trim();
        if t.eq_ignore_ascii_case("null") {
            return Some(SqlValue::Null);
        }
        if t.eq_ignore_ascii_case("true") {
            return Some(SqlValue::Bool(true));
        }
        if t.eq_ignore_ascii_case("false") {
            return Some(SqlValue::Bool(false));
        }
        if t.len() >= 2 && t.starts_with('\'') && t.ends_with('\'') {
            return Some(SqlValue::Text(t[1..t.len() - 1].replace("''", "'")));
        }
        if let Ok(i) = t.parse::<i64>() {
            return Some(SqlValue::Int(i));
        }
        if let Ok(f) = t.parse::<f64>() {
            if t.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')) {
                return Some(SqlValue::Float(f));
            }
        }
        None
    }

    /// Render the value as a SQL literal.
    pub fn to_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(true) => "TRUE".to_string(),
            SqlValue::Bool(false) => "FALSE".to_string(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Float(v) => v.to_string(),
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Blob(b) => {
                let hex: String = b.iter().map(|byte| format!("{:02X}", byte)).collect();
                format!("X'{}'", hex)
            }
        }
    }

    /// Convert to a JSON value for synthesized result rows.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SqlValue::Null => serde_json::Value::Null,
            SqlValue::Bool(b) => serde_json::Value::Bool(*b),
            SqlValue::Int(v) => serde_json::Value::Number((*v).into()),
            SqlValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            SqlValue::Text(s) => serde_json::Value::String(s.clone()),
            SqlValue::Blob(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::Number((*byte).into())).collect(),
            ),
        }
    }

    /// Parse a command-line binding: numbers, booleans, `null`, else text.
    pub fn parse_cli(binding: &str) -> SqlValue {
        if let Ok(n) = binding.parse::<i64>() {
            SqlValue::Int(n)
        } else if let Ok(f) = binding.parse::<f64>() {
            SqlValue::Float(f)
        } else if binding == "true" {
            SqlValue::Bool(true)
        } else if binding == "false" {
            SqlValue::Bool(false)
        } else if binding == "null" {
            SqlValue::Null
        } else {
            SqlValue::Text(binding.to_string())
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Text(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_literal()),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}
