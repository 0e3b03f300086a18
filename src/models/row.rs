//! Source rows and their typed decoding.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Target-shaped document data, keyed by target field name.
pub type Record = serde_json::Map<String, Value>;

/// A single scalar read from the source store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Textual view of the value. Numbers are formatted, blobs are skipped.
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Real(f) => Some(f.to_string()),
            SqlValue::Null | SqlValue::Blob(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(f) if f.fract() == 0.0 => Some(*f as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Real(f) => Some(*f),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Loose boolean interpretation used by legacy flag columns.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Integer(i) => Some(*i != 0),
            SqlValue::Real(f) => Some(*f != 0.0),
            SqlValue::Text(s) => match s.trim().to_lowercase().as_str() {
                "1" | "true" | "t" | "yes" | "y" => Some(true),
                "0" | "false" | "f" | "no" | "n" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Convert to a JSON value for the target document.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::from(*i),
            SqlValue::Real(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Blob(b) => Value::String(hex::encode(b)),
        }
    }

    /// Build from a JSON value, as returned by REST sources.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(SqlValue::Integer)
                .or_else(|| n.as_f64().map(SqlValue::Real))
                .unwrap_or(SqlValue::Null),
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Real(r) => write!(f, "{}", r),
            SqlValue::Text(s) => write!(f, "{}", s),
            SqlValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// One row from a source table, column name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    columns: BTreeMap<String, SqlValue>,
}

impl SourceRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly used by tests and the REST source.
    pub fn with(mut self, column: &str, value: SqlValue) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: SqlValue) {
        self.columns.insert(column.to_string(), value);
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&String, &SqlValue)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Non-empty text value of a column.
    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column)
            .and_then(SqlValue::as_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn integer(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(SqlValue::as_i64)
    }

    pub fn real(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(SqlValue::as_f64)
    }

    pub fn boolean(&self, column: &str) -> Option<bool> {
        self.get(column).and_then(SqlValue::as_bool)
    }

    /// Split a comma-separated column into trimmed, non-empty entries.
    pub fn csv(&self, column: &str) -> Vec<String> {
        self.text(column)
            .map(|s| crate::utils::split_csv(&s))
            .unwrap_or_default()
    }

    /// Required integer column, as a decoding error when absent.
    pub fn require_integer(&self, column: &str) -> Result<i64, RowError> {
        self.integer(column)
            .ok_or_else(|| RowError::field(column, "missing or non-numeric value"))
    }

    /// Required text column, as a decoding error when absent.
    pub fn require_text(&self, column: &str) -> Result<String, RowError> {
        self.text(column)
            .ok_or_else(|| RowError::field(column, "missing value"))
    }

    /// JSON view of the whole row, attached to error reports.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.columns
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

/// A failure attributable to a single row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub field: Option<String>,
    pub message: String,
}

impl RowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn field(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}: {}", field, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RowError {}

impl From<crate::target::StoreError> for RowError {
    fn from(e: crate::target::StoreError) -> Self {
        RowError::new(format!("target store: {}", e))
    }
}

impl From<crate::source::SourceError> for RowError {
    fn from(e: crate::source::SourceError) -> Self {
        RowError::new(format!("source store: {}", e))
    }
}

/// Decode a typed legacy record from an untyped source row.
pub trait FromSourceRow: Sized {
    fn from_row(row: &SourceRow) -> Result<Self, RowError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loose_accessors() {
        let row = SourceRow::new()
            .with("id", SqlValue::Text(" 42 ".into()))
            .with("published", SqlValue::Text("yes".into()))
            .with("tags", SqlValue::Text("calm, focus,,  sleep ".into()))
            .with("empty", SqlValue::Text("   ".into()));

        assert_eq!(row.integer("id"), Some(42));
        assert_eq!(row.boolean("published"), Some(true));
        assert_eq!(row.csv("tags"), vec!["calm", "focus", "sleep"]);
        assert_eq!(row.text("empty"), None);
        assert!(row.require_text("missing").is_err());
    }

    #[test]
    fn test_json_conversion() {
        assert_eq!(SqlValue::from_json(&serde_json::json!(true)), SqlValue::Integer(1));
        assert_eq!(SqlValue::from_json(&serde_json::json!(2.5)), SqlValue::Real(2.5));
        assert_eq!(SqlValue::Integer(7).to_json(), serde_json::json!(7));
        assert_eq!(SqlValue::Null.to_json(), Value::Null);
    }
}
