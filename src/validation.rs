//! Declarative per-field validation of target records.
//!
//! Checks for a field run in a fixed order (required, type, length/range,
//! pattern, custom) and stop at the first failure. Every field is checked,
//! so a record can yield several errors but never two for the same field.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::models::{Record, RowError};

/// Predicate returning an error message for invalid values.
pub type CustomCheck = Arc<dyn Fn(&Value, &Record) -> Option<String> + Send + Sync>;

/// Expected JSON type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }
}

/// Rules for one field. Build with [`ValidationRule::field`] and chain.
#[derive(Clone, Default)]
pub struct ValidationRule {
    pub field: String,
    pub required: bool,
    pub field_type: Option<FieldType>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub pattern: Option<Regex>,
    pub custom: Option<CustomCheck>,
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRule")
            .field("field", &self.field)
            .field("required", &self.required)
            .field("field_type", &self.field_type)
            .field("min_length", &self.min_length)
            .field("max_length", &self.max_length)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl ValidationRule {
    pub fn field(name: &str) -> Self {
        Self {
            field: name.to_string(),
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn of_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn min(mut self, n: f64) -> Self {
        self.min = Some(n);
        self
    }

    pub fn max(mut self, n: f64) -> Self {
        self.max = Some(n);
        self
    }

    pub fn pattern(mut self, regex: Regex) -> Self {
        self.pattern = Some(regex);
        self
    }

    pub fn custom<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value, &Record) -> Option<String> + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(check));
        self
    }

    /// First failing check for this field, if any.
    fn check(&self, value: Option<&Value>, record: &Record) -> Option<String> {
        let value = match value {
            Some(v) if !is_empty(v) => v,
            _ if self.required => return Some(format!("{} is required", self.field)),
            _ => return None,
        };

        if let Some(expected) = self.field_type {
            if !expected.matches(value) {
                return Some(format!("{} must be of type {}", self.field, expected.as_str()));
            }
        }

        if let Some(len) = length(value) {
            if let Some(min) = self.min_length {
                if len < min {
                    return Some(format!(
                        "{} must be at least {} characters",
                        self.field, min
                    ));
                }
            }
            if let Some(max) = self.max_length {
                if len > max {
                    return Some(format!("{} must be at most {} characters", self.field, max));
                }
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min {
                if n < min {
                    return Some(format!("{} must be >= {}", self.field, min));
                }
            }
            if let Some(max) = self.max {
                if n > max {
                    return Some(format!("{} must be <= {}", self.field, max));
                }
            }
        }

        if let Some(ref pattern) = self.pattern {
            let matched = match value {
                Value::String(s) => pattern.is_match(s),
                other => pattern.is_match(&other.to_string()),
            };
            if !matched {
                return Some(format!("{} has an invalid format", self.field));
            }
        }

        self.custom.as_ref().and_then(|check| check(value, record))
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        _ => None,
    }
}

/// A failed field check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub row: usize,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.message)
    }
}

impl From<ValidationError> for RowError {
    fn from(e: ValidationError) -> Self {
        RowError::field(&e.field, e.message)
    }
}

/// Ordered rule set for one target collection.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    rules: Vec<ValidationRule>,
}

impl Validator {
    pub fn new(rules: Vec<ValidationRule>) -> Self {
        Self { rules }
    }

    pub fn rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ValidationRule] {
        &self.rules
    }

    /// Check `record`; `row` is carried into the errors for reporting.
    pub fn validate(&self, record: &Record, row: usize) -> Vec<ValidationError> {
        self.rules
            .iter()
            .filter_map(|rule| {
                rule.check(record.get(&rule.field), record)
                    .map(|message| ValidationError {
                        row,
                        field: rule.field.clone(),
                        message,
                    })
            })
            .collect()
    }
}
