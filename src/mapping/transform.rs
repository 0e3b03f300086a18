//! Value transforms applied while mapping a column.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::models::SourceRow;
use crate::utils::{slugify, split_csv};

/// Named transform, persisted in mapping files by its snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// `"a, b,,c"` to `["a", "b", "c"]`.
    CommaSeparatedToArray,
    /// Numeric strings to numbers; anything unparsable becomes null.
    ToNumber,
    /// Loose truthiness (`1`, `"yes"`, `"true"`, `"t"`).
    ToBoolean,
    Trim,
    Lowercase,
    Slugify,
    /// Seconds to whole minutes, rounded.
    SecondsToMinutes,
}

impl Transform {
    pub const ALL: [Transform; 7] = [
        Transform::CommaSeparatedToArray,
        Transform::ToNumber,
        Transform::ToBoolean,
        Transform::Trim,
        Transform::Lowercase,
        Transform::Slugify,
        Transform::SecondsToMinutes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Transform::CommaSeparatedToArray => "comma_separated_to_array",
            Transform::ToNumber => "to_number",
            Transform::ToBoolean => "to_boolean",
            Transform::Trim => "trim",
            Transform::Lowercase => "lowercase",
            Transform::Slugify => "slugify",
            Transform::SecondsToMinutes => "seconds_to_minutes",
        }
    }

    pub fn from_name(name: &str) -> Option<Transform> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Apply to a column value. `_row` gives transforms access to sibling
    /// columns.
    pub fn apply(&self, value: Value, _row: &SourceRow) -> Value {
        match self {
            Transform::CommaSeparatedToArray => match value {
                Value::String(s) => Value::Array(split_csv(&s).into_iter().map(Value::String).collect()),
                Value::Array(items) => Value::Array(items),
                Value::Null => Value::Array(Vec::new()),
                other => Value::Array(vec![other]),
            },
            Transform::ToNumber => to_number(&value),
            Transform::ToBoolean => match value {
                Value::Bool(b) => Value::Bool(b),
                Value::Number(n) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
                Value::String(s) => Value::Bool(matches!(
                    s.trim().to_lowercase().as_str(),
                    "1" | "true" | "t" | "yes" | "y"
                )),
                _ => Value::Bool(false),
            },
            Transform::Trim => map_string(value, |s| s.trim().to_string()),
            Transform::Lowercase => map_string(value, |s| s.to_lowercase()),
            Transform::Slugify => map_string(value, slugify),
            Transform::SecondsToMinutes => match to_number(&value).as_f64() {
                Some(secs) => Value::from((secs / 60.0).round() as i64),
                None => Value::Null,
            },
        }
    }
}

fn map_string(value: Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => other,
    }
}

fn to_number(value: &Value) -> Value {
    match value {
        Value::Number(_) => value.clone(),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                Value::from(i)
            } else {
                s.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        Value::Bool(b) => Value::from(*b as i64),
        _ => Value::Null,
    }
}
