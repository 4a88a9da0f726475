//! Prediction values produced by evaluators.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Result of evaluating a single sample.
///
/// An evaluation that produced nothing usable is `Option::None`, stored as
/// `null` in a dataset column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prediction {
    Integer(i64),
    Float(f64),
    Label(String),
}

impl Prediction {
    /// Read a prediction back from a dataset cell.
    ///
    /// `null`, arrays and objects are not predictions.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Label(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::Integer(i)),
                None => n.as_f64().map(Self::Float),
            },
            Value::Bool(b) => Some(Self::Label(b.to_string())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Numeric view, `None` for labels.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Label(_) => None,
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            Self::Label(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Label(_))
    }
}

impl From<Prediction> for Value {
    fn from(p: Prediction) -> Self {
        match p {
            Prediction::Integer(i) => Value::from(i),
            Prediction::Float(f) => Value::from(f),
            Prediction::Label(s) => Value::String(s),
        }
    }
}

impl From<&str> for Prediction {
    fn from(s: &str) -> Self {
        Self::Label(s.to_string())
    }
}

impl From<String> for Prediction {
    fn from(s: String) -> Self {
        Self::Label(s)
    }
}

impl From<i64> for Prediction {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Prediction {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Label(s) => f.write_str(s),
        }
    }
}

/// Convert an optional prediction into a dataset cell.
pub fn to_cell(prediction: Option<Prediction>) -> Value {
    prediction.map(Value::from).unwrap_or(Value::Null)
}
