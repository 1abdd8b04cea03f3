//! Open metadata bags attached to transactions and payment records.
//!
//! The core only reads a handful of keys (`accountId`, `credits`, `packageName`);
//! everything else is carried through untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A string-keyed map of scalar values.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// Free text.
    String(String),
}

impl MetadataValue {
    /// Return the value as a string slice if it is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the value as an integer.
    ///
    /// Payment processors frequently stringify metadata, so numeric strings are accepted.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            Self::Bool(_) | Self::Float(_) => None,
        }
    }

    /// Convert an arbitrary JSON value into a metadata scalar.
    ///
    /// Objects and arrays are not scalars and yield `None`; so does `null`.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Null
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// Build a metadata bag from the scalar members of a JSON object.
#[must_use]
pub fn metadata_from_json(value: &serde_json::Value) -> Metadata {
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(k, v)| MetadataValue::from_json(v).map(|v| (k.clone(), v)))
                .collect()
        })
        .unwrap_or_default()
}
