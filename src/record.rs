//! Raw benchmark records and the artifact envelope produced by collectors.
//!
//! Collectors hand over JSON documents shaped as
//! `{ "metadata": { ... }, "data": [ { ... }, ... ] }`. Each element of `data`
//! becomes a [`Record`]: a map from field name to [`FieldValue`], which is
//! either a scalar or one level of nested object. The flattener is the only
//! place that collapses nested objects into flat scalar cells.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// A leaf value inside a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
}

impl Scalar {
    /// Render the scalar as a table cell. `Null` renders empty.
    pub fn render(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    /// Numeric view of the scalar, if it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::Text(s),
            // Arrays are opaque to the flattener; keep their JSON text.
            other @ (Value::Array(_) | Value::Object(_)) => Self::Text(other.to_string()),
        }
    }
}

/// One field of a raw record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(Scalar),
    Nested(BTreeMap<String, Scalar>),
}

impl FieldValue {
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Nested(
                map.into_iter()
                    .map(|(k, v)| (k, Scalar::from_json(v)))
                    .collect(),
            ),
            other => Self::Scalar(Scalar::from_json(other)),
        }
    }

    /// Strictly positive numeric scalar.
    pub fn is_positive_number(&self) -> bool {
        match self {
            Self::Scalar(s) => s.as_f64().is_some_and(|v| v > 0.0),
            Self::Nested(_) => false,
        }
    }
}

/// A single raw measurement record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a JSON object. Non-object values yield `None`.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::from_map(map)),
            _ => None,
        }
    }

    fn from_map(map: Map<String, Value>) -> Self {
        Self {
            fields: map
                .into_iter()
                .map(|(k, v)| (k, FieldValue::from_json(v)))
                .collect(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Envelope metadata written by collectors alongside the data points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactMetadata {
    pub model: Option<String>,
    pub sequence: Option<String>,
    pub url: Option<String>,
    pub data_type: Option<String>,
    pub record_count: Option<u64>,
    pub timestamp: Option<String>,
}

/// A decoded raw artifact: metadata plus its object records.
#[derive(Debug, Clone, PartialEq)]
pub struct RawArtifact {
    /// Where the artifact came from (file name or collector label).
    pub label: String,
    pub metadata: ArtifactMetadata,
    pub records: Vec<Record>,
}

impl RawArtifact {
    /// Decode an envelope payload. Non-object elements of `data` are skipped.
    pub fn decode(label: impl Into<String>, payload: &[u8]) -> Result<Self> {
        let label = label.into();
        let value: Value = serde_json::from_slice(payload)?;
        let Value::Object(mut root) = value else {
            return Err(Error::dataset(format!("{label}: payload is not a JSON object")));
        };

        let metadata = match root.remove("metadata") {
            Some(meta @ Value::Object(_)) => serde_json::from_value(meta).map_err(|e| {
                Error::dataset(format!("{label}: malformed metadata: {e}"))
            })?,
            _ => ArtifactMetadata::default(),
        };

        let records = match root.remove("data") {
            Some(Value::Array(items)) => items.into_iter().filter_map(Record::from_json).collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            label,
            metadata,
            records,
        })
    }
}
