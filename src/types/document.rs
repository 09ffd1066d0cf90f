//! Structured documents carried through the pipeline.
//!
//! Catalog payloads, repository entities and dead-letter messages are all
//! represented as a [`Document`]: an ordered map from field name to [`Value`].
//! Documents are validated when an entity is built from them, never trusted
//! implicitly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{PipelineError, PipelineResult};

/// A single document field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// Nested document.
    Document(Document),
}

impl Value {
    /// Returns the integer, if this is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the nested document, if this is one.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the array, if this is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Document(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

/// An ordered map of field names to values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, Value>);

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a field, returning the document for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Returns the value of a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns true if the field is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Returns a required integer field.
    pub fn require_i64(&self, key: &str) -> PipelineResult<i64> {
        match self.get(key) {
            Some(value) => value
                .as_i64()
                .ok_or_else(|| PipelineError::invalid_field(key, "expected an integer")),
            None => Err(PipelineError::invalid_field(key, "missing required field")),
        }
    }

    /// Returns a required string field.
    pub fn require_str(&self, key: &str) -> PipelineResult<&str> {
        match self.get(key) {
            Some(value) => value
                .as_str()
                .ok_or_else(|| PipelineError::invalid_field(key, "expected a string")),
            None => Err(PipelineError::invalid_field(key, "missing required field")),
        }
    }

    /// Returns a required nested document field.
    pub fn require_document(&self, key: &str) -> PipelineResult<&Document> {
        match self.get(key) {
            Some(value) => value
                .as_document()
                .ok_or_else(|| PipelineError::invalid_field(key, "expected an object")),
            None => Err(PipelineError::invalid_field(key, "missing required field")),
        }
    }

    /// Returns the document's `id` field rendered as a string, if present.
    ///
    /// Catalog items carry numeric ids while children carry UUID strings.
    pub fn id_string(&self) -> Option<String> {
        match self.get("id")? {
            Value::Integer(id) => Some(id.to_string()),
            Value::String(id) => Some(id.clone()),
            _ => None,
        }
    }

    /// Converts to a `serde_json::Value`.
    pub fn to_json(&self) -> PipelineResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Builds a document from a JSON value, which must be an object.
    pub fn from_json(value: serde_json::Value) -> PipelineResult<Self> {
        if !value.is_object() {
            return Err(PipelineError::Serialization {
                message: "expected a JSON object".to_string(),
            });
        }
        Ok(serde_json::from_value(value)?)
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
