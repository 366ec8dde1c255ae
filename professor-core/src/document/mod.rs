//! Document model for captured profiler records
//!
//! A [`Document`] is an ordered map of string keys to [`Value`]s. Values form a
//! closed set of kinds ([`ValueKind`]); anything the model does not recognize
//! is carried as [`Value::Foreign`] so that the fingerprinting and key-escaping
//! passes can reject it by name instead of silently mangling it.
//!
//! Key order is insertion order. It is preserved for display and storage but
//! carries no meaning for shape fingerprints.

pub mod codec;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// Deepest document nesting accepted by the recursive passes.
///
/// Matches the nesting limit of the monitored database's own document format.
pub const MAX_DEPTH: usize = 100;

/// Returns an error when `depth` exceeds [`MAX_DEPTH`].
pub(crate) fn check_depth(depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::NestingTooDeep { limit: MAX_DEPTH });
    }
    Ok(())
}

/// A single value inside a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    /// 12-byte unique identifier
    ObjectId([u8; 12]),
    Regex {
        pattern: String,
        options: String,
    },
    Binary {
        subtype: u8,
        bytes: Vec<u8>,
    },
    /// Server-side code blob
    Code(String),
    /// Reference to a document in another collection
    Reference {
        collection: String,
        id: Box<Value>,
    },
    Document(Document),
    Array(Vec<Value>),
    /// A value whose runtime type is outside the recognized set.
    ///
    /// Holds the name of the observed type. Every recursive pass fails on it.
    Foreign(String),
}

/// The kind of a [`Value`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Timestamp,
    ObjectId,
    Regex,
    Binary,
    Code,
    Reference,
    Document,
    Array,
    Foreign,
}

impl ValueKind {
    /// Returns the identifier used in error messages and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Timestamp => "timestamp",
            ValueKind::ObjectId => "objectid",
            ValueKind::Regex => "regex",
            ValueKind::Binary => "binary",
            ValueKind::Code => "code",
            ValueKind::Reference => "reference",
            ValueKind::Document => "document",
            ValueKind::Array => "array",
            ValueKind::Foreign => "foreign",
        }
    }

    /// Whether values of this kind hold nested values.
    pub fn is_container(&self) -> bool {
        matches!(self, ValueKind::Document | ValueKind::Array)
    }

    /// Whether this kind belongs to the recognized type set.
    pub fn is_supported(&self) -> bool {
        !matches!(self, ValueKind::Foreign)
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Value {
    /// Returns the kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::ObjectId(_) => ValueKind::ObjectId,
            Value::Regex { .. } => ValueKind::Regex,
            Value::Binary { .. } => ValueKind::Binary,
            Value::Code(_) => ValueKind::Code,
            Value::Reference { .. } => ValueKind::Reference,
            Value::Document(_) => ValueKind::Document,
            Value::Array(_) => ValueKind::Array,
            Value::Foreign(_) => ValueKind::Foreign,
        }
    }

    /// Name of the runtime type, as reported in [`Error::UnsupportedType`].
    pub fn type_name(&self) -> &str {
        match self {
            Value::Foreign(name) => name,
            other => other.kind().as_str(),
        }
    }

    /// Check that a scalar value belongs to the recognized type set.
    ///
    /// Containers are not descended into; callers walking a structure handle
    /// them. A reference is accepted only when its id is itself a plain scalar.
    pub(crate) fn check_scalar(&self) -> Result<()> {
        match self {
            Value::Foreign(name) => Err(Error::UnsupportedType(name.clone())),
            Value::Reference { id, .. } => match id.kind() {
                ValueKind::Reference | ValueKind::Document | ValueKind::Array => Err(
                    Error::UnsupportedType(format!("reference id {}", id.type_name())),
                ),
                _ => id.check_scalar(),
            },
            _ => Ok(()),
        }
    }

    /// Validate that this value and everything nested in it belongs to the
    /// recognized type set.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(0)
    }

    fn validate_at(&self, depth: usize) -> Result<()> {
        match self {
            Value::Document(doc) => doc.validate_at(depth + 1),
            Value::Array(items) => {
                check_depth(depth + 1)?;
                items.iter().try_for_each(|v| v.validate_at(depth + 1))
            }
            scalar => scalar.check_scalar(),
        }
    }

    /// Returns the nested document, if this value is one
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// Returns the string payload, if this value is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
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

/// Plain JSON maps directly onto the model: objects become documents, integral
/// numbers become `Int` (falling back to `Float` outside the i64 range).
///
/// No tag interpretation happens here; see [`codec`] for the storage format.
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Document(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// An ordered map with unique string keys.
///
/// Equality compares entries in order: `{a, b}` and `{b, a}` are different
/// documents.
#[derive(Debug, Clone, Default)]
pub struct Document {
    entries: IndexMap<String, Value>,
}

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous value for the key.
    ///
    /// Replacing an existing key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns the nested document stored under `key`, if any.
    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Value::as_document)
    }

    /// Remove a key, keeping the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Value> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Validate every value in the document against the recognized type set.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(0)
    }

    fn validate_at(&self, depth: usize) -> Result<()> {
        check_depth(depth)?;
        self.entries
            .values()
            .try_for_each(|v| v.validate_at(depth))
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Convert a JSON object into a document.
///
/// Non-object JSON yields an empty document.
impl From<serde_json::Value> for Document {
    fn from(v: serde_json::Value) -> Self {
        match Value::from(v) {
            Value::Document(doc) => doc,
            _ => Document::new(),
        }
    }
}
