//! Canonical scalar value representation shared by parameters, records, and rows.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Typed value tagged with explicit type information so bound parameters stay
/// unambiguous whatever executor receives them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Signed 64-bit integer literal.
    Int(i64),
    /// 64-bit floating point literal.
    Float(f64),
    /// UTF-8 string literal.
    String(String),
    /// Arbitrary binary payload represented as bytes.
    Bytes(Vec<u8>),
    /// Nanoseconds since Unix epoch in UTC.
    DateTime(i128),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "'{v}'"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::DateTime(v) => write!(f, "@{v}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Explicit SQL type hint attached to a bound parameter or column.
///
/// Temporal hints decide how a [`Value::DateTime`] is rendered when the
/// executor has no native timestamp type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    Date,
    Time,
    Timestamp,
}

/// Parameter as it appears in a compiled statement's parameter list.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundParam {
    /// Value to bind.
    pub value: Value,
    /// Optional type hint from the column or the caller.
    pub hint: Option<SqlType>,
}

impl BoundParam {
    /// Creates a parameter without a type hint.
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            hint: None,
        }
    }

    /// Creates a parameter with an explicit type hint.
    pub fn typed(value: impl Into<Value>, hint: SqlType) -> Self {
        Self {
            value: value.into(),
            hint: Some(hint),
        }
    }
}

/// An entity instance: the values of one row keyed by column name.
///
/// Records are what callers hand to insert/update/delete builders and what a
/// session materializes for a root-entity projection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Entity name the record belongs to.
    pub entity: String,
    /// Column values.
    pub values: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty record for the entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            values: BTreeMap::new(),
        }
    }

    /// Sets a column value, returning the updated record.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// Sets a column value in place.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    /// Looks up a column value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }
}
