//! Generic in-memory records.
//!
//! A [`Record`] is the row representation every writer operates on: an
//! order-preserving mapping from field name to a tagged [`Value`]. Typed
//! rows are converted into records by a
//! [`RecordEncoder`](crate::encode::RecordEncoder) before they reach a file.

mod path;

pub use path::ColumnPath;

use crate::error::{NonGroupTraversalSnafu, PartitionError};

/// A tagged value held by a record field.
///
/// Equality is structural. Floating-point variants compare by value, so
/// records containing NaN are never equal to themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    /// Raw bytes; also the carrier for UTF-8 strings.
    Binary(Vec<u8>),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    /// A nested record.
    Group(Record),
    /// An ordered sequence of values.
    List(Vec<Value>),
    /// An ordered sequence of key/value pairs.
    Map(Vec<(Value, Value)>),
    /// A 12-byte legacy timestamp: nanos-of-day followed by a Julian day.
    Int96([u8; 12]),
}

impl Value {
    /// A UTF-8 string value.
    pub fn string(s: impl Into<String>) -> Self {
        Value::Binary(s.into().into_bytes())
    }

    /// View a binary value as UTF-8, if it decodes.
    pub fn as_utf8(&self) -> Option<&str> {
        match self {
            Value::Binary(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Binary(_) => "binary",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Boolean(_) => "boolean",
            Value::Group(_) => "group",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Int96(_) => "int96",
        }
    }
}

/// An order-preserving mapping from field name to value.
///
/// Field order follows insertion order; the schema defines the canonical
/// order and records are expected to obey it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordered builder-style insertion.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    /// Replace an existing field in place, or append a new one.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Remove the field addressed by `path`, descending through nested
    /// groups. Returns the removed value, or `None` when the leaf does not
    /// exist. A group emptied by the removal is dropped from its parent.
    ///
    /// Fails when an intermediate path component resolves to a non-group
    /// value.
    pub fn remove(&mut self, path: &ColumnPath) -> Result<Option<Value>, PartitionError> {
        let head = path.head();
        let position = self.fields.iter().position(|(n, _)| n == head);

        match path.tail() {
            None => Ok(position.map(|idx| self.fields.remove(idx).1)),
            Some(tail) => {
                let Some(idx) = position else {
                    return Ok(None);
                };
                match &mut self.fields[idx].1 {
                    Value::Group(inner) => {
                        let removed = inner.remove(&tail)?;
                        if inner.is_empty() {
                            self.fields.remove(idx);
                        }
                        Ok(removed)
                    }
                    _ => NonGroupTraversalSnafu { field: head }.fail(),
                }
            }
        }
    }
}

impl From<Vec<(String, Value)>> for Record {
    fn from(fields: Vec<(String, Value)>) -> Self {
        let mut record = Record::new();
        for (name, value) in fields {
            record.insert(name, value);
        }
        record
    }
}
