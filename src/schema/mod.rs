//! Declarative columnar schemas.
//!
//! A [`SchemaDef`] is a tagged, immutable description of a column tree:
//! primitives, groups, lists and maps, each with a required/optional
//! repetition and a small metadata flag set. Representing schemas as a
//! variant (rather than a trait hierarchy) keeps merging and projection a
//! matter of plain pattern matching.

pub mod arrow;

use snafu::prelude::*;

use crate::error::{EmptyProjectionSnafu, NotAGroupSnafu, SchemaError};
use crate::record::ColumnPath;

/// Metadata flags attached to a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaFlag {
    /// The schema was synthesized from a record's shape rather than
    /// specified by the user.
    Generated,
}

/// Physical storage type of a primitive column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalType {
    Boolean,
    Int32,
    Int64,
    Int96,
    Float,
    Double,
    Binary,
    FixedByteArray,
}

/// Logical annotation refining a physical type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    /// UTF-8 string stored as binary.
    String,
}

/// A recursive schema description.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDef {
    Primitive {
        physical: PhysicalType,
        logical: Option<LogicalType>,
        required: bool,
        byte_length: Option<usize>,
        flags: Vec<SchemaFlag>,
    },
    Group {
        fields: Vec<(String, SchemaDef)>,
        required: bool,
        flags: Vec<SchemaFlag>,
    },
    List {
        element: Box<SchemaDef>,
        required: bool,
        flags: Vec<SchemaFlag>,
    },
    Map {
        key: Box<SchemaDef>,
        value: Box<SchemaDef>,
        required: bool,
        flags: Vec<SchemaFlag>,
    },
}

impl SchemaDef {
    fn primitive(physical: PhysicalType) -> Self {
        SchemaDef::Primitive {
            physical,
            logical: None,
            required: false,
            byte_length: None,
            flags: Vec::new(),
        }
    }

    pub fn boolean() -> Self {
        Self::primitive(PhysicalType::Boolean)
    }

    pub fn int32() -> Self {
        Self::primitive(PhysicalType::Int32)
    }

    pub fn int64() -> Self {
        Self::primitive(PhysicalType::Int64)
    }

    pub fn int96() -> Self {
        Self::primitive(PhysicalType::Int96)
    }

    pub fn float() -> Self {
        Self::primitive(PhysicalType::Float)
    }

    pub fn double() -> Self {
        Self::primitive(PhysicalType::Double)
    }

    pub fn binary() -> Self {
        Self::primitive(PhysicalType::Binary)
    }

    /// UTF-8 string: binary with the string annotation.
    pub fn string() -> Self {
        SchemaDef::Primitive {
            physical: PhysicalType::Binary,
            logical: Some(LogicalType::String),
            required: false,
            byte_length: None,
            flags: Vec::new(),
        }
    }

    pub fn fixed_byte_array(byte_length: usize) -> Self {
        SchemaDef::Primitive {
            physical: PhysicalType::FixedByteArray,
            logical: None,
            required: false,
            byte_length: Some(byte_length),
            flags: Vec::new(),
        }
    }

    pub fn group(fields: Vec<(String, SchemaDef)>) -> Self {
        SchemaDef::Group {
            fields,
            required: false,
            flags: Vec::new(),
        }
    }

    pub fn list(element: SchemaDef) -> Self {
        SchemaDef::List {
            element: Box::new(element),
            required: false,
            flags: Vec::new(),
        }
    }

    /// Map keys are always required; the key schema is promoted if needed.
    pub fn map(key: SchemaDef, value: SchemaDef) -> Self {
        SchemaDef::Map {
            key: Box::new(key.required()),
            value: Box::new(value),
            required: false,
            flags: Vec::new(),
        }
    }

    /// Mark this node as required (non-nullable).
    pub fn required(mut self) -> Self {
        match &mut self {
            SchemaDef::Primitive { required, .. }
            | SchemaDef::Group { required, .. }
            | SchemaDef::List { required, .. }
            | SchemaDef::Map { required, .. } => *required = true,
        }
        self
    }

    pub fn is_required(&self) -> bool {
        match self {
            SchemaDef::Primitive { required, .. }
            | SchemaDef::Group { required, .. }
            | SchemaDef::List { required, .. }
            | SchemaDef::Map { required, .. } => *required,
        }
    }

    /// Attach a metadata flag.
    pub fn with_flag(mut self, flag: SchemaFlag) -> Self {
        let flags = match &mut self {
            SchemaDef::Primitive { flags, .. }
            | SchemaDef::Group { flags, .. }
            | SchemaDef::List { flags, .. }
            | SchemaDef::Map { flags, .. } => flags,
        };
        if !flags.contains(&flag) {
            flags.push(flag);
        }
        self
    }

    pub fn has_flag(&self, flag: SchemaFlag) -> bool {
        match self {
            SchemaDef::Primitive { flags, .. }
            | SchemaDef::Group { flags, .. }
            | SchemaDef::List { flags, .. }
            | SchemaDef::Map { flags, .. } => flags.contains(&flag),
        }
    }

    /// Build a group from named fields, deduplicating by name and keeping
    /// the first occurrence. Used when a projection names the same column
    /// via multiple paths.
    pub fn merge(fields: Vec<(String, SchemaDef)>) -> Self {
        let mut merged: Vec<(String, SchemaDef)> = Vec::with_capacity(fields.len());
        for (name, def) in fields {
            if !merged.iter().any(|(n, _)| *n == name) {
                merged.push((name, def));
            }
        }
        Self::group(merged)
    }

    /// Project this group schema without the given columns. Groups emptied
    /// by the removal are dropped; an empty result is an error.
    pub fn without_columns(&self, columns: &[ColumnPath]) -> Result<SchemaDef, SchemaError> {
        let SchemaDef::Group {
            fields,
            required,
            flags,
        } = self
        else {
            return NotAGroupSnafu.fail();
        };

        let mut fields = fields.clone();
        for column in columns {
            remove_path(&mut fields, column);
        }
        ensure!(!fields.is_empty(), EmptyProjectionSnafu);

        Ok(SchemaDef::Group {
            fields,
            required: *required,
            flags: flags.clone(),
        })
    }
}

/// Remove one dotted path from a field list, pruning emptied groups.
/// A path that does not resolve to a field is ignored.
fn remove_path(fields: &mut Vec<(String, SchemaDef)>, path: &ColumnPath) {
    let Some(idx) = fields.iter().position(|(n, _)| n == path.head()) else {
        return;
    };
    match path.tail() {
        None => {
            fields.remove(idx);
        }
        Some(tail) => {
            if let SchemaDef::Group { fields: inner, .. } = &mut fields[idx].1 {
                remove_path(inner, &tail);
                if inner.is_empty() {
                    fields.remove(idx);
                }
            }
        }
    }
}
