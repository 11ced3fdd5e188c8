//! Materialization of [`SchemaDef`] trees into Arrow schemas.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Fields, Schema, TimeUnit};
use snafu::prelude::*;

use super::{LogicalType, PhysicalType, SchemaDef};
use crate::error::{MissingByteLengthSnafu, NotAGroupSnafu, SchemaError};

/// Lower a resolved group schema into an Arrow [`Schema`].
pub fn to_arrow_schema(def: &SchemaDef) -> Result<Schema, SchemaError> {
    let SchemaDef::Group { fields, .. } = def else {
        return NotAGroupSnafu.fail();
    };
    let fields = fields
        .iter()
        .map(|(name, field_def)| to_arrow_field(name, field_def))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Schema::new(fields))
}

/// Materialize one named field description.
///
/// INT96 carries a Julian-day timestamp and surfaces as a nanosecond
/// timestamp column; the raw bytes are decoded during encoding.
pub fn to_arrow_field(name: &str, def: &SchemaDef) -> Result<Field, SchemaError> {
    let nullable = !def.is_required();
    let data_type = match def {
        SchemaDef::Primitive {
            physical,
            logical,
            byte_length,
            ..
        } => match physical {
            PhysicalType::Boolean => DataType::Boolean,
            PhysicalType::Int32 => DataType::Int32,
            PhysicalType::Int64 => DataType::Int64,
            PhysicalType::Int96 => DataType::Timestamp(TimeUnit::Nanosecond, None),
            PhysicalType::Float => DataType::Float32,
            PhysicalType::Double => DataType::Float64,
            PhysicalType::Binary => match logical {
                Some(LogicalType::String) => DataType::Utf8,
                None => DataType::Binary,
            },
            PhysicalType::FixedByteArray => {
                let length = (*byte_length).context(MissingByteLengthSnafu)?;
                DataType::FixedSizeBinary(length as i32)
            }
        },
        SchemaDef::Group { fields, .. } => {
            let fields = fields
                .iter()
                .map(|(child_name, child)| to_arrow_field(child_name, child))
                .collect::<Result<Vec<_>, _>>()?;
            DataType::Struct(Fields::from(fields))
        }
        SchemaDef::List { element, .. } => {
            DataType::List(Arc::new(to_arrow_field("element", element)?))
        }
        SchemaDef::Map { key, value, .. } => {
            let entries = Field::new(
                "entries",
                DataType::Struct(Fields::from(vec![
                    to_arrow_field("key", key)?,
                    to_arrow_field("value", value)?,
                ])),
                false,
            );
            DataType::Map(Arc::new(entries), false)
        }
    };
    Ok(Field::new(name, data_type, nullable))
}
