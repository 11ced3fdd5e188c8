//! Record to Arrow conversion.
//!
//! Buffered [`Record`] rows are converted into one [`RecordBatch`] per
//! flush, driven by the resolved [`SchemaDef`]. Columns are built
//! recursively so groups, lists and maps nest to arbitrary depth.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, FixedSizeBinaryBuilder, Float32Builder,
    Float64Builder, Int32Builder, Int64Builder, ListArray, MapArray, StringBuilder, StructArray,
    TimestampNanosecondBuilder,
};
use arrow::buffer::{BooleanBuffer, NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow::datatypes::{DataType, Field, SchemaRef};
use arrow::record_batch::RecordBatch;
use snafu::prelude::*;

use crate::error::{ArrowSnafu, EncodeError, SchemaError, TypeMismatchSnafu};
use crate::record::{ColumnPath, Record, Value};
use crate::schema::{LogicalType, PhysicalType, SchemaDef};
use crate::sink::WriterOptions;

/// Encodes one typed write item into a generic record.
pub trait RecordEncoder<W>: Send + Sync + 'static {
    fn encode(&self, item: &W, options: &WriterOptions) -> Result<Record, EncodeError>;
}

/// Resolves the schema the produced files will carry, with the partition
/// columns already removed.
pub trait SchemaResolver<W>: Send + Sync + 'static {
    fn resolve(&self, partition_columns: &[ColumnPath]) -> Result<SchemaDef, SchemaError>;
}

/// Identity codec for pipelines operating directly on generic records:
/// records are written as-is and the schema is the user-supplied one minus
/// the partition columns.
#[derive(Debug, Clone)]
pub struct PassthroughCodec {
    schema: SchemaDef,
}

impl PassthroughCodec {
    pub fn new(schema: SchemaDef) -> Self {
        Self { schema }
    }
}

impl RecordEncoder<Record> for PassthroughCodec {
    fn encode(&self, item: &Record, _options: &WriterOptions) -> Result<Record, EncodeError> {
        Ok(item.clone())
    }
}

impl SchemaResolver<Record> for PassthroughCodec {
    fn resolve(&self, partition_columns: &[ColumnPath]) -> Result<SchemaDef, SchemaError> {
        self.schema.without_columns(partition_columns)
    }
}

const JULIAN_DAY_OF_EPOCH: i64 = 2_440_588;
const NANOS_PER_DAY: i64 = 86_400_000_000_000;

/// Decode a legacy INT96 timestamp (nanos-of-day, Julian day) to
/// nanoseconds since the Unix epoch.
fn int96_to_nanos(raw: &[u8; 12]) -> i64 {
    let mut nanos = [0u8; 8];
    nanos.copy_from_slice(&raw[0..8]);
    let mut day = [0u8; 4];
    day.copy_from_slice(&raw[8..12]);

    let nanos_of_day = i64::from_le_bytes(nanos);
    let julian_day = i64::from(i32::from_le_bytes(day));
    (julian_day - JULIAN_DAY_OF_EPOCH) * NANOS_PER_DAY + nanos_of_day
}

/// Convert a slice of records into a batch over the resolved schema.
///
/// Missing fields and explicit nulls both become column nulls; Arrow
/// rejects the batch if that violates a required column.
pub fn to_record_batch(
    rows: &[Record],
    def: &SchemaDef,
    schema: &SchemaRef,
) -> Result<RecordBatch, EncodeError> {
    let SchemaDef::Group { fields, .. } = def else {
        return TypeMismatchSnafu {
            column: "<root>",
            expected: "group",
            found: "primitive",
        }
        .fail();
    };

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(fields.len());
    for ((name, field_def), field) in fields.iter().zip(schema.fields().iter()) {
        let cells: Vec<Option<&Value>> = rows
            .iter()
            .map(|row| row.get(name).filter(|value| !value.is_null()))
            .collect();
        columns.push(build_column(name, field_def, field, &cells)?);
    }

    RecordBatch::try_new(schema.clone(), columns).context(ArrowSnafu)
}

fn mismatch(column: &str, expected: &'static str, value: &Value) -> EncodeError {
    TypeMismatchSnafu {
        column,
        expected,
        found: value.type_name(),
    }
    .build()
}

/// Build one column from per-row cells. `None` cells are nulls.
fn build_column(
    name: &str,
    def: &SchemaDef,
    field: &Field,
    cells: &[Option<&Value>],
) -> Result<ArrayRef, EncodeError> {
    match def {
        SchemaDef::Primitive {
            physical,
            logical,
            byte_length,
            ..
        } => build_primitive(name, *physical, *logical, *byte_length, cells),
        SchemaDef::Group {
            fields: child_defs, ..
        } => build_struct(name, child_defs, field, cells),
        SchemaDef::List { element, .. } => build_list(name, element, field, cells),
        SchemaDef::Map { key, value, .. } => build_map(name, key, value, field, cells),
    }
}

fn build_primitive(
    name: &str,
    physical: PhysicalType,
    logical: Option<LogicalType>,
    byte_length: Option<usize>,
    cells: &[Option<&Value>],
) -> Result<ArrayRef, EncodeError> {
    match physical {
        PhysicalType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Some(Value::Boolean(v)) => builder.append_value(*v),
                    Some(other) => return Err(mismatch(name, "boolean", other)),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        PhysicalType::Int32 => {
            let mut builder = Int32Builder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Some(Value::Int32(v)) => builder.append_value(*v),
                    Some(other) => return Err(mismatch(name, "int32", other)),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        PhysicalType::Int64 => {
            let mut builder = Int64Builder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Some(Value::Int64(v)) => builder.append_value(*v),
                    Some(other) => return Err(mismatch(name, "int64", other)),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        PhysicalType::Int96 => {
            let mut builder = TimestampNanosecondBuilder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Some(Value::Int96(raw)) => builder.append_value(int96_to_nanos(raw)),
                    Some(other) => return Err(mismatch(name, "int96", other)),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        PhysicalType::Float => {
            let mut builder = Float32Builder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Some(Value::Float(v)) => builder.append_value(*v),
                    Some(other) => return Err(mismatch(name, "float", other)),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        PhysicalType::Double => {
            let mut builder = Float64Builder::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Some(Value::Double(v)) => builder.append_value(*v),
                    Some(other) => return Err(mismatch(name, "double", other)),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        PhysicalType::Binary => match logical {
            Some(LogicalType::String) => {
                let mut builder = StringBuilder::with_capacity(cells.len(), cells.len() * 16);
                for cell in cells {
                    match cell {
                        Some(value @ Value::Binary(bytes)) => match std::str::from_utf8(bytes) {
                            Ok(text) => builder.append_value(text),
                            Err(_) => return Err(mismatch(name, "utf-8 string", value)),
                        },
                        Some(other) => return Err(mismatch(name, "utf-8 string", other)),
                        None => builder.append_null(),
                    }
                }
                Ok(Arc::new(builder.finish()))
            }
            None => {
                let mut builder = BinaryBuilder::with_capacity(cells.len(), cells.len() * 16);
                for cell in cells {
                    match cell {
                        Some(Value::Binary(bytes)) => builder.append_value(bytes),
                        Some(other) => return Err(mismatch(name, "binary", other)),
                        None => builder.append_null(),
                    }
                }
                Ok(Arc::new(builder.finish()))
            }
        },
        PhysicalType::FixedByteArray => {
            let width = byte_length.unwrap_or_default() as i32;
            let mut builder = FixedSizeBinaryBuilder::new(width);
            for cell in cells {
                match cell {
                    Some(Value::Binary(bytes)) => {
                        builder.append_value(bytes).context(ArrowSnafu)?;
                    }
                    Some(other) => return Err(mismatch(name, "fixed-length binary", other)),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
    }
}

fn build_struct(
    name: &str,
    child_defs: &[(String, SchemaDef)],
    field: &Field,
    cells: &[Option<&Value>],
) -> Result<ArrayRef, EncodeError> {
    let DataType::Struct(child_fields) = field.data_type() else {
        return TypeMismatchSnafu {
            column: name,
            expected: "struct",
            found: "other",
        }
        .fail();
    };

    let mut groups: Vec<Option<&Record>> = Vec::with_capacity(cells.len());
    for cell in cells {
        match cell {
            Some(Value::Group(record)) => groups.push(Some(record)),
            Some(other) => return Err(mismatch(name, "group", other)),
            None => groups.push(None),
        }
    }

    let mut child_arrays: Vec<ArrayRef> = Vec::with_capacity(child_defs.len());
    for ((child_name, child_def), child_field) in child_defs.iter().zip(child_fields.iter()) {
        let child_cells: Vec<Option<&Value>> = groups
            .iter()
            .map(|group| {
                group
                    .and_then(|record| record.get(child_name))
                    .filter(|value| !value.is_null())
            })
            .collect();
        child_arrays.push(build_column(child_name, child_def, child_field, &child_cells)?);
    }

    let validity: Vec<bool> = groups.iter().map(Option::is_some).collect();
    let nulls = NullBuffer::new(BooleanBuffer::from(validity));
    let array = StructArray::try_new(child_fields.clone(), child_arrays, Some(nulls))
        .context(ArrowSnafu)?;
    Ok(Arc::new(array))
}

fn build_list(
    name: &str,
    element_def: &SchemaDef,
    field: &Field,
    cells: &[Option<&Value>],
) -> Result<ArrayRef, EncodeError> {
    let DataType::List(element_field) = field.data_type() else {
        return TypeMismatchSnafu {
            column: name,
            expected: "list",
            found: "other",
        }
        .fail();
    };

    let mut offsets: Vec<i32> = Vec::with_capacity(cells.len() + 1);
    offsets.push(0);
    let mut validity: Vec<bool> = Vec::with_capacity(cells.len());
    let mut flat: Vec<Option<&Value>> = Vec::new();

    for cell in cells {
        match cell {
            Some(Value::List(items)) => {
                for item in items {
                    flat.push(Some(item).filter(|value| !value.is_null()));
                }
                validity.push(true);
            }
            Some(other) => return Err(mismatch(name, "list", other)),
            None => validity.push(false),
        }
        offsets.push(flat.len() as i32);
    }

    let values = build_column("element", element_def, element_field, &flat)?;
    let nulls = NullBuffer::new(BooleanBuffer::from(validity));
    let array = ListArray::try_new(
        element_field.clone(),
        OffsetBuffer::new(ScalarBuffer::from(offsets)),
        values,
        Some(nulls),
    )
    .context(ArrowSnafu)?;
    Ok(Arc::new(array))
}

fn build_map(
    name: &str,
    key_def: &SchemaDef,
    value_def: &SchemaDef,
    field: &Field,
    cells: &[Option<&Value>],
) -> Result<ArrayRef, EncodeError> {
    let DataType::Map(entries_field, _) = field.data_type() else {
        return TypeMismatchSnafu {
            column: name,
            expected: "map",
            found: "other",
        }
        .fail();
    };
    let DataType::Struct(entry_fields) = entries_field.data_type() else {
        return TypeMismatchSnafu {
            column: name,
            expected: "map entries struct",
            found: "other",
        }
        .fail();
    };

    let mut offsets: Vec<i32> = Vec::with_capacity(cells.len() + 1);
    offsets.push(0);
    let mut validity: Vec<bool> = Vec::with_capacity(cells.len());
    let mut flat_keys: Vec<Option<&Value>> = Vec::new();
    let mut flat_values: Vec<Option<&Value>> = Vec::new();

    for cell in cells {
        match cell {
            Some(Value::Map(pairs)) => {
                for (key, value) in pairs {
                    flat_keys.push(Some(key).filter(|v| !v.is_null()));
                    flat_values.push(Some(value).filter(|v| !v.is_null()));
                }
                validity.push(true);
            }
            Some(other) => return Err(mismatch(name, "map", other)),
            None => validity.push(false),
        }
        offsets.push(flat_keys.len() as i32);
    }

    let keys = build_column("key", key_def, &entry_fields[0], &flat_keys)?;
    let values = build_column("value", value_def, &entry_fields[1], &flat_values)?;
    let entries =
        StructArray::try_new(entry_fields.clone(), vec![keys, values], None).context(ArrowSnafu)?;
    let nulls = NullBuffer::new(BooleanBuffer::from(validity));
    let array = MapArray::try_new(
        entries_field.clone(),
        OffsetBuffer::new(ScalarBuffer::from(offsets)),
        entries,
        Some(nulls),
        false,
    )
    .context(ArrowSnafu)?;
    Ok(Arc::new(array))
}
