//! Partition derivation: field extraction and removal.
//!
//! The inverse of reading Hive-style paths: partition values are taken out
//! of the record and written into the directory name as `field=value`
//! segments, in the order the columns were configured.

use std::path::{Path, PathBuf};

use crate::error::{MissingFieldSnafu, NonStringFieldSnafu, NullFieldSnafu, PartitionError};
use crate::record::{ColumnPath, Record, Value};

/// Split a record into its partition directory and the remaining record.
///
/// Each configured column must resolve to a UTF-8 string leaf. The value is
/// placed literally in the path segment; callers must keep partition
/// values free of path separators.
pub(crate) fn split(
    mut record: Record,
    base: &Path,
    columns: &[ColumnPath],
) -> Result<(PathBuf, Record), PartitionError> {
    let mut dir = base.to_path_buf();
    for column in columns {
        match record.remove(column)? {
            None => return MissingFieldSnafu { field: column.to_string() }.fail(),
            Some(Value::Null) => return NullFieldSnafu { field: column.to_string() }.fail(),
            Some(value @ Value::Binary(_)) => match value.as_utf8() {
                Some(text) => dir.push(format!("{column}={text}")),
                None => return NonStringFieldSnafu { field: column.to_string() }.fail(),
            },
            Some(_) => return NonStringFieldSnafu { field: column.to_string() }.fail(),
        }
    }
    Ok((dir, record))
}
