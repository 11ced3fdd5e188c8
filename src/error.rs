//! Error types for graupel using snafu.
//!
//! Each subsystem gets its own error enum; `WriteError` aggregates them at
//! the pipeline boundary.

use snafu::prelude::*;

// ============ Partition Errors ============

/// Errors raised while deriving a partition directory from a record.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PartitionError {
    /// A configured partition column does not exist in the record.
    #[snafu(display("missing field '{field}'"))]
    MissingField { field: String },

    /// A configured partition column resolved to a null value.
    #[snafu(display("null field '{field}'"))]
    NullField { field: String },

    /// A configured partition column is not a UTF-8 string leaf.
    #[snafu(display("non-string field '{field}'"))]
    NonStringField { field: String },

    /// A path component descended into a field that is not a group.
    #[snafu(display("cannot traverse non-group field '{field}'"))]
    NonGroupTraversal { field: String },
}

// ============ Schema Errors ============

/// Errors raised while resolving or materializing a schema.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SchemaError {
    /// Removing the partition columns left nothing to write.
    #[snafu(display("schema is empty after removing partition columns"))]
    EmptyProjection,

    /// The root of a resolved schema must be a group.
    #[snafu(display("top-level schema must be a group"))]
    NotAGroup,

    /// Fixed-length byte arrays need an explicit length.
    #[snafu(display("fixed_byte_array schema requires a byte length"))]
    MissingByteLength,
}

// ============ Encode Errors ============

/// Errors raised while converting records into Arrow columns.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EncodeError {
    /// A record value does not match the schema column type.
    #[snafu(display("column '{column}' expects {expected}, found {found}"))]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Arrow rejected the assembled columns.
    #[snafu(display("failed to assemble record batch"))]
    Arrow { source: arrow::error::ArrowError },
}

// ============ Write Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriteError {
    /// Partitioning rules violated.
    #[snafu(display("partitioning failed"))]
    Partition { source: PartitionError },

    /// Schema resolution or materialization failed.
    #[snafu(display("schema resolution failed"))]
    Schema { source: SchemaError },

    /// Record encoding failed.
    #[snafu(display("record encoding failed"))]
    Encode { source: EncodeError },

    /// Output directory or file could not be created.
    #[snafu(display("failed to create output file"))]
    Io { source: std::io::Error },

    /// The underlying parquet writer failed.
    #[snafu(display("parquet writer error"))]
    Parquet {
        source: parquet::errors::ParquetError,
    },

    /// A caller-supplied post-write handler failed.
    #[snafu(display("post-write handler failed"))]
    Handler {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The writer's file handle was not available (internal state error).
    #[snafu(display("partition writer is not available"))]
    WriterUnavailable,

    /// A blocking I/O task could not be joined.
    #[snafu(display("task join error"))]
    TaskJoin { source: tokio::task::JoinError },

    /// The event or output channel closed unexpectedly.
    #[snafu(display("channel closed unexpectedly"))]
    ChannelClosed,
}
