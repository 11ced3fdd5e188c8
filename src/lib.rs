//! graupel: a rotating, partitioned parquet sink for record streams.
//!
//! Records are pulled from a stream, split into a Hive-style partition
//! directory (`color=red/...`) and the remaining row, and appended to one
//! open parquet file per partition. Files rotate when a record-count or
//! wall-clock threshold is crossed, or when a post-write handler asks for
//! it; every rotation closes the file and the next write to that partition
//! opens a fresh one.
//!
//! # Example
//!
//! ```ignore
//! use futures::stream;
//! use graupel::{GenericWriterBuilder, Record, SchemaDef, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), graupel::WriteError> {
//!     let schema = SchemaDef::group(vec![
//!         ("id".into(), SchemaDef::int64()),
//!         ("color".into(), SchemaDef::string()),
//!     ]);
//!     let records = stream::iter((0..100).map(|i| {
//!         Record::new()
//!             .with_field("id", Value::Int64(i))
//!             .with_field("color", Value::string(if i % 2 == 0 { "red" } else { "blue" }))
//!     }));
//!
//!     let summary = GenericWriterBuilder::new("/data/out", schema)
//!         .partition_by(["color"])
//!         .max_count(10_000)
//!         .build()?
//!         .write_all(records)
//!         .await?;
//!     println!("wrote {} files", summary.files_written);
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod encode;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod sink;

// Re-export main types
pub use builder::{GenericWriterBuilder, RotatingWriter, TypedWriterBuilder};
pub use encode::{PassthroughCodec, RecordEncoder, SchemaResolver};
pub use error::{EncodeError, PartitionError, SchemaError, WriteError};
pub use pipeline::handler::{HandlerError, PostWriteContext, PostWriteHandler};
pub use pipeline::WriteSummary;
pub use record::{ColumnPath, Record, Value};
pub use schema::{LogicalType, PhysicalType, SchemaDef, SchemaFlag};
pub use sink::{Compression, WriterOptions};
