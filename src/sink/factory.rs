//! Per-partition parquet file writers.
//!
//! A [`PartitionWriter`] owns one open file for one partition directory,
//! together with the rows not yet cut into a row group, the running record
//! count, and the rotation timer scheduled at creation. File open, row
//! group writes and close all run on the blocking pool; those futures run
//! to completion even when the caller is dropped, so a file handle is
//! never left open by cancellation.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use snafu::prelude::*;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::WriterOptions;
use crate::encode;
use crate::error::{
    EncodeSnafu, IoSnafu, ParquetSnafu, TaskJoinSnafu, WriteError, WriterUnavailableSnafu,
};
use crate::record::Record;
use crate::schema::SchemaDef;

/// An open parquet file bound to one partition directory.
pub(crate) struct FileSink {
    writer: ArrowWriter<File>,
    path: PathBuf,
}

impl FileSink {
    /// Blocking: creates the directory, the file and the arrow writer.
    fn open(dir: &Path, schema: SchemaRef, options: &WriterOptions) -> Result<Self, WriteError> {
        std::fs::create_dir_all(dir).context(IoSnafu)?;
        let file_name = format!(
            "{}{}.parquet",
            Uuid::now_v7(),
            options.compression.extension()
        );
        let path = dir.join(file_name);
        let file = File::create(&path).context(IoSnafu)?;
        let writer = ArrowWriter::try_new(file, schema, Some(options.writer_properties()))
            .context(ParquetSnafu)?;
        debug!(path = %path.display(), "opened parquet file");
        Ok(Self { writer, path })
    }

    /// Blocking: append one row group.
    fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), WriteError> {
        self.writer.write(batch).context(ParquetSnafu)
    }

    /// Blocking: finalize the footer and release the handle.
    fn close(self) -> Result<(), WriteError> {
        self.writer.close().context(ParquetSnafu)?;
        debug!(path = %self.path.display(), "closed parquet file");
        Ok(())
    }
}

/// One partition's live writer.
pub(crate) struct PartitionWriter {
    dir: PathBuf,
    sink: Option<FileSink>,
    def: Arc<SchemaDef>,
    schema: SchemaRef,
    buffered: Vec<Record>,
    record_count: usize,
    timer: JoinHandle<()>,
}

/// Open a writer for `dir` and schedule its rotation timer.
///
/// The timer is spawned only after the file handle exists, so a live
/// writer always has a scheduled disposer; if the open fails, no timer
/// and no registry entry are ever created.
pub(crate) async fn open_partition_writer(
    dir: PathBuf,
    def: Arc<SchemaDef>,
    schema: SchemaRef,
    options: WriterOptions,
    schedule_rotation: impl FnOnce(PathBuf) -> JoinHandle<()>,
) -> Result<PartitionWriter, WriteError> {
    let open_dir = dir.clone();
    let open_schema = schema.clone();
    let sink =
        tokio::task::spawn_blocking(move || FileSink::open(&open_dir, open_schema, &options))
            .await
            .context(TaskJoinSnafu)??;
    let timer = schedule_rotation(dir.clone());

    Ok(PartitionWriter {
        dir,
        sink: Some(sink),
        def,
        schema,
        buffered: Vec::new(),
        record_count: 0,
        timer,
    })
}

impl PartitionWriter {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records accepted by this file, buffered rows included.
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Accept one record into the row buffer.
    pub fn push(&mut self, record: Record) {
        self.buffered.push(record);
        self.record_count += 1;
    }

    /// Cut the buffered rows into a row group on the blocking pool.
    pub async fn flush(&mut self) -> Result<(), WriteError> {
        if self.buffered.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.buffered);
        let batch = encode::to_record_batch(&rows, &self.def, &self.schema).context(EncodeSnafu)?;
        let mut sink = self.sink.take().context(WriterUnavailableSnafu)?;

        let (sink, result) = tokio::task::spawn_blocking(move || {
            let result = sink.write_batch(&batch);
            (sink, result)
        })
        .await
        .context(TaskJoinSnafu)?;
        self.sink = Some(sink);
        result
    }

    /// Cancel the rotation timer, flush remaining rows and close the file.
    ///
    /// The timer is cancelled first so a disposed writer can no longer
    /// enqueue rotations for its partition.
    pub async fn dispose(mut self) -> Result<(), WriteError> {
        self.timer.abort();

        let rows = std::mem::take(&mut self.buffered);
        let batch = if rows.is_empty() {
            None
        } else {
            Some(encode::to_record_batch(&rows, &self.def, &self.schema).context(EncodeSnafu)?)
        };
        let sink = self.sink.take().context(WriterUnavailableSnafu)?;
        debug!(
            path = %sink.path.display(),
            records = self.record_count,
            "rotating parquet file"
        );

        tokio::task::spawn_blocking(move || {
            let mut sink = sink;
            if let Some(batch) = &batch {
                sink.write_batch(batch)?;
            }
            sink.close()
        })
        .await
        .context(TaskJoinSnafu)?
    }
}
