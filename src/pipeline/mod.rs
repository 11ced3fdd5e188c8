//! The rotating-writer event loop.
//!
//! A single task pulls chunks of events off one queue and folds them into
//! ordered segments: runs of data writes, each followed by the rotations
//! requested while that run was queued. Within a chunk every data write
//! lands before any rotation from the same chunk; across chunks the queue
//! is strictly FIFO. Rotation timers and the upstream producer only ever
//! talk to the loop through the queue, so the writer registry needs no
//! further synchronization.

pub(crate) mod events;
pub mod handler;
pub(crate) mod partition;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::SchemaRef;
use snafu::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::encode::RecordEncoder;
use crate::error::{
    ChannelClosedSnafu, EncodeSnafu, HandlerSnafu, PartitionSnafu, WriteError,
    WriterUnavailableSnafu,
};
use crate::record::ColumnPath;
use crate::schema::SchemaDef;
use crate::sink::factory::{open_partition_writer, PartitionWriter};
use crate::sink::registry::WriterRegistry;
use crate::sink::WriterOptions;
use events::Event;
use handler::{PostWriteContext, PostWriteHandler};

/// Statistics about a completed write pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteSummary {
    /// Source records consumed from upstream.
    pub records_processed: usize,
    /// Write items produced by the transformation and written.
    pub items_written: usize,
    /// Parquet files closed.
    pub files_written: usize,
}

/// A run of data events and the rotations that followed it in the chunk.
struct Segment<T, W> {
    data: Vec<(Vec<W>, T)>,
    rotations: Vec<PathBuf>,
}

impl<T, W> Segment<T, W> {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            rotations: Vec::new(),
        }
    }
}

/// The loop's state: configuration plus the live writer set.
pub(crate) struct EventLoop<T, W> {
    pub base_path: PathBuf,
    pub max_count: usize,
    pub max_duration: Duration,
    pub chunk_size: usize,
    pub partition_columns: Vec<ColumnPath>,
    pub options: WriterOptions,
    pub encoder: Arc<dyn RecordEncoder<W>>,
    pub schema_def: Arc<SchemaDef>,
    pub arrow_schema: SchemaRef,
    pub handler: Option<PostWriteHandler<T>>,
    pub registry: WriterRegistry,
    /// Clone handed to every rotation timer.
    pub events_tx: mpsc::Sender<Event<T, W>>,
    /// Downstream passthrough; `None` when the caller only drains.
    pub out: Option<mpsc::Sender<T>>,
    pub summary: WriteSummary,
}

impl<T, W> EventLoop<T, W>
where
    T: Clone + Send + Sync + 'static,
    W: Send + 'static,
{
    /// Drive the loop to completion. The registry is disposed on every
    /// terminal path, success or failure, before the result is returned.
    pub async fn run(mut self, rx: mpsc::Receiver<Event<T, W>>) -> Result<WriteSummary, WriteError> {
        info!(base = %self.base_path.display(), "starting rotating writer");
        let outcome = self.process(rx).await;
        let disposed = self.dispose_all().await;

        match outcome.and(disposed) {
            Ok(()) => {
                info!(
                    records = self.summary.records_processed,
                    files = self.summary.files_written,
                    "rotating writer finished"
                );
                Ok(self.summary)
            }
            Err(error) => Err(error),
        }
    }

    async fn process(&mut self, mut rx: mpsc::Receiver<Event<T, W>>) -> Result<(), WriteError> {
        let mut buf: Vec<Event<T, W>> = Vec::with_capacity(self.chunk_size);

        loop {
            buf.clear();
            let received = rx.recv_many(&mut buf, self.chunk_size.max(1)).await;
            if received == 0 {
                // every sender is gone; nothing more can arrive
                return Ok(());
            }

            // Fold the chunk: data runs, each closed by the rotations that
            // were queued behind it. Everything after Stop is ignored.
            let mut segments: Vec<Segment<T, W>> = vec![Segment::new()];
            let mut terminal = false;
            for event in buf.drain(..) {
                match event {
                    Event::Data { items, source } => {
                        if segments.last().is_some_and(|s| !s.rotations.is_empty()) {
                            segments.push(Segment::new());
                        }
                        if let Some(segment) = segments.last_mut() {
                            segment.data.push((items, source));
                        }
                    }
                    Event::Rotate { partition } => {
                        if let Some(segment) = segments.last_mut() {
                            segment.rotations.push(partition);
                        }
                    }
                    Event::Stop => {
                        terminal = true;
                        break;
                    }
                }
            }

            let mut touched: HashMap<PathBuf, usize> = HashMap::new();
            let segment_count = segments.len();
            let mut trailing: Vec<T> = Vec::new();

            for (idx, segment) in segments.into_iter().enumerate() {
                let last = idx + 1 == segment_count;

                let mut sources = Vec::with_capacity(segment.data.len());
                for (items, source) in segment.data {
                    for item in items {
                        self.write_item(item, &mut touched).await?;
                    }
                    sources.push(source);
                    self.summary.records_processed += 1;
                }
                self.flush_buffered().await?;

                // a segment closed by rotations emits before they run;
                // only an open trailing segment reaches the post-write
                // handler
                if last && segment.rotations.is_empty() {
                    trailing = sources;
                } else {
                    for source in sources {
                        self.emit(source).await?;
                    }
                }

                for partition in segment.rotations {
                    self.rotate(&partition).await?;
                }
            }

            // the chunk reaches downstream before the handler observes it
            let processed = if self.handler.is_some() {
                trailing.clone()
            } else {
                Vec::new()
            };
            for source in trailing {
                self.emit(source).await?;
            }

            if let Some(handler) = self.handler.clone() {
                let context = PostWriteContext::new(&processed, &touched);
                handler(&context).context(HandlerSnafu)?;
                for partition in context.into_flush_requests() {
                    self.rotate(&partition).await?;
                }
            }

            if terminal {
                return Ok(());
            }
        }
    }

    /// Encode, partition and buffer one write item, rotating its partition
    /// when the record-count threshold is crossed.
    async fn write_item(
        &mut self,
        item: W,
        touched: &mut HashMap<PathBuf, usize>,
    ) -> Result<(), WriteError> {
        let record = self
            .encoder
            .encode(&item, &self.options)
            .context(EncodeSnafu)?;
        let (dir, record) = partition::split(record, &self.base_path, &self.partition_columns)
            .context(PartitionSnafu)?;

        if !self.registry.contains(&dir) {
            let writer = self.open_writer(dir.clone()).await?;
            self.registry.insert(writer);
        }
        let writer = self
            .registry
            .get_mut(&dir)
            .context(WriterUnavailableSnafu)?;
        writer.push(record);
        let count = writer.record_count();
        if writer.buffered_len() >= self.options.row_group_size {
            writer.flush().await?;
        }

        touched.insert(dir.clone(), count);
        self.summary.items_written += 1;

        if count >= self.max_count {
            self.rotate(&dir).await?;
        }
        Ok(())
    }

    /// Open a writer for `dir` with its rotation timer scheduled. The
    /// timer enqueues the writer's own partition directory.
    async fn open_writer(&mut self, dir: PathBuf) -> Result<PartitionWriter, WriteError> {
        let events_tx = self.events_tx.clone();
        let max_duration = self.max_duration;
        open_partition_writer(
            dir,
            self.schema_def.clone(),
            self.arrow_schema.clone(),
            self.options.clone(),
            move |partition| {
                tokio::spawn(async move {
                    tokio::time::sleep(max_duration).await;
                    // a send failure means the pipeline already stopped
                    let _ = events_tx.send(Event::Rotate { partition }).await;
                })
            },
        )
        .await
    }

    /// Dispose the writer owning `partition`, if any. A stale rotation
    /// (the writer was already rotated away) is a no-op.
    async fn rotate(&mut self, partition: &Path) -> Result<(), WriteError> {
        match self.registry.remove(partition) {
            Some(writer) => {
                writer.dispose().await?;
                self.summary.files_written += 1;
                Ok(())
            }
            None => {
                debug!(partition = %partition.display(), "stale rotation, no live writer");
                Ok(())
            }
        }
    }

    /// Cut buffered rows into row groups across all live writers.
    async fn flush_buffered(&mut self) -> Result<(), WriteError> {
        for writer in self.registry.writers_mut() {
            writer.flush().await?;
        }
        Ok(())
    }

    async fn emit(&mut self, source: T) -> Result<(), WriteError> {
        if let Some(out) = &self.out {
            if out.send(source).await.is_err() {
                // downstream dropped the pipe
                return ChannelClosedSnafu.fail();
            }
        }
        Ok(())
    }

    /// Dispose every live writer. Failures are logged and the first one is
    /// reported, but disposal always visits the whole set.
    async fn dispose_all(&mut self) -> Result<(), WriteError> {
        let mut first_error = None;
        for writer in self.registry.drain() {
            match writer.dispose().await {
                Ok(()) => self.summary.files_written += 1,
                Err(e) => {
                    error!("failed to dispose partition writer: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
