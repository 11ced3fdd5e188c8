//! Public configuration and entry points.
//!
//! Two builders produce a [`RotatingWriter`]: [`GenericWriterBuilder`]
//! operates directly on [`Record`]s with a caller-supplied [`SchemaDef`],
//! while [`TypedWriterBuilder`] works on caller types through
//! [`RecordEncoder`] and [`SchemaResolver`] implementations. All setters
//! are by-value and return the builder.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::SchemaRef;
use futures::{Stream, StreamExt};
use snafu::prelude::*;
use tokio::sync::{mpsc, oneshot};

use crate::encode::{PassthroughCodec, RecordEncoder, SchemaResolver};
use crate::error::{ChannelClosedSnafu, SchemaSnafu, WriteError};
use crate::pipeline::events::Event;
use crate::pipeline::handler::{HandlerError, PostWriteContext, PostWriteHandler};
use crate::pipeline::{EventLoop, WriteSummary};
use crate::record::{ColumnPath, Record};
use crate::schema::arrow::to_arrow_schema;
use crate::schema::SchemaDef;
use crate::sink::registry::WriterRegistry;
use crate::sink::WriterOptions;

/// Per-file record-count threshold before rotation.
pub const DEFAULT_MAX_COUNT: usize = 1024 * 1024;
/// Wall-clock threshold before a file is rotated by its timer.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(60);
/// Event-loop batch size.
pub const DEFAULT_CHUNK_SIZE: usize = 16;

type Transform<T, W> = Arc<dyn Fn(&T) -> Vec<W> + Send + Sync>;

/// Builder over caller types, wired through encoder and schema-resolver
/// capabilities.
pub struct TypedWriterBuilder<T, W> {
    base_path: PathBuf,
    max_count: usize,
    max_duration: Duration,
    chunk_size: usize,
    partition_columns: Vec<ColumnPath>,
    options: WriterOptions,
    encoder: Arc<dyn RecordEncoder<W>>,
    resolver: Box<dyn SchemaResolver<W>>,
    transform: Transform<T, W>,
    handler: Option<PostWriteHandler<T>>,
}

impl<T, W: 'static> TypedWriterBuilder<T, W> {
    /// Build a writer whose write items are produced from each source
    /// record by `transform`; one record may yield zero or many items.
    pub fn with_transformation(
        base_path: impl Into<PathBuf>,
        encoder: impl RecordEncoder<W>,
        resolver: impl SchemaResolver<W>,
        transform: impl Fn(&T) -> Vec<W> + Send + Sync + 'static,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            max_count: DEFAULT_MAX_COUNT,
            max_duration: DEFAULT_MAX_DURATION,
            chunk_size: DEFAULT_CHUNK_SIZE,
            partition_columns: Vec::new(),
            options: WriterOptions::default(),
            encoder: Arc::new(encoder),
            resolver: Box::new(resolver),
            transform: Arc::new(transform),
            handler: None,
        }
    }

    /// Per-file record-count threshold; crossing it rotates immediately.
    pub fn max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count.max(1);
        self
    }

    /// Wall-clock threshold per file; the rotation is enqueued by a timer.
    pub fn max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Event-loop batch size; also the rechunking unit for writes.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Ordered dotted paths extracted from every record into the
    /// directory structure.
    pub fn partition_by<I, P>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ColumnPath>,
    {
        self.partition_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Options passed to the encoder and to every opened file.
    pub fn options(mut self, options: WriterOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the pre-write transformation.
    pub fn pre_write_transformation(
        mut self,
        transform: impl Fn(&T) -> Vec<W> + Send + Sync + 'static,
    ) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    /// Observe each processed chunk and optionally request extra
    /// rotations.
    pub fn post_write_handler(
        mut self,
        handler: impl Fn(&PostWriteContext<'_, T>) -> Result<(), HandlerError> + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Resolve the schema and produce the writer. Fails fast when the
    /// schema cannot be resolved or materialized.
    pub fn build(self) -> Result<RotatingWriter<T, W>, WriteError> {
        let schema_def = self
            .resolver
            .resolve(&self.partition_columns)
            .context(SchemaSnafu)?;
        let arrow_schema: SchemaRef = Arc::new(to_arrow_schema(&schema_def).context(SchemaSnafu)?);

        Ok(RotatingWriter {
            base_path: self.base_path,
            max_count: self.max_count,
            max_duration: self.max_duration,
            chunk_size: self.chunk_size,
            partition_columns: self.partition_columns,
            options: self.options,
            encoder: self.encoder,
            schema_def: Arc::new(schema_def),
            arrow_schema,
            transform: self.transform,
            handler: self.handler,
        })
    }
}

impl<T, W> TypedWriterBuilder<T, W>
where
    T: Clone,
    W: From<T> + 'static,
{
    /// Build a writer that writes each source record as a single item.
    pub fn new(
        base_path: impl Into<PathBuf>,
        encoder: impl RecordEncoder<W>,
        resolver: impl SchemaResolver<W>,
    ) -> Self {
        Self::with_transformation(base_path, encoder, resolver, |source: &T| {
            vec![W::from(source.clone())]
        })
    }
}

/// Builder over generic [`Record`]s with a user-specified schema.
pub struct GenericWriterBuilder {
    inner: TypedWriterBuilder<Record, Record>,
}

impl GenericWriterBuilder {
    pub fn new(base_path: impl Into<PathBuf>, schema: SchemaDef) -> Self {
        let codec = PassthroughCodec::new(schema);
        Self {
            inner: TypedWriterBuilder::new(base_path, codec.clone(), codec),
        }
    }

    pub fn max_count(mut self, max_count: usize) -> Self {
        self.inner = self.inner.max_count(max_count);
        self
    }

    pub fn max_duration(mut self, max_duration: Duration) -> Self {
        self.inner = self.inner.max_duration(max_duration);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.inner = self.inner.chunk_size(chunk_size);
        self
    }

    pub fn partition_by<I, P>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ColumnPath>,
    {
        self.inner = self.inner.partition_by(columns);
        self
    }

    pub fn options(mut self, options: WriterOptions) -> Self {
        self.inner = self.inner.options(options);
        self
    }

    pub fn pre_write_transformation(
        mut self,
        transform: impl Fn(&Record) -> Vec<Record> + Send + Sync + 'static,
    ) -> Self {
        self.inner = self.inner.pre_write_transformation(transform);
        self
    }

    pub fn post_write_handler(
        mut self,
        handler: impl Fn(&PostWriteContext<'_, Record>) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.inner = self.inner.post_write_handler(handler);
        self
    }

    pub fn build(self) -> Result<RotatingWriter<Record, Record>, WriteError> {
        self.inner.build()
    }
}

/// A configured rotating writer, ready to consume a stream.
pub struct RotatingWriter<T, W> {
    base_path: PathBuf,
    max_count: usize,
    max_duration: Duration,
    chunk_size: usize,
    partition_columns: Vec<ColumnPath>,
    options: WriterOptions,
    encoder: Arc<dyn RecordEncoder<W>>,
    schema_def: Arc<SchemaDef>,
    arrow_schema: SchemaRef,
    transform: Transform<T, W>,
    handler: Option<PostWriteHandler<T>>,
}

impl<T, W> std::fmt::Debug for RotatingWriter<T, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingWriter")
            .field("base_path", &self.base_path)
            .field("max_count", &self.max_count)
            .field("max_duration", &self.max_duration)
            .field("chunk_size", &self.chunk_size)
            .field("partition_columns", &self.partition_columns)
            .field("arrow_schema", &self.arrow_schema)
            .finish_non_exhaustive()
    }
}

impl<T, W> RotatingWriter<T, W>
where
    T: Clone + Send + Sync + 'static,
    W: Send + 'static,
{
    /// Pipe the input through the writer, re-emitting each source record
    /// after its write items have been written. The final item is the
    /// terminal error, if any. Must be called within a tokio runtime.
    pub fn pipe<S>(self, input: S) -> impl Stream<Item = Result<T, WriteError>>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(self.chunk_size.max(1));
        let (out_tx, out_rx) = mpsc::channel(self.chunk_size.max(1));
        let (done_tx, done_rx) = oneshot::channel();

        self.spawn_producer(input, events_tx.clone());
        let event_loop = self.into_event_loop(events_tx, Some(out_tx));
        tokio::spawn(async move {
            let result = event_loop.run(events_rx).await;
            let _ = done_tx.send(result);
        });

        let state = PipeState {
            out_rx,
            done_rx: Some(done_rx),
        };
        futures::stream::unfold(state, |mut state| async move {
            if let Some(source) = state.out_rx.recv().await {
                return Some((Ok(source), state));
            }
            match state.done_rx.take() {
                Some(done) => match done.await {
                    Ok(Ok(_)) => None,
                    Ok(Err(error)) => Some((Err(error), state)),
                    Err(_) => Some((Err(ChannelClosedSnafu.build()), state)),
                },
                None => None,
            }
        })
    }

    /// Consume the whole input and return the run's statistics.
    pub async fn write_all<S>(self, input: S) -> Result<WriteSummary, WriteError>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(self.chunk_size.max(1));
        self.spawn_producer(input, events_tx.clone());
        let event_loop = self.into_event_loop(events_tx, None);
        event_loop.run(events_rx).await
    }

    /// Feed the upstream into the event queue; the bounded queue is the
    /// backpressure between producer and loop.
    fn spawn_producer<S>(&self, input: S, events_tx: mpsc::Sender<Event<T, W>>)
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let transform = self.transform.clone();
        tokio::spawn(async move {
            futures::pin_mut!(input);
            while let Some(source) = input.next().await {
                let items = transform(&source);
                if events_tx.send(Event::Data { items, source }).await.is_err() {
                    return;
                }
            }
            let _ = events_tx.send(Event::Stop).await;
        });
    }

    fn into_event_loop(
        self,
        events_tx: mpsc::Sender<Event<T, W>>,
        out: Option<mpsc::Sender<T>>,
    ) -> EventLoop<T, W> {
        EventLoop {
            base_path: self.base_path,
            max_count: self.max_count,
            max_duration: self.max_duration,
            chunk_size: self.chunk_size,
            partition_columns: self.partition_columns,
            options: self.options,
            encoder: self.encoder,
            schema_def: self.schema_def,
            arrow_schema: self.arrow_schema,
            handler: self.handler,
            registry: WriterRegistry::new(),
            events_tx,
            out,
            summary: WriteSummary::default(),
        }
    }
}

struct PipeState<T> {
    out_rx: mpsc::Receiver<T>,
    done_rx: Option<oneshot::Receiver<Result<WriteSummary, WriteError>>>,
}
