//! Post-write observation hook.
//!
//! After each chunk the loop hands an optional caller-supplied handler a
//! snapshot of what was just processed. The handler runs synchronously
//! with the loop (no new data is consumed while it executes) and may
//! request extra rotations, applied once after it returns.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Error type surfaced by a failing handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// The post-write callback.
pub type PostWriteHandler<T> =
    Arc<dyn Fn(&PostWriteContext<'_, T>) -> Result<(), HandlerError> + Send + Sync>;

/// Snapshot handed to the post-write handler after each chunk.
pub struct PostWriteContext<'a, T> {
    processed: &'a [T],
    partitions: &'a HashMap<PathBuf, usize>,
    flush_requests: RefCell<HashSet<PathBuf>>,
}

impl<'a, T> PostWriteContext<'a, T> {
    pub(crate) fn new(processed: &'a [T], partitions: &'a HashMap<PathBuf, usize>) -> Self {
        Self {
            processed,
            partitions,
            flush_requests: RefCell::new(HashSet::new()),
        }
    }

    /// The source records processed by this chunk.
    pub fn processed(&self) -> &[T] {
        self.processed
    }

    /// Record counts of the partitions this chunk wrote to.
    pub fn partitions(&self) -> &HashMap<PathBuf, usize> {
        self.partitions
    }

    /// Request rotation of a partition directory. Requests are aggregated
    /// and applied once, after the handler returns.
    pub fn flush(&self, partition: impl Into<PathBuf>) {
        self.flush_requests.borrow_mut().insert(partition.into());
    }

    pub(crate) fn into_flush_requests(self) -> HashSet<PathBuf> {
        self.flush_requests.into_inner()
    }
}
