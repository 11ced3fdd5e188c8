//! Live-writer registry keyed by partition directory.
//!
//! The registry is owned by the event-loop task; writers are single-owner,
//! so insert-if-absent needs no lock. A writer leaves the map exactly once,
//! through [`WriterRegistry::remove`] or [`WriterRegistry::drain`], and is
//! disposed by the caller, so the map never holds a disposed writer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::factory::PartitionWriter;

#[derive(Default)]
pub(crate) struct WriterRegistry {
    writers: HashMap<PathBuf, PartitionWriter>,
}

impl WriterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.writers.contains_key(dir)
    }

    pub fn get_mut(&mut self, dir: &Path) -> Option<&mut PartitionWriter> {
        self.writers.get_mut(dir)
    }

    /// Insert a freshly opened writer under its partition directory.
    pub fn insert(&mut self, writer: PartitionWriter) {
        self.writers.insert(writer.dir().to_path_buf(), writer);
    }

    /// Atomically remove the writer for disposal by the caller.
    pub fn remove(&mut self, dir: &Path) -> Option<PartitionWriter> {
        self.writers.remove(dir)
    }

    /// Remove every writer for disposal, clearing the map.
    pub fn drain(&mut self) -> Vec<PartitionWriter> {
        self.writers.drain().map(|(_, writer)| writer).collect()
    }

    pub fn writers_mut(&mut self) -> impl Iterator<Item = &mut PartitionWriter> {
        self.writers.values_mut()
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}
