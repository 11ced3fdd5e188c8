//! Events merged into the writer's single queue.

use std::path::PathBuf;

/// The three event kinds the loop folds over. Data and rotation events race
/// onto the same queue; ordering between them is decided per chunk.
pub(crate) enum Event<T, W> {
    /// One upstream record and the write items its transformation produced.
    Data { items: Vec<W>, source: T },
    /// Close the writer currently owning this partition directory.
    Rotate { partition: PathBuf },
    /// Upstream exhausted; flush remaining work and terminate.
    Stop,
}
