//! Build-time configuration snapshot.

use std::fmt;
use std::sync::Arc;

use crate::comparator::{BytewiseComparator, Comparator};
use crate::filter::FilterPolicy;
use crate::format::CompressionType;

/// Options controlling table construction.
///
/// A [`TableBuilder`](crate::TableBuilder) copies the snapshot it is
/// constructed with; later edits to the caller's copy have no effect.
/// Mid-build updates go through
/// [`change_options`](crate::TableBuilder::change_options), which rejects
/// comparator changes.
#[derive(Clone)]
pub struct Options {
    /// Key ordering. Must match the order of the record stream fed to
    /// the builder and the order assumed by any future reader.
    pub comparator: Arc<dyn Comparator>,

    /// Approximate-membership filter over all keys; `None` disables the
    /// filter block entirely.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    /// Per-block compression. Blocks that don't compress well enough are
    /// stored raw regardless.
    pub compression: CompressionType,

    /// Uncompressed payload size at which a data block is cut.
    pub block_size: usize,

    /// Entries between restart points in data blocks. The index block
    /// always uses an interval of 1 so separators binary-search cleanly.
    pub block_restart_interval: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            filter_policy: None,
            compression: CompressionType::Snappy,
            block_size: 4 * 1024,
            block_restart_interval: 16,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("comparator", &self.comparator.name())
            .field("filter_policy", &self.filter_policy.as_ref().map(|p| p.name()))
            .field("compression", &self.compression)
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .finish()
    }
}
