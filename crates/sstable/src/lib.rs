//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk table files built from a sorted record stream.
//!
//! The central type is [`TableBuilder`]: it ingests key/value pairs in
//! strictly increasing key order and emits a single self-contained file
//! with an efficient lookup index, an optional bloom filter, a metadata
//! directory, and a trailing footer. Tables are *write-once, read-many* --
//! once finished they are never modified. [`Table`] reads them back and is
//! used to verify round trips.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA BLOCK 0                                                  │
//! │ DATA BLOCK 1                                                  │
//! │ ...                                                           │
//! │ DATA BLOCK N                                                  │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FILTER BLOCK (optional; bloom segments per 2 KiB of offsets)  │
//! ├───────────────────────────────────────────────────────────────┤
//! │ METAINDEX BLOCK ("filter.<policy>" -> filter block handle)    │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX BLOCK (separator key -> data block handle)              │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 48 bytes)                                 │
//! │                                                               │
//! │ metaindex handle | index handle | padding | magic (u64 LE)    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every block -- data, filter, metaindex, index -- is framed the same
//! way on disk:
//!
//! ```text
//! [payload][type: u8][masked crc32 of payload ‖ type: u32 LE]
//! ```
//!
//! The 5-byte trailer lets the reader detect silent disk corruption and
//! decode the payload (type `0` = raw bytes, `1` = snappy). Block
//! payloads hold prefix-compressed entries with periodic restart points
//! for binary search.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sstable::{Options, TableBuilder};
//!
//! let mut out = Vec::new();
//! let mut builder = TableBuilder::new(Options::default(), &mut out);
//! builder.add(b"apple", b"red").unwrap();
//! builder.add(b"banana", b"yellow").unwrap();
//! builder.finish().unwrap();
//! ```

use std::io;

use thiserror::Error as ThisError;

mod block;
mod builder;
mod comparator;
mod filter;
mod format;
mod options;
mod reader;

pub use builder::TableBuilder;
pub use comparator::{BytewiseComparator, Comparator};
pub use filter::{BloomFilterPolicy, FilterPolicy};
pub use format::{BlockHandle, CompressionType, Footer, BLOCK_TRAILER_SIZE, TABLE_MAGIC};
pub use options::Options;
pub use reader::{Table, TableIter};

/// Errors produced while building or reading a table.
///
/// The variants are cloneable so [`TableBuilder`] can latch the first
/// failure as a sticky status and hand copies back from every subsequent
/// call; I/O failures are captured as their kind and message at the
/// point of the latch.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// An underlying I/O error from the output sink or input file.
    #[error("io error: {0}")]
    Io(String),

    /// API misuse that is reported rather than asserted, e.g. changing
    /// the comparator mid-build.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A table file failed validation: bad magic, truncated structure,
    /// checksum mismatch, or an unknown compression byte.
    #[error("corrupt table: {0}")]
    Corruption(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests;
