//! The table builder: a single-writer streaming pipeline from sorted
//! records to a finished table file.

use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;
use std::io::Write;
use std::sync::Arc;

use crate::block::BlockBuilder;
use crate::filter::FilterBlockBuilder;
use crate::format::{self, BlockHandle, CompressionType, Footer, BLOCK_TRAILER_SIZE};
use crate::options::Options;
use crate::{Error, Result};

/// Builds a table file from key/value records added in strictly
/// increasing key order.
///
/// The builder writes data blocks as they fill, then on
/// [`finish`](Self::finish) stitches on the filter block, the metaindex,
/// the index, and the footer. The sink is only ever appended to; the
/// caller closes it after `finish` returns.
///
/// Index entries are deferred: when a data block is cut, its index
/// record is not written until the *next* key arrives, so the index can
/// use a short separator between the two blocks instead of the full last
/// key. Consider a boundary between `"the quick brown fox"` and
/// `"the who"` -- the index only needs `"the r"`.
///
/// The first sink failure latches into the builder's status; every
/// subsequent call returns a copy of that error without doing further
/// work. A builder must be closed with `finish` or
/// [`abandon`](Self::abandon) before it is dropped.
pub struct TableBuilder<W: Write> {
    options: Options,
    sink: W,
    /// Bytes appended to the sink so far (payloads + trailers + footer).
    offset: u64,
    /// Sticky: holds the first error encountered.
    status: Result<()>,
    data_block: BlockBuilder,
    /// Restart interval 1: every separator is its own binary-search anchor.
    index_block: BlockBuilder,
    /// Owned copy of the most recent key; the separator computation
    /// shortens it in place.
    last_key: Vec<u8>,
    num_entries: u64,
    /// Set once `finish` or `abandon` has run.
    closed: bool,
    filter_block: Option<FilterBlockBuilder>,
    /// Handle of the last flushed data block, awaiting its index entry.
    /// Invariant: `Some` only while the data block accumulator is empty.
    pending_index: Option<BlockHandle>,
    /// Reused across blocks to avoid an allocation per compression.
    compressed_scratch: Vec<u8>,
}

impl<W: Write> TableBuilder<W> {
    /// Creates a builder writing to `sink` under a copy of `options`.
    pub fn new(options: Options, sink: W) -> TableBuilder<W> {
        let mut filter_block = options.filter_policy.clone().map(FilterBlockBuilder::new);
        if let Some(fb) = &mut filter_block {
            fb.start_block(0);
        }
        TableBuilder {
            data_block: BlockBuilder::new(options.block_restart_interval),
            index_block: BlockBuilder::new(1),
            sink,
            offset: 0,
            status: Ok(()),
            last_key: Vec::new(),
            num_entries: 0,
            closed: false,
            filter_block,
            pending_index: None,
            compressed_scratch: Vec::new(),
            options,
        }
    }

    /// Updates the options used for subsequent blocks. The comparator
    /// cannot change mid-build: entries already written were ordered and
    /// separated under the old one.
    pub fn change_options(&mut self, options: Options) -> Result<()> {
        if !Arc::ptr_eq(&options.comparator, &self.options.comparator) {
            return Err(Error::InvalidArgument(
                "changing comparator while building table".into(),
            ));
        }
        self.data_block
            .set_restart_interval(options.block_restart_interval);
        self.options = options;
        Ok(())
    }

    /// Appends one record. `key` must be strictly greater than every key
    /// added before it.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert!(!self.closed, "add after finish/abandon");
        if self.status.is_err() {
            return self.status.clone();
        }
        if self.num_entries > 0 {
            debug_assert!(
                self.options.comparator.compare(key, &self.last_key) == Ordering::Greater,
                "keys must be added in strictly increasing order"
            );
        }

        if let Some(handle) = self.pending_index.take() {
            debug_assert!(self.data_block.is_empty());
            // last_key still holds the final key of the flushed block;
            // shorten it to a separator below the new block's first key.
            self.options
                .comparator
                .find_shortest_separator(&mut self.last_key, key);
            let mut handle_encoding = Vec::new();
            handle.encode_to(&mut handle_encoding);
            self.index_block.add(&self.last_key, &handle_encoding);
        }

        if let Some(fb) = &mut self.filter_block {
            fb.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Cuts the current data block and writes it out. No-op when the
    /// block is empty. Rarely needed directly -- `add` flushes on the
    /// size threshold -- but callers may force a block boundary.
    pub fn flush(&mut self) -> Result<()> {
        debug_assert!(!self.closed, "flush after finish/abandon");
        if self.status.is_err() {
            return self.status.clone();
        }
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(
            self.pending_index.is_none(),
            "pending index entry while data block non-empty"
        );

        let raw = self.data_block.finish();
        if let Ok(handle) = self.write_block(&raw) {
            self.pending_index = Some(handle);
            // Best-effort drain of the sink's own buffers.
            if let Err(e) = self.sink.flush() {
                self.status = Err(Error::from(e));
            }
        }
        self.data_block.reset();
        if let Some(fb) = &mut self.filter_block {
            fb.start_block(self.offset);
        }
        self.status.clone()
    }

    /// Applies the compression policy to a finished block payload and
    /// writes it with its trailer.
    fn write_block(&mut self, raw: &[u8]) -> Result<BlockHandle> {
        let mut ty = self.options.compression;
        let mut scratch = std::mem::take(&mut self.compressed_scratch);
        scratch.clear();

        let payload: &[u8] = match ty {
            CompressionType::None => raw,
            CompressionType::Snappy => {
                scratch.resize(snap::raw::max_compress_len(raw.len()), 0);
                match snap::raw::Encoder::new().compress(raw, &mut scratch) {
                    // Compressed form is kept only when it saves at
                    // least 1/8th of the raw payload.
                    Ok(n) if n < raw.len() - raw.len() / 8 => {
                        scratch.truncate(n);
                        &scratch
                    }
                    _ => {
                        ty = CompressionType::None;
                        raw
                    }
                }
            }
        };
        let result = self.write_raw_block(payload, ty);
        self.compressed_scratch = scratch;
        result
    }

    /// Appends `payload` and its 5-byte trailer, returning the handle.
    /// The offset counter only advances after both writes succeed.
    fn write_raw_block(&mut self, payload: &[u8], ty: CompressionType) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, payload.len() as u64);
        if let Err(e) = self.sink.write_all(payload) {
            return self.latch(e.into());
        }
        let mut trailer = [0u8; BLOCK_TRAILER_SIZE];
        trailer[0] = ty.to_byte();
        LittleEndian::write_u32(
            &mut trailer[1..],
            format::masked_block_crc(payload, ty.to_byte()),
        );
        if let Err(e) = self.sink.write_all(&trailer) {
            return self.latch(e.into());
        }
        self.offset += (payload.len() + BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }

    fn latch<T>(&mut self, err: Error) -> Result<T> {
        self.status = Err(err.clone());
        Err(err)
    }

    /// Finalizes the table: drains the last data block, then writes the
    /// filter block, the metaindex, the index, and the footer. Each step
    /// runs only while the status is still ok; the final status is
    /// returned either way.
    pub fn finish(&mut self) -> Result<()> {
        let _ = self.flush();
        debug_assert!(!self.closed, "finish after finish/abandon");
        self.closed = true;

        // Filter block, always stored uncompressed. Skipped entirely
        // when no key was ever added.
        let mut filter_handle = None;
        if self.status.is_ok() {
            if let Some(fb) = self.filter_block.take() {
                if !fb.is_empty() {
                    let contents = fb.finish();
                    if let Ok(h) = self.write_raw_block(&contents, CompressionType::None) {
                        filter_handle = Some(h);
                    }
                }
            }
        }

        // Metaindex block: well-known names -> meta block handles.
        let mut metaindex_handle = BlockHandle::default();
        if self.status.is_ok() {
            let mut meta_block = BlockBuilder::new(self.options.block_restart_interval);
            if let (Some(h), Some(policy)) = (filter_handle, self.options.filter_policy.as_ref()) {
                let key = format!("filter.{}", policy.name());
                let mut handle_encoding = Vec::new();
                h.encode_to(&mut handle_encoding);
                meta_block.add(key.as_bytes(), &handle_encoding);
            }
            let raw = meta_block.finish();
            if let Ok(h) = self.write_block(&raw) {
                metaindex_handle = h;
            }
        }

        // Index block. The last data block never saw a "next key", so
        // its deferred entry is settled here with a short successor.
        let mut index_handle = BlockHandle::default();
        if self.status.is_ok() {
            if let Some(handle) = self.pending_index.take() {
                self.options.comparator.find_short_successor(&mut self.last_key);
                let mut handle_encoding = Vec::new();
                handle.encode_to(&mut handle_encoding);
                self.index_block.add(&self.last_key, &handle_encoding);
            }
            let raw = self.index_block.finish();
            if let Ok(h) = self.write_block(&raw) {
                index_handle = h;
            }
        }

        // Footer.
        if self.status.is_ok() {
            let footer = Footer::new(metaindex_handle, index_handle);
            let encoding = footer.encode();
            match self.sink.write_all(&encoding) {
                Ok(()) => self.offset += encoding.len() as u64,
                Err(e) => {
                    self.status = Err(Error::from(e));
                }
            }
        }
        self.status.clone()
    }

    /// Marks the builder closed without writing the trailing structures.
    /// The bytes appended so far do not form a valid table.
    pub fn abandon(&mut self) {
        debug_assert!(!self.closed, "abandon after finish/abandon");
        self.closed = true;
    }

    /// Number of records added so far.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes appended to the sink so far. Records sitting in the
    /// unflushed data block are not counted. After a successful
    /// `finish` this is the final file size.
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    /// The sticky status: `Ok` until the first sink failure.
    pub fn status(&self) -> Result<()> {
        self.status.clone()
    }
}

impl<W: Write> Drop for TableBuilder<W> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(
                self.closed,
                "TableBuilder dropped without finish() or abandon()"
            );
        }
    }
}
