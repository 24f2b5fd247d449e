//! Reads a finished table file back: point lookups and full scans.
//!
//! The reader exists to close the loop on the builder -- everything the
//! builder writes is decodable, checksum-verified, and comparable against
//! the original record stream. It is deliberately small: no block cache,
//! no readahead.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;

use crate::block::{Block, BlockIter};
use crate::comparator::BytewiseComparator;
use crate::filter::FilterBlockReader;
use crate::format::{self, BlockHandle, CompressionType, Footer, BLOCK_TRAILER_SIZE};
use crate::options::Options;
use crate::{Error, Result};

/// Maximum block payload we'll allocate for (64 MiB). Prevents OOM on
/// corrupt handles.
const MAX_BLOCK_BYTES: u64 = 64 * 1024 * 1024;

/// An open table file.
///
/// On [`open`](Table::open) the footer is validated and the index block
/// (plus the filter block, when the options carry a policy) is loaded
/// into memory. Data blocks are read on demand; every block's trailer
/// CRC is verified before its contents are trusted.
///
/// A persistent file handle is kept for the lifetime of the reader,
/// wrapped in a `Mutex` so `get` can be called through `&self`.
pub struct Table {
    options: Options,
    file: Mutex<File>,
    index_block: Block,
    filter: Option<FilterBlockReader>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table").finish_non_exhaustive()
    }
}

impl Table {
    /// Opens a table, validating the footer magic and loading the index
    /// and filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corruption`] if the file is too small, the magic
    /// is wrong, a handle points outside the file, or any loaded block
    /// fails its checksum; [`Error::Io`] on read failures.
    pub fn open(options: Options, mut file: File) -> Result<Table> {
        let filesize = file.metadata()?.len();
        if filesize < Footer::ENCODED_LENGTH as u64 {
            return Err(Error::Corruption("file too short for footer".into()));
        }

        file.seek(SeekFrom::Start(filesize - Footer::ENCODED_LENGTH as u64))?;
        let mut footer_bytes = [0u8; Footer::ENCODED_LENGTH];
        file.read_exact(&mut footer_bytes)?;
        let footer = Footer::decode(&footer_bytes)?;

        let index_block = Block::new(read_block(&mut file, footer.index_handle)?)?;

        // The filter block is found through the metaindex under
        // "filter.<policy name>"; absent entries just disable pruning.
        let mut filter = None;
        if let Some(policy) = options.filter_policy.clone() {
            let metaindex = Block::new(read_block(&mut file, footer.metaindex_handle)?)?;
            let cmp = BytewiseComparator;
            let mut iter = metaindex.iter(&cmp);
            let name = format!("filter.{}", policy.name());
            iter.seek(name.as_bytes());
            if iter.valid() && iter.key() == name.as_bytes() {
                let mut value = iter.value();
                let handle = BlockHandle::decode_from(&mut value)?;
                let contents = read_block(&mut file, handle)?;
                filter = Some(FilterBlockReader::new(policy, contents));
            }
        }

        Ok(Table {
            options,
            file: Mutex::new(file),
            index_block,
            filter,
        })
    }

    /// Point lookup. Returns `Ok(None)` when the key is absent; the
    /// filter usually answers that without touching a data block.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cmp = self.options.comparator.as_ref();
        let mut index_iter = self.index_block.iter(cmp);
        index_iter.seek(key);
        if !index_iter.valid() {
            // Past the last separator: key is greater than everything.
            return Ok(None);
        }
        let mut value = index_iter.value();
        let handle = BlockHandle::decode_from(&mut value)?;

        if let Some(filter) = &self.filter {
            if !filter.key_may_match(handle.offset, key) {
                return Ok(None);
            }
        }

        let block = Block::new(self.read_block_at(handle)?)?;
        let mut iter = block.iter(cmp);
        iter.seek(key);
        if iter.valid() && cmp.compare(iter.key(), key) == Ordering::Equal {
            Ok(Some(iter.value().to_vec()))
        } else {
            Ok(None)
        }
    }

    /// Full scan in key order.
    pub fn iter(&self) -> TableIter<'_> {
        let mut index_iter = self.index_block.iter(self.options.comparator.as_ref());
        index_iter.seek_to_first();
        TableIter {
            table: self,
            index_iter,
            current: VecDeque::new(),
            errored: false,
        }
    }

    fn read_block_at(&self, handle: BlockHandle) -> Result<Vec<u8>> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| Error::Io("table file lock poisoned".into()))?;
        read_block(&mut file, handle)
    }

    fn read_entries(&self, handle: BlockHandle) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let block = Block::new(self.read_block_at(handle)?)?;
        let mut iter = block.iter(self.options.comparator.as_ref());
        let mut entries = Vec::new();
        iter.seek_to_first();
        while iter.valid() {
            entries.push((iter.key().to_vec(), iter.value().to_vec()));
            iter.next();
        }
        Ok(entries)
    }
}

/// Iterator over every record of a [`Table`], one loaded data block at a
/// time. Yields `Err` once and stops if a block fails validation.
pub struct TableIter<'a> {
    table: &'a Table,
    index_iter: BlockIter<'a>,
    current: VecDeque<(Vec<u8>, Vec<u8>)>,
    errored: bool,
}

impl Iterator for TableIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored {
            return None;
        }
        loop {
            if let Some(entry) = self.current.pop_front() {
                return Some(Ok(entry));
            }
            if !self.index_iter.valid() {
                return None;
            }
            let mut value = self.index_iter.value();
            let handle = match BlockHandle::decode_from(&mut value) {
                Ok(h) => h,
                Err(e) => {
                    self.errored = true;
                    return Some(Err(e));
                }
            };
            self.index_iter.next();
            match self.table.read_entries(handle) {
                Ok(entries) => self.current = entries.into(),
                Err(e) => {
                    self.errored = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Reads one block: payload + trailer, CRC verification, decompression.
fn read_block(file: &mut File, handle: BlockHandle) -> Result<Vec<u8>> {
    if handle.size > MAX_BLOCK_BYTES {
        return Err(Error::Corruption(format!(
            "block of {} bytes exceeds maximum {}",
            handle.size, MAX_BLOCK_BYTES
        )));
    }
    file.seek(SeekFrom::Start(handle.offset))?;
    let mut buf = vec![0u8; handle.size as usize + BLOCK_TRAILER_SIZE];
    file.read_exact(&mut buf)?;

    let (payload, trailer) = buf.split_at(handle.size as usize);
    let type_byte = trailer[0];
    let stored = u32::from_le_bytes([trailer[1], trailer[2], trailer[3], trailer[4]]);
    if format::unmask_crc(stored) != format::block_crc(payload, type_byte) {
        return Err(Error::Corruption(format!(
            "block checksum mismatch at offset {}",
            handle.offset
        )));
    }

    match CompressionType::from_byte(type_byte) {
        Some(CompressionType::None) => Ok(payload.to_vec()),
        Some(CompressionType::Snappy) => snap::raw::Decoder::new()
            .decompress_vec(payload)
            .map_err(|e| Error::Corruption(format!("snappy decode failed: {}", e))),
        None => Err(Error::Corruption(format!(
            "unknown compression type {:#x}",
            type_byte
        ))),
    }
}
