//! Filter block construction and lookup.
//!
//! The filter block summarizes every key in the table so a reader can
//! skip data blocks that definitely don't contain a lookup key. Rather
//! than one filter per data block, segments are keyed by *file offset*:
//! segment `i` covers all keys of data blocks starting in
//! `[i * 2 KiB, (i+1) * 2 KiB)`. Offset-keyed segments keep the lookup a
//! single shift regardless of block sizes.
//!
//! Block layout:
//!
//! ```text
//! [segment 0][segment 1]...[segment n-1]
//! [offset of segment 0: u32 LE]...[offset of segment n-1: u32 LE]
//! [offset of the offset array: u32 LE][base_lg: u8]
//! ```

use byteorder::{ByteOrder, LittleEndian};
use std::sync::Arc;

/// Keys of data blocks starting within the same `1 << FILTER_BASE_LG`
/// byte window of file offsets share one filter segment.
const FILTER_BASE_LG: u8 = 11;

/// Approximate-membership capability. Implementations must be usable
/// with key sets of any size, including empty.
pub trait FilterPolicy: Send + Sync {
    /// Persisted in the metaindex as `"filter." + name`; readers use it
    /// to pick the matching policy. Change the name whenever the filter
    /// encoding changes incompatibly.
    fn name(&self) -> &'static str;

    /// Builds a filter string summarizing `keys`.
    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8>;

    /// True if `key` may be in the set `filter` summarizes; false only
    /// if it definitely is not.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

/// The built-in bloom policy, backed by the `bloom` crate.
#[derive(Debug, Clone)]
pub struct BloomFilterPolicy {
    bits_per_key: usize,
}

impl BloomFilterPolicy {
    /// `bits_per_key` = 10 yields roughly a 1% false positive rate.
    pub fn new(bits_per_key: usize) -> Self {
        Self { bits_per_key }
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &'static str {
        "shoal.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8> {
        bloom::create_filter(keys, self.bits_per_key)
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        bloom::key_may_match(key, filter)
    }
}

/// Accumulates keys and emits the filter block at `finish`.
///
/// Call sequence: `start_block(0)`, then interleaved `add_key` /
/// `start_block(offset)` as data blocks are cut, then one `finish`.
pub(crate) struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    /// Keys seen since the last segment was generated.
    keys: Vec<Vec<u8>>,
    /// Start offset of each generated segment within `result`.
    filter_offsets: Vec<u32>,
    result: Vec<u8>,
    /// Whether any key was ever added; an all-empty filter block is
    /// useless and is skipped by the finalizer.
    any_keys: bool,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> Self {
        Self {
            policy,
            keys: Vec::new(),
            filter_offsets: Vec::new(),
            result: Vec::new(),
            any_keys: false,
        }
    }

    /// Declares that keys added from now on belong to a data block that
    /// begins at file offset `block_offset`. Generates the segments for
    /// every 2 KiB window the file has advanced past.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset >> FILTER_BASE_LG;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        while filter_index > self.filter_offsets.len() as u64 {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.keys.push(key.to_vec());
        self.any_keys = true;
    }

    pub fn is_empty(&self) -> bool {
        !self.any_keys
    }

    /// Emits the complete filter block: all segments, the offset array,
    /// its start offset, and the base_lg byte.
    pub fn finish(mut self) -> Vec<u8> {
        if !self.keys.is_empty() {
            self.generate_filter();
        }

        let array_offset = self.result.len() as u32;
        let mut buf = [0u8; 4];
        for i in 0..self.filter_offsets.len() {
            LittleEndian::write_u32(&mut buf, self.filter_offsets[i]);
            self.result.extend_from_slice(&buf);
        }
        LittleEndian::write_u32(&mut buf, array_offset);
        self.result.extend_from_slice(&buf);
        self.result.push(FILTER_BASE_LG);
        self.result
    }

    fn generate_filter(&mut self) {
        self.filter_offsets.push(self.result.len() as u32);
        if self.keys.is_empty() {
            // No data block started in this offset window; the segment
            // is empty and matches nothing.
            return;
        }
        let key_refs: Vec<&[u8]> = self.keys.iter().map(|k| k.as_slice()).collect();
        let filter = self.policy.create_filter(&key_refs);
        self.result.extend_from_slice(&filter);
        self.keys.clear();
    }
}

/// Parses a filter block and answers per-data-block membership queries.
pub(crate) struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Vec<u8>,
    /// Start of the offset array within `data`.
    array_offset: usize,
    num_segments: usize,
    base_lg: u8,
}

impl FilterBlockReader {
    /// Degrades gracefully: a malformed block yields a reader that
    /// matches every key (no false negatives, just no pruning).
    pub fn new(policy: Arc<dyn FilterPolicy>, data: Vec<u8>) -> Self {
        let mut reader = Self {
            policy,
            data,
            array_offset: 0,
            num_segments: 0,
            base_lg: FILTER_BASE_LG,
        };
        let n = reader.data.len();
        if n < 5 {
            return reader;
        }
        reader.base_lg = reader.data[n - 1];
        let array_offset = LittleEndian::read_u32(&reader.data[n - 5..n - 1]) as usize;
        if array_offset > n - 5 {
            return reader;
        }
        reader.array_offset = array_offset;
        reader.num_segments = (n - 5 - array_offset) / 4;
        reader
    }

    /// True if `key` may be present in the data block starting at file
    /// offset `block_offset`.
    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index >= self.num_segments {
            // Out of range is treated as a potential match.
            return true;
        }
        let at = self.array_offset + index * 4;
        let start = LittleEndian::read_u32(&self.data[at..at + 4]) as usize;
        let limit = if index + 1 < self.num_segments {
            LittleEndian::read_u32(&self.data[at + 4..at + 8]) as usize
        } else {
            self.array_offset
        };
        if start > limit || limit > self.array_offset {
            // Malformed offsets; don't risk a false negative.
            return true;
        }
        if start == limit {
            // Empty segment: no data block started in this window.
            return false;
        }
        self.policy.key_may_match(key, &self.data[start..limit])
    }
}
