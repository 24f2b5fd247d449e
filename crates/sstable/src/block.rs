//! Block encoding: an append-only run of key/value entries with shared
//! key-prefix compression and periodic restart points.
//!
//! Entry layout:
//!
//! ```text
//! [shared: varint][non_shared: varint][value_len: varint][key delta][value]
//! ```
//!
//! Every `restart_interval`-th entry begins a new *restart point*: its key
//! is stored whole (`shared == 0`) and its offset is recorded in a
//! trailing array, so a reader can binary-search anchors and then scan
//! forward. The block ends with the restart offsets (u32 LE each) and
//! their count:
//!
//! ```text
//! [entries...][restart_0: u32][restart_1: u32]...[num_restarts: u32]
//! ```

use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;

use crate::comparator::Comparator;
use crate::format::{decode_varint64, encode_varint64};

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    let min_len = a.len().min(b.len());
    let mut shared = 0;
    while shared < min_len && a[shared] == b[shared] {
        shared += 1;
    }
    shared
}

/// Accumulates sorted entries into a block payload.
///
/// Ordering is the caller's contract: the builder applies prefix
/// compression against whatever key came last and does not compare keys
/// itself.
pub(crate) struct BlockBuilder {
    /// Serialized entries so far (without the restart array).
    buffer: Vec<u8>,
    /// Offsets of restart points within `buffer`.
    restarts: Vec<u32>,
    /// Entries emitted since the last restart point.
    counter: usize,
    restart_interval: usize,
    /// Key of the most recent entry, kept for prefix compression.
    last_key: Vec<u8>,
    finished: bool,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        debug_assert!(restart_interval >= 1);
        Self {
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            restart_interval,
            last_key: Vec::new(),
            finished: false,
        }
    }

    /// Appends an entry. Keys must arrive in the caller's sort order for
    /// the block to be searchable later.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        debug_assert!(self.counter <= self.restart_interval);

        let shared = if self.counter < self.restart_interval {
            shared_prefix_len(&self.last_key, key)
        } else {
            // Start a new restart point; the key is stored whole.
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        };
        let non_shared = key.len() - shared;

        encode_varint64(&mut self.buffer, shared as u64);
        encode_varint64(&mut self.buffer, non_shared as u64);
        encode_varint64(&mut self.buffer, value.len() as u64);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Upper bound on the payload size if [`finish`](Self::finish) were
    /// called now. Cheap; used to decide when a block is full.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// True iff no entry has been added since construction or the last
    /// [`reset`](Self::reset).
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Appends the restart array and its count, returning the finished
    /// payload. The builder is unusable until [`reset`](Self::reset).
    pub fn finish(&mut self) -> Vec<u8> {
        debug_assert!(!self.finished);
        self.finished = true;
        let mut buf = [0u8; 4];
        for i in 0..self.restarts.len() {
            LittleEndian::write_u32(&mut buf, self.restarts[i]);
            self.buffer.extend_from_slice(&buf);
        }
        LittleEndian::write_u32(&mut buf, self.restarts.len() as u32);
        self.buffer.extend_from_slice(&buf);
        std::mem::take(&mut self.buffer)
    }

    /// Clears all state for reuse on the next block.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        self.finished = false;
    }

    /// Takes effect from the next entry onward; in-flight restart runs
    /// keep their old length.
    pub fn set_restart_interval(&mut self, restart_interval: usize) {
        debug_assert!(restart_interval >= 1);
        self.restart_interval = restart_interval;
    }
}

/// A decoded, immutable block payload, as produced by [`BlockBuilder`].
pub(crate) struct Block {
    data: Vec<u8>,
    /// Where the entry region ends and the restart array begins.
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    /// Validates the restart array framing. Entry contents are validated
    /// lazily during iteration.
    pub fn new(data: Vec<u8>) -> crate::Result<Self> {
        if data.len() < 4 {
            return Err(crate::Error::Corruption("block too short".into()));
        }
        let num_restarts = LittleEndian::read_u32(&data[data.len() - 4..]);
        let array_bytes = num_restarts as usize * 4 + 4;
        if num_restarts == 0 || array_bytes > data.len() {
            return Err(crate::Error::Corruption("bad block restart array".into()));
        }
        let restart_offset = data.len() - array_bytes;
        Ok(Self {
            data,
            restart_offset,
            num_restarts,
        })
    }

    pub fn iter<'a>(&'a self, cmp: &'a dyn Comparator) -> BlockIter<'a> {
        BlockIter {
            block: self,
            cmp,
            current: self.restart_offset,
            next_offset: 0,
            key: Vec::new(),
            value: (0, 0),
        }
    }

    fn restart_point(&self, index: u32) -> usize {
        debug_assert!(index < self.num_restarts);
        let at = self.restart_offset + index as usize * 4;
        LittleEndian::read_u32(&self.data[at..at + 4]) as usize
    }

    /// Decodes the full key stored at a restart point. Returns `None` on
    /// malformed entries (restart keys must have `shared == 0`).
    fn restart_key(&self, index: u32) -> Option<&[u8]> {
        let offset = self.restart_point(index);
        if offset >= self.restart_offset {
            return None;
        }
        let mut src = &self.data[offset..self.restart_offset];
        let before = src.len();
        let shared = decode_varint64(&mut src).ok()?;
        let non_shared = decode_varint64(&mut src).ok()? as usize;
        let _value_len = decode_varint64(&mut src).ok()?;
        if shared != 0 || non_shared > src.len() {
            return None;
        }
        let key_start = offset + (before - src.len());
        Some(&self.data[key_start..key_start + non_shared])
    }
}

/// Cursor over a [`Block`]. Keys are materialized (they are prefix-
/// compressed on disk); values are borrowed from the block.
pub(crate) struct BlockIter<'a> {
    block: &'a Block,
    cmp: &'a dyn Comparator,
    /// Offset of the current entry; `block.restart_offset` when invalid.
    current: usize,
    /// Offset of the first byte past the current entry.
    next_offset: usize,
    key: Vec<u8>,
    value: (usize, usize),
}

impl<'a> BlockIter<'a> {
    pub fn valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    pub fn value(&self) -> &'a [u8] {
        debug_assert!(self.valid());
        &self.block.data[self.value.0..self.value.1]
    }

    pub fn seek_to_first(&mut self) {
        self.seek_to_restart(0);
        self.parse_next();
    }

    /// Positions at the first entry with key >= `target`, or invalid if
    /// every key is smaller.
    pub fn seek(&mut self, target: &[u8]) {
        // Binary search: last restart point whose key is < target.
        let mut left = 0u32;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            match self.block.restart_key(mid) {
                Some(key) if self.cmp.compare(key, target) == Ordering::Less => left = mid,
                Some(_) => right = mid - 1,
                None => {
                    self.mark_invalid();
                    return;
                }
            }
        }
        self.seek_to_restart(left);
        // Linear scan within the restart run.
        while self.parse_next() {
            if self.cmp.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    pub fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next();
    }

    fn seek_to_restart(&mut self, index: u32) {
        self.key.clear();
        self.next_offset = self.block.restart_point(index);
        self.current = self.block.restart_offset;
    }

    fn mark_invalid(&mut self) {
        self.current = self.block.restart_offset;
        self.next_offset = self.block.restart_offset;
    }

    /// Decodes the entry at `next_offset`. Returns false (and goes
    /// invalid) at the end of the entry region or on malformed data.
    fn parse_next(&mut self) -> bool {
        let offset = self.next_offset;
        if offset >= self.block.restart_offset {
            self.mark_invalid();
            return false;
        }
        let mut src = &self.block.data[offset..self.block.restart_offset];
        let before = src.len();
        let header = (|| {
            let shared = decode_varint64(&mut src)? as usize;
            let non_shared = decode_varint64(&mut src)? as usize;
            let value_len = decode_varint64(&mut src)? as usize;
            Ok::<_, crate::Error>((shared, non_shared, value_len))
        })();
        let (shared, non_shared, value_len) = match header {
            Ok(h) => h,
            Err(_) => {
                self.mark_invalid();
                return false;
            }
        };
        if shared > self.key.len() || non_shared + value_len > src.len() {
            self.mark_invalid();
            return false;
        }

        let key_start = offset + (before - src.len());
        self.key.truncate(shared);
        self.key
            .extend_from_slice(&self.block.data[key_start..key_start + non_shared]);
        let value_start = key_start + non_shared;
        self.value = (value_start, value_start + value_len);
        self.current = offset;
        self.next_offset = value_start + value_len;
        true
    }
}
