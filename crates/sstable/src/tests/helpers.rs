//! Shared test plumbing: a strict structural parser for finished table
//! files. Every block it touches is checksum-verified, so any test that
//! goes through `parse_table` exercises trailer integrity for free.

use crate::block::Block;
use crate::comparator::BytewiseComparator;
use crate::format::{block_crc, unmask_crc, BlockHandle, CompressionType, Footer, BLOCK_TRAILER_SIZE};

/// One block as it sits in the file, plus its decoded form.
pub struct RawBlock {
    pub handle: BlockHandle,
    /// Trailer type byte (0 = raw, 1 = snappy).
    pub type_byte: u8,
    /// On-disk payload, possibly compressed.
    pub payload: Vec<u8>,
    /// Payload after decompression.
    pub contents: Vec<u8>,
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

/// A fully parsed table file.
pub struct RawTable {
    pub footer: Footer,
    /// Data blocks in file order (derived from the index entries).
    pub data_blocks: Vec<RawBlock>,
    /// Index entries: (separator key, data block handle).
    pub index: Vec<(Vec<u8>, BlockHandle)>,
    /// Metaindex entries: (name, raw handle encoding).
    pub metaindex: Vec<(Vec<u8>, Vec<u8>)>,
    pub filter_handle: Option<BlockHandle>,
}

/// Reads one framed block out of `file`, asserting trailer integrity.
pub fn read_raw_block(file: &[u8], handle: BlockHandle) -> RawBlock {
    let start = handle.offset as usize;
    let size = handle.size as usize;
    assert!(
        start + size + BLOCK_TRAILER_SIZE <= file.len(),
        "handle points outside the file"
    );
    let payload = file[start..start + size].to_vec();
    let trailer = &file[start + size..start + size + BLOCK_TRAILER_SIZE];
    let type_byte = trailer[0];
    let stored = u32::from_le_bytes([trailer[1], trailer[2], trailer[3], trailer[4]]);
    assert_eq!(
        unmask_crc(stored),
        block_crc(&payload, type_byte),
        "trailer checksum mismatch at offset {}",
        handle.offset
    );

    let contents = match CompressionType::from_byte(type_byte).expect("unknown type byte") {
        CompressionType::None => payload.clone(),
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(&payload)
            .expect("snappy payload must decode"),
    };
    let entries = decode_entries(contents.clone());
    RawBlock {
        handle,
        type_byte,
        payload,
        contents,
        entries,
    }
}

fn decode_entries(contents: Vec<u8>) -> Vec<(Vec<u8>, Vec<u8>)> {
    let block = Block::new(contents).expect("block framing must parse");
    let cmp = BytewiseComparator;
    let mut iter = block.iter(&cmp);
    let mut entries = Vec::new();
    iter.seek_to_first();
    while iter.valid() {
        entries.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next();
    }
    entries
}

/// Parses a finished table file into its structural parts, asserting
/// the checksums and framing of every block on the way.
pub fn parse_table(file: &[u8]) -> RawTable {
    assert!(file.len() >= Footer::ENCODED_LENGTH, "file too short");
    let footer = Footer::decode(&file[file.len() - Footer::ENCODED_LENGTH..])
        .expect("footer must decode");

    let index_block = read_raw_block(file, footer.index_handle);
    let mut index = Vec::new();
    for (key, value) in &index_block.entries {
        let mut src = value.as_slice();
        let handle = BlockHandle::decode_from(&mut src).expect("index value must be a handle");
        index.push((key.clone(), handle));
    }

    let data_blocks: Vec<RawBlock> = index
        .iter()
        .map(|(_, handle)| read_raw_block(file, *handle))
        .collect();

    let metaindex_block = read_raw_block(file, footer.metaindex_handle);
    let metaindex = metaindex_block.entries.clone();
    let filter_handle = metaindex
        .iter()
        .find(|(key, _)| key.starts_with(b"filter."))
        .map(|(_, value)| {
            let mut src = value.as_slice();
            BlockHandle::decode_from(&mut src).expect("metaindex value must be a handle")
        });

    RawTable {
        footer,
        data_blocks,
        index,
        metaindex,
        filter_handle,
    }
}
