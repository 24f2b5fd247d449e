//! On-disk format constants and primitives: block handles, the footer,
//! varint encoding, and the masked block checksum.

use byteorder::{ByteOrder, LittleEndian};

use crate::{Error, Result};

/// Magic identifying a shoal table file.
pub const TABLE_MAGIC: u64 = 0x5348_4f41_4c53_5354; // ASCII "SHOALSST"

/// Every block payload is followed by a 1-byte compression type and a
/// 4-byte masked CRC32 (little-endian).
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Maximum encoded length of a [`BlockHandle`]: two varint64 fields.
pub const MAX_HANDLE_ENCODED_LENGTH: usize = 10 + 10;

/// Compression applied to a block payload, recorded in its trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressionType {
    /// Payload is stored verbatim.
    None = 0,
    /// Payload is snappy-compressed.
    #[default]
    Snappy = 1,
}

impl CompressionType {
    /// Parses a trailer type byte. Unknown values mean the file was
    /// written by a newer format revision (or is corrupt).
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Snappy),
            _ => None,
        }
    }

    /// The trailer type byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

// ---- Varint encoding ----

/// Appends `value` to `dst` as a base-128 varint (7 bits per byte,
/// high bit = continuation).
pub(crate) fn encode_varint64(dst: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        dst.push((value as u8) | 0x80);
        value >>= 7;
    }
    dst.push(value as u8);
}

/// Decodes a varint64 from the front of `src`, advancing it past the
/// consumed bytes.
pub(crate) fn decode_varint64(src: &mut &[u8]) -> Result<u64> {
    let mut value = 0u64;
    for (i, &byte) in src.iter().enumerate().take(10) {
        value |= u64::from(byte & 0x7f) << (i * 7);
        if byte < 0x80 {
            *src = &src[i + 1..];
            return Ok(value);
        }
    }
    Err(Error::Corruption("bad varint64".into()))
}

// ---- Block handle ----

/// Locates a block *payload* (not its trailer) in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    /// Byte offset of the payload from the start of the file.
    pub offset: u64,
    /// Payload length in bytes, excluding the trailer.
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Appends the varint encoding of this handle to `dst`.
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        encode_varint64(dst, self.offset);
        encode_varint64(dst, self.size);
    }

    /// Decodes a handle from the front of `src`, advancing it.
    pub fn decode_from(src: &mut &[u8]) -> Result<Self> {
        let offset = decode_varint64(src)?;
        let size = decode_varint64(src)?;
        Ok(Self { offset, size })
    }
}

// ---- Footer ----

/// The footer sits at the exact end of the table file and locates the
/// metaindex and index blocks. Its fixed size lets a reader find it by
/// subtracting [`Footer::ENCODED_LENGTH`] from the file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    /// Encoded size: two maximally-padded handles plus the magic.
    pub const ENCODED_LENGTH: usize = 2 * MAX_HANDLE_ENCODED_LENGTH + 8;

    pub fn new(metaindex_handle: BlockHandle, index_handle: BlockHandle) -> Self {
        Self {
            metaindex_handle,
            index_handle,
        }
    }

    /// Encodes the footer: both handles, zero padding up to the fixed
    /// body size, then the magic.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LENGTH);
        self.metaindex_handle.encode_to(&mut buf);
        self.index_handle.encode_to(&mut buf);
        buf.resize(2 * MAX_HANDLE_ENCODED_LENGTH, 0);
        let mut magic = [0u8; 8];
        LittleEndian::write_u64(&mut magic, TABLE_MAGIC);
        buf.extend_from_slice(&magic);
        debug_assert_eq!(buf.len(), Self::ENCODED_LENGTH);
        buf
    }

    /// Decodes a footer from exactly [`Footer::ENCODED_LENGTH`] bytes,
    /// verifying the magic.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::ENCODED_LENGTH {
            return Err(Error::Corruption("footer too short".into()));
        }
        let magic = LittleEndian::read_u64(&data[Self::ENCODED_LENGTH - 8..]);
        if magic != TABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic: expected {:#x}, got {:#x}",
                TABLE_MAGIC, magic
            )));
        }
        let mut cursor = &data[..2 * MAX_HANDLE_ENCODED_LENGTH];
        let metaindex_handle = BlockHandle::decode_from(&mut cursor)?;
        let index_handle = BlockHandle::decode_from(&mut cursor)?;
        Ok(Self {
            metaindex_handle,
            index_handle,
        })
    }
}

// ---- Block checksum ----

const CRC_MASK_DELTA: u32 = 0xa282_ead8;

/// Masks a CRC so that a block's stored checksum never collides with a
/// CRC computed over bytes that themselves contain checksums (e.g. a
/// framing layer wrapping whole table files).
pub(crate) fn mask_crc(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(CRC_MASK_DELTA)
}

/// Inverse of [`mask_crc`].
pub(crate) fn unmask_crc(masked: u32) -> u32 {
    masked.wrapping_sub(CRC_MASK_DELTA).rotate_left(15)
}

/// The raw block checksum: CRC32 over (payload ‖ type byte).
pub(crate) fn block_crc(payload: &[u8], type_byte: u8) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.update(&[type_byte]);
    hasher.finalize()
}

/// The masked checksum a writer stores in a block trailer.
pub(crate) fn masked_block_crc(payload: &[u8], type_byte: u8) -> u32 {
    mask_crc(block_crc(payload, type_byte))
}
