use crate::format::{
    block_crc, decode_varint64, encode_varint64, mask_crc, masked_block_crc, unmask_crc,
    BlockHandle, CompressionType, Footer, MAX_HANDLE_ENCODED_LENGTH, TABLE_MAGIC,
};
use crate::Error;

// -------------------- Varints --------------------

#[test]
fn varint_round_trips() {
    for value in [
        0u64,
        1,
        127,
        128,
        255,
        256,
        16_383,
        16_384,
        1 << 30,
        u64::from(u32::MAX),
        u64::MAX,
    ] {
        let mut buf = Vec::new();
        encode_varint64(&mut buf, value);
        let mut src = buf.as_slice();
        assert_eq!(decode_varint64(&mut src).unwrap(), value);
        assert!(src.is_empty(), "decoder must consume exactly the encoding");
    }
}

#[test]
fn varint_single_byte_boundary() {
    let mut buf = Vec::new();
    encode_varint64(&mut buf, 127);
    assert_eq!(buf.len(), 1);
    buf.clear();
    encode_varint64(&mut buf, 128);
    assert_eq!(buf.len(), 2);
}

#[test]
fn varint_decode_advances_past_each_value() {
    let mut buf = Vec::new();
    encode_varint64(&mut buf, 300);
    encode_varint64(&mut buf, 7);
    let mut src = buf.as_slice();
    assert_eq!(decode_varint64(&mut src).unwrap(), 300);
    assert_eq!(decode_varint64(&mut src).unwrap(), 7);
    assert!(src.is_empty());
}

#[test]
fn varint_decode_rejects_truncation() {
    let mut src: &[u8] = &[0x80]; // continuation bit with nothing after
    assert!(decode_varint64(&mut src).is_err());
}

// -------------------- Block handles --------------------

#[test]
fn handle_round_trips() {
    let handle = BlockHandle::new(4096, 512);
    let mut buf = Vec::new();
    handle.encode_to(&mut buf);
    assert!(buf.len() <= MAX_HANDLE_ENCODED_LENGTH);

    let mut src = buf.as_slice();
    assert_eq!(BlockHandle::decode_from(&mut src).unwrap(), handle);
    assert!(src.is_empty());
}

#[test]
fn handle_round_trips_at_extremes() {
    let handle = BlockHandle::new(u64::MAX, u64::MAX);
    let mut buf = Vec::new();
    handle.encode_to(&mut buf);
    assert_eq!(buf.len(), MAX_HANDLE_ENCODED_LENGTH);
    let mut src = buf.as_slice();
    assert_eq!(BlockHandle::decode_from(&mut src).unwrap(), handle);
}

// -------------------- Footer --------------------

#[test]
fn footer_round_trips() {
    let footer = Footer::new(BlockHandle::new(100, 200), BlockHandle::new(300, 400));
    let encoded = footer.encode();
    assert_eq!(encoded.len(), Footer::ENCODED_LENGTH);
    assert_eq!(encoded[encoded.len() - 8..], TABLE_MAGIC.to_le_bytes());
    assert_eq!(Footer::decode(&encoded).unwrap(), footer);
}

#[test]
fn footer_rejects_bad_magic() {
    let mut encoded = Footer::new(BlockHandle::default(), BlockHandle::default()).encode();
    let at = encoded.len() - 3;
    encoded[at] ^= 0xff;
    let err = Footer::decode(&encoded).unwrap_err();
    assert!(matches!(err, Error::Corruption(msg) if msg.contains("bad magic")));
}

#[test]
fn footer_rejects_short_input() {
    assert!(Footer::decode(&[0u8; Footer::ENCODED_LENGTH - 1]).is_err());
}

// -------------------- Compression types --------------------

#[test]
fn compression_type_round_trips() {
    for ty in [CompressionType::None, CompressionType::Snappy] {
        assert_eq!(CompressionType::from_byte(ty.to_byte()), Some(ty));
    }
    assert_eq!(CompressionType::from_byte(2), None);
    assert_eq!(CompressionType::from_byte(0xff), None);
}

// -------------------- Checksums --------------------

#[test]
fn crc_mask_is_invertible_and_nontrivial() {
    for crc in [0u32, 1, 0xdead_beef, u32::MAX] {
        let masked = mask_crc(crc);
        assert_ne!(masked, crc, "masking must displace the checksum");
        assert_eq!(unmask_crc(masked), crc);
    }
}

#[test]
fn block_crc_covers_the_type_byte() {
    let payload = b"some block payload";
    assert_ne!(block_crc(payload, 0), block_crc(payload, 1));
    assert_eq!(masked_block_crc(payload, 0), mask_crc(block_crc(payload, 0)));
}
