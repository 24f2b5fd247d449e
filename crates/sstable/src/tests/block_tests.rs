use byteorder::{ByteOrder, LittleEndian};

use crate::block::{Block, BlockBuilder};
use crate::comparator::BytewiseComparator;

fn entries(payload: Vec<u8>) -> Vec<(Vec<u8>, Vec<u8>)> {
    let block = Block::new(payload).unwrap();
    let cmp = BytewiseComparator;
    let mut iter = block.iter(&cmp);
    let mut out = Vec::new();
    iter.seek_to_first();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next();
    }
    out
}

fn num_restarts(payload: &[u8]) -> u32 {
    LittleEndian::read_u32(&payload[payload.len() - 4..])
}

// -------------------- Building --------------------

#[test]
fn new_builder_is_empty() {
    let builder = BlockBuilder::new(16);
    assert!(builder.is_empty());
}

#[test]
fn empty_block_is_just_the_restart_array() {
    let mut builder = BlockBuilder::new(16);
    let payload = builder.finish();
    // One restart offset (0) plus the count.
    assert_eq!(payload.len(), 8);
    assert_eq!(num_restarts(&payload), 1);
    assert!(entries(payload).is_empty());
}

#[test]
fn single_entry_round_trips() {
    let mut builder = BlockBuilder::new(16);
    builder.add(b"key", b"value");
    assert!(!builder.is_empty());
    let decoded = entries(builder.finish());
    assert_eq!(decoded, vec![(b"key".to_vec(), b"value".to_vec())]);
}

#[test]
fn entries_come_back_in_insertion_order() {
    let input = vec![
        (b"aaa".to_vec(), b"value1".to_vec()),
        (b"aab".to_vec(), b"value2".to_vec()),
        (b"abc".to_vec(), b"".to_vec()),
        (b"bbb".to_vec(), b"value4".to_vec()),
    ];
    let mut builder = BlockBuilder::new(16);
    for (key, value) in &input {
        builder.add(key, value);
    }
    assert_eq!(entries(builder.finish()), input);
}

#[test]
fn prefix_compression_shrinks_shared_keys() {
    let keys: Vec<String> = (0..32).map(|i| format!("common_prefix_{:04}", i)).collect();

    let mut compressed = BlockBuilder::new(16);
    let mut anchored = BlockBuilder::new(1); // every entry stored whole
    for key in &keys {
        compressed.add(key.as_bytes(), b"v");
        anchored.add(key.as_bytes(), b"v");
    }
    let compressed = compressed.finish();
    let anchored = anchored.finish();
    assert!(
        compressed.len() < anchored.len(),
        "{} bytes with sharing vs {} without",
        compressed.len(),
        anchored.len()
    );
    // Both decode to the same records.
    assert_eq!(entries(compressed), entries(anchored));
}

#[test]
fn restart_interval_controls_anchor_count() {
    let mut builder = BlockBuilder::new(2);
    for i in 0..6 {
        let key = format!("key_{:02}", i);
        builder.add(key.as_bytes(), b"v");
    }
    // Entries 0-1, 2-3, 4-5 -> three anchors.
    assert_eq!(num_restarts(&builder.finish()), 3);
}

#[test]
fn interval_one_anchors_every_entry() {
    let mut builder = BlockBuilder::new(1);
    for i in 0..5 {
        let key = format!("k{}", i);
        builder.add(key.as_bytes(), b"v");
    }
    assert_eq!(num_restarts(&builder.finish()), 5);
}

#[test]
fn size_estimate_matches_finished_payload() {
    let mut builder = BlockBuilder::new(4);
    for i in 0..20 {
        let key = format!("key_{:03}", i);
        builder.add(key.as_bytes(), &[b'v'; 10]);
    }
    let estimate = builder.current_size_estimate();
    let payload = builder.finish();
    assert_eq!(estimate, payload.len());
}

#[test]
fn reset_clears_state_for_reuse() {
    let mut builder = BlockBuilder::new(16);
    builder.add(b"key1", b"value1");
    builder.finish();

    builder.reset();
    assert!(builder.is_empty());

    builder.add(b"key2", b"value2");
    let decoded = entries(builder.finish());
    assert_eq!(decoded, vec![(b"key2".to_vec(), b"value2".to_vec())]);
}

// -------------------- Seeking --------------------

#[test]
fn seek_lands_on_the_first_key_not_below_target() {
    let mut builder = BlockBuilder::new(2);
    let keys: Vec<String> = (0..10).map(|i| format!("key_{:02}", i)).collect();
    for key in &keys {
        builder.add(key.as_bytes(), b"v");
    }
    let block = Block::new(builder.finish()).unwrap();
    let cmp = BytewiseComparator;
    let mut iter = block.iter(&cmp);

    // Exact hit.
    iter.seek(b"key_05");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"key_05");

    // Between keys: lands on the next one.
    iter.seek(b"key_04x");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"key_05");

    // Before the first key.
    iter.seek(b"aaa");
    assert!(iter.valid());
    assert_eq!(iter.key(), b"key_00");

    // Past the last key.
    iter.seek(b"zzz");
    assert!(!iter.valid());
}

#[test]
fn seek_then_next_walks_the_tail() {
    let mut builder = BlockBuilder::new(3);
    for i in 0..9 {
        let key = format!("k{}", i);
        builder.add(key.as_bytes(), format!("v{}", i).as_bytes());
    }
    let block = Block::new(builder.finish()).unwrap();
    let cmp = BytewiseComparator;
    let mut iter = block.iter(&cmp);

    iter.seek(b"k6");
    let mut tail = Vec::new();
    while iter.valid() {
        tail.push(iter.key().to_vec());
        iter.next();
    }
    assert_eq!(tail, vec![b"k6".to_vec(), b"k7".to_vec(), b"k8".to_vec()]);
}

// -------------------- Malformed payloads --------------------

#[test]
fn short_payload_is_rejected() {
    assert!(Block::new(vec![0u8; 3]).is_err());
}

#[test]
fn oversized_restart_array_is_rejected() {
    // Claims 100 restart points in a 12-byte payload.
    let mut payload = vec![0u8; 8];
    let mut count = [0u8; 4];
    LittleEndian::write_u32(&mut count, 100);
    payload.extend_from_slice(&count);
    assert!(Block::new(payload).is_err());
}

#[test]
fn zero_restart_count_is_rejected() {
    // A builder always records at least one anchor.
    assert!(Block::new(vec![0u8; 4]).is_err());
}
