use std::sync::Arc;

use crate::block::{Block, BlockBuilder};
use crate::compress::{self, encode_block, decode_block};
use crate::error::Error;
use crate::filter_block::{FilterBlockBuilder, FilterBlockReader};
use crate::format::BlockTrailer;
use crate::tests::helpers::bytewise;
use bloom::BloomFilterPolicy;
use config::CompressionType;

fn build_block(entries: &[(&[u8], &[u8])], restart_interval: usize) -> Arc<Block> {
    let mut builder = BlockBuilder::new(restart_interval);
    for (key, value) in entries {
        builder.add(key, value);
    }
    Arc::new(Block::new(builder.finish()).unwrap())
}

// -------------------- Builder & iterator --------------------

#[test]
fn empty_block_yields_an_empty_iterator() {
    let block = build_block(&[], 16);
    let mut iter = block.iter(bytewise());
    iter.seek_to_first().unwrap();
    assert!(!iter.valid());
    iter.seek(b"anything").unwrap();
    assert!(!iter.valid());
}

#[test]
fn entries_round_trip_in_order() {
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..100)
        .map(|i| (format!("key{i:03}").into_bytes(), format!("value{i}").into_bytes()))
        .collect();
    let refs: Vec<(&[u8], &[u8])> = entries
        .iter()
        .map(|(k, v)| (k.as_slice(), v.as_slice()))
        .collect();
    let block = build_block(&refs, 4);

    let mut iter = block.iter(bytewise());
    iter.seek_to_first().unwrap();
    for (key, value) in &entries {
        assert!(iter.valid());
        assert_eq!(iter.key(), key.as_slice());
        assert_eq!(iter.value(), value.as_slice());
        iter.next().unwrap();
    }
    assert!(!iter.valid());
}

#[test]
fn prefix_compression_shrinks_shared_keys() {
    let long_prefix = b"application/component/subcomponent/";
    let mut compressed = BlockBuilder::new(16);
    let mut naive = 0usize;
    for i in 0..64 {
        let key = [&long_prefix[..], format!("{i:04}").as_bytes()].concat();
        naive += key.len() + 5;
        compressed.add(&key, b"x");
    }
    assert!(compressed.current_size_estimate() < naive);
}

#[test]
fn seek_finds_exact_and_following_keys() {
    let block = build_block(
        &[
            (b"apple", b"1"),
            (b"banana", b"2"),
            (b"cherry", b"3"),
            (b"damson", b"4"),
        ],
        2,
    );
    let mut iter = block.iter(bytewise());

    iter.seek(b"banana").unwrap();
    assert!(iter.valid());
    assert_eq!(iter.key(), b"banana");

    // Between two keys: lands on the next one.
    iter.seek(b"blueberry").unwrap();
    assert!(iter.valid());
    assert_eq!(iter.key(), b"cherry");

    // Before the first key.
    iter.seek(b"a").unwrap();
    assert!(iter.valid());
    assert_eq!(iter.key(), b"apple");

    // Past the last key.
    iter.seek(b"zucchini").unwrap();
    assert!(!iter.valid());
}

#[test]
fn seek_works_across_many_restart_points() {
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..200)
        .map(|i| (format!("{i:05}").into_bytes(), vec![b'v']))
        .collect();
    let refs: Vec<(&[u8], &[u8])> = entries
        .iter()
        .map(|(k, v)| (k.as_slice(), v.as_slice()))
        .collect();
    let block = build_block(&refs, 3);

    let mut iter = block.iter(bytewise());
    for (key, _) in &entries {
        iter.seek(key).unwrap();
        assert!(iter.valid());
        assert_eq!(iter.key(), key.as_slice());
    }
}

#[test]
fn restart_interval_one_stores_every_key_in_full() {
    // With interval 1 every entry is a restart point: seeking must still
    // behave and delta encoding never kicks in.
    let block = build_block(&[(b"aa", b"1"), (b"ab", b"2"), (b"ac", b"3")], 1);
    let mut iter = block.iter(bytewise());
    iter.seek(b"ab").unwrap();
    assert_eq!(iter.key(), b"ab");
    assert_eq!(iter.value(), b"2");
}

#[test]
fn builder_reset_clears_state() {
    let mut builder = BlockBuilder::new(4);
    builder.add(b"k1", b"v1");
    let first = builder.finish();
    builder.reset();
    builder.add(b"k1", b"v1");
    let second = builder.finish();
    assert_eq!(first, second);
}

// -------------------- Malformed blocks --------------------

#[test]
fn undersized_block_is_corruption() {
    assert!(matches!(Block::new(vec![0, 0]), Err(Error::Corruption(_))));
}

#[test]
fn zero_restart_count_is_corruption() {
    assert!(matches!(
        Block::new(vec![0, 0, 0, 0]),
        Err(Error::Corruption(_))
    ));
}

#[test]
fn oversized_restart_count_is_corruption() {
    // Claims 1000 restarts in an 8-byte block.
    let mut data = vec![0u8; 4];
    data.extend_from_slice(&1000u32.to_le_bytes());
    assert!(matches!(Block::new(data), Err(Error::Corruption(_))));
}

// -------------------- Block codec & compression --------------------

fn frame(payload: &[u8], trailer: &BlockTrailer) -> Vec<u8> {
    let mut framed = payload.to_vec();
    framed.extend_from_slice(&trailer.encode());
    framed
}

#[test]
fn uncompressed_block_round_trips() {
    let raw = b"hello block codec".to_vec();
    let (payload, trailer) = encode_block(&raw, None);
    assert_eq!(trailer.compression_tag, CompressionType::None.tag());
    assert_eq!(payload, raw);
    assert_eq!(decode_block(&frame(&payload, &trailer), true).unwrap(), raw);
}

#[test]
fn compressible_block_round_trips_under_each_codec() {
    let raw = vec![b'z'; 4096];
    for ty in [CompressionType::Snappy, CompressionType::Lz4] {
        let compressor = compress::require_compressor(ty).unwrap();
        let (payload, trailer) = encode_block(&raw, Some(&compressor));
        assert_eq!(trailer.compression_tag, ty.tag(), "codec {ty}");
        assert!(payload.len() < raw.len());
        assert_eq!(
            compress::uncompressed_length(ty, &payload).unwrap(),
            raw.len()
        );
        assert_eq!(decode_block(&frame(&payload, &trailer), true).unwrap(), raw);
    }
}

#[test]
fn incompressible_block_is_stored_raw() {
    // A pseudo-random byte soup compresses poorly; the 12.5% rule must keep
    // it uncompressed.
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let raw: Vec<u8> = (0..1024)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect();
    let compressor = compress::require_compressor(CompressionType::Snappy).unwrap();
    let (payload, trailer) = encode_block(&raw, Some(&compressor));
    assert_eq!(trailer.compression_tag, CompressionType::None.tag());
    assert_eq!(payload, raw);
}

#[test]
fn flipped_payload_byte_fails_the_checksum() {
    let raw = b"integrity matters".to_vec();
    let (payload, trailer) = encode_block(&raw, None);
    let mut framed = frame(&payload, &trailer);
    framed[3] ^= 0x01;
    let err = decode_block(&framed, true).unwrap_err();
    assert!(matches!(err, Error::Corruption(_)));
    assert!(err.to_string().contains("checksum"));

    // With verification off the flip sails through (the caller asked for it).
    assert!(decode_block(&framed, false).is_ok());
}

#[test]
fn unknown_compression_tag_is_corruption() {
    let raw = b"payload".to_vec();
    let (payload, mut trailer) = encode_block(&raw, None);
    trailer.compression_tag = 9;
    // Recompute the checksum so only the tag is wrong.
    trailer.checksum = crate::format::block_checksum(&payload, 9);
    let err = decode_block(&frame(&payload, &trailer), true).unwrap_err();
    assert!(matches!(err, Error::Corruption(_)));
    assert!(err.to_string().contains("compression tag"));
}

#[test]
fn requiring_none_compression_is_a_configuration_error() {
    assert!(!compress::is_available(CompressionType::None));
    assert!(compress::try_compressor(CompressionType::None).is_none());
    assert!(matches!(
        compress::require_compressor(CompressionType::None),
        Err(Error::Config(_))
    ));
    assert!(compress::is_available(CompressionType::Snappy));
    assert!(compress::is_available(CompressionType::Lz4));
}

// -------------------- Filter blocks --------------------

fn policy() -> Arc<BloomFilterPolicy> {
    Arc::new(BloomFilterPolicy::new(10))
}

#[test]
fn empty_filter_block_never_rejects() {
    let mut builder = FilterBlockBuilder::new(policy());
    let contents = builder.finish();
    let reader = FilterBlockReader::new(policy(), contents).unwrap();
    assert!(reader.key_may_match(0, b"foo"));
    assert!(reader.key_may_match(100_000, b"foo"));
}

#[test]
fn single_chunk_filter_matches_its_keys() {
    let mut builder = FilterBlockBuilder::new(policy());
    builder.start_block(100);
    builder.add_key(b"foo");
    builder.add_key(b"bar");
    builder.add_key(b"box");
    builder.start_block(200);
    builder.add_key(b"box");
    builder.start_block(300);
    builder.add_key(b"hello");
    let contents = builder.finish();

    let reader = FilterBlockReader::new(policy(), contents).unwrap();
    for key in [b"foo".as_slice(), b"bar", b"box", b"hello"] {
        assert!(reader.key_may_match(100, key));
    }
    assert!(!reader.key_may_match(100, b"missing"));
    assert!(!reader.key_may_match(100, b"other"));
}

#[test]
fn multi_chunk_filters_partition_by_offset() {
    let mut builder = FilterBlockBuilder::new(policy());

    // First filter chunk (offsets 0..2048).
    builder.start_block(0);
    builder.add_key(b"alpha");
    builder.start_block(512);
    builder.add_key(b"bravo");

    // Second chunk (2048..4096).
    builder.start_block(3000);
    builder.add_key(b"charlie");

    // Fourth chunk (6144..); the third stays empty.
    builder.start_block(7000);
    builder.add_key(b"delta");

    let contents = builder.finish();
    let reader = FilterBlockReader::new(policy(), contents).unwrap();

    assert!(reader.key_may_match(0, b"alpha"));
    assert!(reader.key_may_match(1024, b"bravo"));
    assert!(!reader.key_may_match(0, b"charlie"));
    assert!(!reader.key_may_match(0, b"delta"));

    assert!(reader.key_may_match(3000, b"charlie"));
    assert!(!reader.key_may_match(3000, b"alpha"));

    // The empty third chunk is a definite miss for everything.
    assert!(!reader.key_may_match(4100, b"alpha"));
    assert!(!reader.key_may_match(4100, b"charlie"));

    assert!(reader.key_may_match(7000, b"delta"));
    assert!(!reader.key_may_match(7000, b"alpha"));
}

#[test]
fn malformed_filter_block_is_rejected_up_front() {
    assert!(FilterBlockReader::new(policy(), vec![]).is_none());
    assert!(FilterBlockReader::new(policy(), vec![1, 2, 3]).is_none());
    // Array offset pointing past the end.
    let mut bogus = vec![0u8; 8];
    bogus.extend_from_slice(&100u32.to_le_bytes());
    bogus.push(11);
    assert!(FilterBlockReader::new(policy(), bogus).is_none());
}
