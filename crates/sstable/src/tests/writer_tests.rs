use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Error;
use crate::format::{Footer, TABLE_MAGIC_NUMBER};
use crate::tests::helpers::{build_table, bytewise, open_table, padded_entries, MemOutput};
use crate::writer::TableBuilder;
use config::{CompressionType, Options};

fn options() -> Options {
    Options {
        block_cache_bytes: 0,
        ..Options::default()
    }
}

// -------------------- State machine --------------------

#[test]
fn add_after_finish_is_a_state_error() {
    let (file, _) = MemOutput::new();
    let mut builder = TableBuilder::new(&options(), Box::new(file), bytewise()).unwrap();
    builder.add(b"a", b"1").unwrap();
    builder.finish().unwrap();
    assert!(matches!(builder.add(b"b", b"2"), Err(Error::State(_))));
    assert!(matches!(builder.finish(), Err(Error::State(_))));
}

#[test]
fn add_after_abandon_is_a_state_error() {
    let (file, buffer) = MemOutput::new();
    let mut builder = TableBuilder::new(&options(), Box::new(file), bytewise()).unwrap();
    builder.add(b"a", b"1").unwrap();
    builder.abandon();
    assert!(matches!(builder.add(b"b", b"2"), Err(Error::State(_))));
    assert!(matches!(builder.finish(), Err(Error::State(_))));
    // Nothing was flushed and no footer was written.
    assert!(buffer.lock().unwrap().is_empty());
}

#[test]
fn out_of_order_keys_are_rejected_immediately() {
    let (file, _) = MemOutput::new();
    let mut builder = TableBuilder::new(&options(), Box::new(file), bytewise()).unwrap();
    builder.add(b"banana", b"1").unwrap();
    assert!(matches!(builder.add(b"apple", b"2"), Err(Error::State(_))));
    // Equal keys are just as illegal as descending ones.
    assert!(matches!(builder.add(b"banana", b"3"), Err(Error::State(_))));
}

#[test]
fn invalid_options_fail_at_construction() {
    let (file, _) = MemOutput::new();
    let bad = Options {
        block_size: 0,
        ..options()
    };
    assert!(matches!(
        TableBuilder::new(&bad, Box::new(file), bytewise()),
        Err(Error::Config(_))
    ));
}

// -------------------- Accounting --------------------

#[test]
fn entry_count_and_file_size_track_progress() {
    let (file, buffer) = MemOutput::new();
    let mut builder = TableBuilder::new(&options(), Box::new(file), bytewise()).unwrap();
    assert_eq!(builder.entry_count(), 0);
    assert_eq!(builder.file_size(), 0);

    for (key, value) in padded_entries(10) {
        builder.add(&key, &value).unwrap();
    }
    assert_eq!(builder.entry_count(), 10);

    builder.finish().unwrap();
    let written = buffer.lock().unwrap().len() as u64;
    assert_eq!(builder.file_size(), written);
}

// -------------------- Output shape --------------------

#[test]
fn finished_file_ends_with_the_magic_number() {
    let bytes = build_table(&options(), &padded_entries(5));
    assert!(bytes.len() >= Footer::ENCODED_LENGTH);
    let magic = LittleEndian::read_u64(&bytes[bytes.len() - 8..]);
    assert_eq!(magic, TABLE_MAGIC_NUMBER);
    // And the footer as a whole parses.
    Footer::decode(&bytes[bytes.len() - Footer::ENCODED_LENGTH..]).unwrap();
}

#[test]
fn empty_table_still_carries_metaindex_index_and_footer() {
    let bytes = build_table(&options(), &[]);
    let footer = Footer::decode(&bytes[bytes.len() - Footer::ENCODED_LENGTH..]).unwrap();
    assert!(footer.index_handle.offset >= footer.metaindex_handle.offset);

    let (table, _, _) = open_table(&options(), bytes, None);
    assert_eq!(table.get(b"anything").unwrap(), None);
    let mut iter = table.iter().unwrap();
    iter.seek_to_first().unwrap();
    assert!(!iter.valid());
}

#[test]
fn small_block_size_produces_multiple_blocks_with_separator_index() {
    // Force a flush after nearly every entry.
    let opts = Options {
        block_size: 64,
        ..options()
    };
    let entries = padded_entries(50);
    let bytes = build_table(&opts, &entries);
    let (table, _, _) = open_table(&opts, bytes, None);

    // Walk the index block: each separator key must be >= every key of the
    // block it closes and < the first key of the block that follows.
    let cmp = bytewise();
    let mut index_iter = table.index_block().iter(cmp.clone());
    index_iter.seek_to_first().unwrap();
    let mut separators = Vec::new();
    while index_iter.valid() {
        separators.push(index_iter.key().to_vec());
        index_iter.next().unwrap();
    }
    assert!(separators.len() >= 2, "expected several data blocks");

    let mut iter = table.iter().unwrap();
    iter.seek_to_first().unwrap();
    let mut block = 0usize;
    for (key, _) in &entries {
        assert!(iter.valid());
        while cmp.compare(iter.key(), &separators[block]) == Ordering::Greater {
            block += 1;
        }
        assert_eq!(iter.key(), key.as_slice());
        iter.next().unwrap();
    }
    assert_eq!(block, separators.len() - 1, "last separator closes the table");
}

#[test]
fn compressed_tables_are_smaller_and_still_finish() {
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..200)
        .map(|i| (format!("{i:08}").into_bytes(), vec![b'x'; 128]))
        .collect();
    let plain = build_table(&options(), &entries);
    for compression in [CompressionType::Snappy, CompressionType::Lz4] {
        let opts = Options {
            compression,
            ..options()
        };
        let compressed = build_table(&opts, &entries);
        assert!(
            compressed.len() < plain.len(),
            "{compression} produced {} >= {}",
            compressed.len(),
            plain.len()
        );
    }
}
