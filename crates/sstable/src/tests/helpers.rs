//! In-memory file stand-ins and table fixtures shared across test modules.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::cmp::{BytewiseComparator, KeyComparator};
use crate::env::{RandomInputFile, WritableFile};
use crate::error::{Error, Result};
use crate::reader::{BlockCache, Table};
use crate::writer::TableBuilder;
use config::Options;

/// [`WritableFile`] accumulating into a shared buffer.
pub struct MemOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemOutput {
    pub fn new() -> (MemOutput, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        (
            MemOutput {
                buffer: buffer.clone(),
            },
            buffer,
        )
    }
}

impl WritableFile for MemOutput {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn force(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// [`RandomInputFile`] over owned bytes, counting reads and closes.
pub struct MemInput {
    data: Vec<u8>,
    pub reads: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl MemInput {
    pub fn new(data: Vec<u8>) -> MemInput {
        MemInput {
            data,
            reads: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl RandomInputFile for MemInput {
    fn size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let offset = offset as usize;
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::corruption("read past end of file"))?;
        Ok(self.data[offset..end].to_vec())
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn bytewise() -> Arc<dyn KeyComparator> {
    Arc::new(BytewiseComparator)
}

/// Serializes `entries` (must be ascending) into table bytes.
pub fn build_table(options: &Options, entries: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let (file, buffer) = MemOutput::new();
    let mut builder = TableBuilder::new(options, Box::new(file), bytewise()).unwrap();
    for (key, value) in entries {
        builder.add(key, value).unwrap();
    }
    builder.finish().unwrap();
    let bytes = buffer.lock().unwrap().clone();
    bytes
}

/// Opens table bytes through a [`MemInput`], returning the table plus its
/// read/close counters.
pub fn open_table(
    options: &Options,
    bytes: Vec<u8>,
    block_cache: Option<Arc<BlockCache>>,
) -> (Arc<Table>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let input = MemInput::new(bytes);
    let reads = input.reads.clone();
    let closes = input.closes.clone();
    let table = Table::open(Box::new(input), options, bytewise(), block_cache).unwrap();
    (Arc::new(table), reads, closes)
}

/// The spec's canonical fixture: zero-padded ascending keys with 64-byte
/// values.
pub fn padded_entries(count: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    (1..=count)
        .map(|i| {
            let key = format!("{i:017}").into_bytes();
            let value = vec![b'a' + (i % 26) as u8; 64];
            (key, value)
        })
        .collect()
}
