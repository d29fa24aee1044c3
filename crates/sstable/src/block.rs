//! Prefix-compressed key/value blocks.
//!
//! Entries share a prefix with their predecessor; every
//! `restart_interval`-th entry is a *restart point* storing its key in full,
//! which is what makes binary search inside a block possible.
//!
//! ```text
//! entry:  [shared: varint32][non_shared: varint32][value_len: varint32]
//!         [key delta][value]
//! block:  [entries...][restart offsets: u32 LE each][restart count: u32 LE]
//! ```

use std::cmp::Ordering;
use std::mem;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::cmp::KeyComparator;
use crate::error::{Error, Result};
use crate::format::{read_varint32, write_varint32};

/// Builds the serialized form of a single block.
///
/// Keys must be appended in the order the block will be searched in; the
/// table builder enforces ascending order before delegating here.
pub struct BlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    counter: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    #[must_use]
    pub fn new(restart_interval: usize) -> Self {
        debug_assert!(restart_interval >= 1);
        Self {
            buffer: Vec::new(),
            restarts: vec![0],
            restart_interval,
            counter: 0,
            last_key: Vec::new(),
        }
    }

    /// Appends an entry, delta-encoding the key against its predecessor.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let shared = if self.counter < self.restart_interval {
            shared_prefix_len(&self.last_key, key)
        } else {
            // Restart point: store the full key.
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        };
        let non_shared = key.len() - shared;

        write_varint32(&mut self.buffer, shared as u32);
        write_varint32(&mut self.buffer, non_shared as u32);
        write_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Size the block would serialize to if finished now.
    #[must_use]
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Appends the restart array and returns the serialized block.
    pub fn finish(&mut self) -> Vec<u8> {
        for restart in &self.restarts {
            let mut word = [0u8; 4];
            LittleEndian::write_u32(&mut word, *restart);
            self.buffer.extend_from_slice(&word);
        }
        let mut count = [0u8; 4];
        LittleEndian::write_u32(&mut count, self.restarts.len() as u32);
        self.buffer.extend_from_slice(&count);
        mem::take(&mut self.buffer)
    }

    /// Makes the builder reusable for the next block.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    let min_len = a.len().min(b.len());
    let mut i = 0;
    while i < min_len && a[i] == b[i] {
        i += 1;
    }
    i
}

/// A decoded, immutable block.
#[derive(Debug)]
pub struct Block {
    data: Vec<u8>,
    restart_offset: usize,
    num_restarts: usize,
}

impl Block {
    /// Validates the restart array trailer and wraps the block bytes.
    pub fn new(data: Vec<u8>) -> Result<Block> {
        if data.len() < 4 {
            return Err(Error::corruption("block too small for restart count"));
        }
        let num_restarts = LittleEndian::read_u32(&data[data.len() - 4..]) as usize;
        if num_restarts == 0 {
            return Err(Error::corruption("block has no restart points"));
        }
        let max_restarts = (data.len() - 4) / 4;
        if num_restarts > max_restarts {
            return Err(Error::corruption(format!(
                "restart count {num_restarts} does not fit a {} byte block",
                data.len()
            )));
        }
        let restart_offset = data.len() - 4 - 4 * num_restarts;
        Ok(Block {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Decoded size in bytes; this is the weight charged to the block cache.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, index: usize) -> usize {
        debug_assert!(index < self.num_restarts);
        LittleEndian::read_u32(&self.data[self.restart_offset + 4 * index..]) as usize
    }

    /// Returns a cursor over the block's entries. The iterator shares
    /// ownership of the block, so it stays readable after cache eviction.
    #[must_use]
    pub fn iter(self: &Arc<Self>, comparator: Arc<dyn KeyComparator>) -> BlockIterator {
        BlockIterator {
            block: self.clone(),
            comparator,
            current: self.restart_offset,
            next_offset: 0,
            key: Vec::new(),
            value: (0, 0),
            valid: false,
        }
    }
}

/// Cursor over a decoded block.
///
/// Freshly created iterators are not positioned; call
/// [`seek_to_first`](BlockIterator::seek_to_first) or
/// [`seek`](BlockIterator::seek) before reading.
pub struct BlockIterator {
    block: Arc<Block>,
    comparator: Arc<dyn KeyComparator>,
    /// Offset of the current entry; `restart_offset` when invalid.
    current: usize,
    /// Offset of the next entry to parse.
    next_offset: usize,
    key: Vec<u8>,
    /// Current value as a range into the block data.
    value: (usize, usize),
    valid: bool,
}

impl BlockIterator {
    #[must_use]
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Current key. Only meaningful while [`valid`](BlockIterator::valid).
    #[must_use]
    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        &self.key
    }

    /// Current value. Only meaningful while [`valid`](BlockIterator::valid).
    #[must_use]
    pub fn value(&self) -> &[u8] {
        debug_assert!(self.valid);
        &self.block.data[self.value.0..self.value.1]
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        self.seek_to_restart(0);
        self.parse_next()?;
        Ok(())
    }

    /// Positions the cursor at the first entry whose key is `>= target`,
    /// or past the end when every key is smaller.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        // Binary search the restart array for the last restart whose key is
        // strictly less than the target, then scan forward from there.
        let mut left = 0usize;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let restart_key = self.key_at_restart(mid)?;
            if self.comparator.compare(restart_key, target) == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        self.seek_to_restart(left);
        loop {
            if !self.parse_next()? {
                return Ok(());
            }
            if self.comparator.compare(&self.key, target) != Ordering::Less {
                return Ok(());
            }
        }
    }

    /// Advances to the next entry; returns `false` when the block is
    /// exhausted (the cursor becomes invalid).
    pub fn next(&mut self) -> Result<bool> {
        debug_assert!(self.valid);
        self.parse_next()
    }

    fn seek_to_restart(&mut self, index: usize) {
        self.key.clear();
        self.value = (0, 0);
        self.valid = false;
        self.next_offset = self.block.restart_point(index);
        self.current = self.block.restart_offset;
    }

    /// Full key stored at restart point `index`.
    fn key_at_restart(&self, index: usize) -> Result<&[u8]> {
        let offset = self.block.restart_point(index);
        let data = &self.block.data;
        let (shared, pos) = read_varint32(data, offset)?;
        if shared != 0 {
            return Err(Error::corruption("restart point key is delta-encoded"));
        }
        let (non_shared, pos) = read_varint32(data, pos)?;
        let (_value_len, pos) = read_varint32(data, pos)?;
        let end = pos + non_shared as usize;
        if end > self.block.restart_offset {
            return Err(Error::corruption("restart point key overruns block"));
        }
        Ok(&data[pos..end])
    }

    fn parse_next(&mut self) -> Result<bool> {
        if self.next_offset >= self.block.restart_offset {
            self.valid = false;
            self.current = self.block.restart_offset;
            return Ok(false);
        }

        self.current = self.next_offset;
        let data = &self.block.data;
        let (shared, pos) = read_varint32(data, self.current)?;
        let (non_shared, pos) = read_varint32(data, pos)?;
        let (value_len, pos) = read_varint32(data, pos)?;

        let shared = shared as usize;
        if shared > self.key.len() {
            return Err(Error::corruption(
                "entry shares more bytes than the previous key has",
            ));
        }
        let key_end = pos + non_shared as usize;
        let value_end = key_end + value_len as usize;
        if value_end > self.block.restart_offset {
            return Err(Error::corruption("entry overruns block data"));
        }

        self.key.truncate(shared);
        self.key.extend_from_slice(&data[pos..key_end]);
        self.value = (key_end, value_end);
        self.next_offset = value_end;
        self.valid = true;
        Ok(true)
    }
}
