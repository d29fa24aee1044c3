//! Filter blocks: one filter per 2 KiB range of data-block offsets.
//!
//! ```text
//! [filter 0][filter 1]...[filter N-1]
//! [offset of filter 0: u32 LE]...[offset of filter N-1: u32 LE]
//! [offset of the offset array: u32 LE][base_lg: u8]
//! ```
//!
//! A lookup maps the data block's file offset to a filter index by shifting
//! right `base_lg` bits, then probes that filter.

use std::mem;
use std::sync::Arc;

use bloom::FilterPolicy;
use byteorder::{ByteOrder, LittleEndian};

/// Filter granularity: one filter per `1 << FILTER_BASE_LG` bytes of file.
pub const FILTER_BASE_LG: u8 = 11;

const FILTER_BASE: u64 = 1 << FILTER_BASE_LG;

/// Accumulates keys and emits the table's filter block.
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    /// Keys added since the last generated filter.
    keys: Vec<Vec<u8>>,
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    #[must_use]
    pub fn new(policy: Arc<dyn FilterPolicy>) -> Self {
        Self {
            policy,
            keys: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.policy.name()
    }

    /// Notes that a data block begins at `block_offset`, generating filters
    /// for every 2 KiB boundary crossed since the previous block.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = block_offset / FILTER_BASE;
        debug_assert!(filter_index >= self.filter_offsets.len() as u64);
        while (self.filter_offsets.len() as u64) < filter_index {
            self.generate_filter();
        }
    }

    pub fn add_key(&mut self, key: &[u8]) {
        self.keys.push(key.to_vec());
    }

    /// Emits the serialized filter block.
    pub fn finish(&mut self) -> Vec<u8> {
        if !self.keys.is_empty() {
            self.generate_filter();
        }

        let array_offset = self.result.len() as u32;
        let mut out = mem::take(&mut self.result);
        let mut word = [0u8; 4];
        for offset in &self.filter_offsets {
            LittleEndian::write_u32(&mut word, *offset);
            out.extend_from_slice(&word);
        }
        LittleEndian::write_u32(&mut word, array_offset);
        out.extend_from_slice(&word);
        out.push(FILTER_BASE_LG);
        out
    }

    fn generate_filter(&mut self) {
        self.filter_offsets.push(self.result.len() as u32);
        if self.keys.is_empty() {
            // Ranges with no keys get a zero-length filter; the reader treats
            // them as a definite miss.
            return;
        }
        let key_refs: Vec<&[u8]> = self.keys.iter().map(Vec::as_slice).collect();
        let filter = self.policy.create_filter(&key_refs);
        self.result.extend_from_slice(&filter);
        self.keys.clear();
    }
}

/// Probes a decoded filter block.
pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Vec<u8>,
    /// Byte position of the offset array; also the total filter byte count.
    array_offset: usize,
    num_filters: usize,
    base_lg: u8,
}

impl FilterBlockReader {
    /// Parses a filter block. Returns `None` when the framing is malformed;
    /// the caller then proceeds without a filter rather than risking false
    /// negatives.
    #[must_use]
    pub fn new(policy: Arc<dyn FilterPolicy>, contents: Vec<u8>) -> Option<FilterBlockReader> {
        let n = contents.len();
        if n < 5 {
            return None;
        }
        let base_lg = contents[n - 1];
        let array_offset = LittleEndian::read_u32(&contents[n - 5..n - 1]) as usize;
        if array_offset > n - 5 {
            return None;
        }
        let num_filters = (n - 5 - array_offset) / 4;
        Some(FilterBlockReader {
            policy,
            data: contents,
            array_offset,
            num_filters,
            base_lg,
        })
    }

    /// Returns `false` only when `key` is definitely absent from the data
    /// block starting at `block_offset`.
    #[must_use]
    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index >= self.num_filters {
            return true;
        }

        let start =
            LittleEndian::read_u32(&self.data[self.array_offset + 4 * index..]) as usize;
        // One past the last offset lands on the array-offset word itself,
        // which equals the total filter length: exactly the limit we need.
        let limit =
            LittleEndian::read_u32(&self.data[self.array_offset + 4 * index + 4..]) as usize;

        if start > limit || limit > self.array_offset {
            // Malformed framing: err on the side of a match.
            return true;
        }
        if start == limit {
            // No keys were ever added for this range.
            return false;
        }
        self.policy.key_may_match(key, &self.data[start..limit])
    }
}
