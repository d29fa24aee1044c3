//! Iteration primitives: the two-level table iterator and an in-memory
//! sorted child for composing merges.

use std::sync::Arc;

use crate::block::BlockIterator;
use crate::cmp::KeyComparator;
use crate::error::Result;
use crate::format::BlockHandle;
use crate::reader::TableHandle;

/// Two-level cursor over a table: the outer level walks the index block,
/// the inner level lazily opens each referenced data block as the outer
/// cursor advances. This is the primitive every multi-table read composes on.
///
/// The iterator holds its own table reference, so it keeps working after the
/// table is evicted from the table cache.
pub struct TableIterator {
    handle: TableHandle,
    index_iter: BlockIterator,
    data_iter: Option<BlockIterator>,
}

impl TableIterator {
    pub(crate) fn new(handle: TableHandle) -> TableIterator {
        let index_iter = handle.index_block().iter(handle.comparator());
        TableIterator {
            handle,
            index_iter,
            data_iter: None,
        }
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(BlockIterator::valid)
    }

    /// Current key. Only meaningful while [`valid`](TableIterator::valid).
    #[must_use]
    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.data_iter.as_ref().unwrap().key()
    }

    /// Current value. Only meaningful while [`valid`](TableIterator::valid).
    #[must_use]
    pub fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.data_iter.as_ref().unwrap().value()
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        self.index_iter.seek_to_first()?;
        self.init_data_block()?;
        if let Some(data) = &mut self.data_iter {
            data.seek_to_first()?;
        }
        self.skip_empty_data_blocks_forward()
    }

    /// Positions at the first entry with key `>= target`.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.index_iter.seek(target)?;
        self.init_data_block()?;
        if let Some(data) = &mut self.data_iter {
            data.seek(target)?;
        }
        self.skip_empty_data_blocks_forward()
    }

    pub fn next(&mut self) -> Result<()> {
        debug_assert!(self.valid());
        if let Some(data) = &mut self.data_iter {
            data.next()?;
        }
        self.skip_empty_data_blocks_forward()
    }

    /// Advances the outer cursor past exhausted (or empty) data blocks until
    /// the inner cursor lands on an entry or the table ends.
    fn skip_empty_data_blocks_forward(&mut self) -> Result<()> {
        while !self.data_iter.as_ref().is_some_and(BlockIterator::valid) {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return Ok(());
            }
            self.index_iter.next()?;
            self.init_data_block()?;
            if let Some(data) = &mut self.data_iter {
                data.seek_to_first()?;
            }
        }
        Ok(())
    }

    /// Opens the data block the outer cursor currently points at.
    fn init_data_block(&mut self) -> Result<()> {
        if !self.index_iter.valid() {
            self.data_iter = None;
            return Ok(());
        }
        let (handle, _) = BlockHandle::decode(self.index_iter.value())?;
        let block = self.handle.block(handle)?;
        self.data_iter = Some(block.iter(self.handle.comparator()));
        Ok(())
    }
}

/// Sorted in-memory entries exposed with the same cursor interface as the
/// on-disk iterators, so merges can include sources that never touch disk.
pub struct ItemsIterator {
    comparator: Arc<dyn KeyComparator>,
    items: Vec<(Vec<u8>, Vec<u8>)>,
    position: usize,
}

impl ItemsIterator {
    /// Wraps `items`, which must already be sorted under `comparator`.
    #[must_use]
    pub fn new(comparator: Arc<dyn KeyComparator>, items: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        debug_assert!(items
            .windows(2)
            .all(|w| comparator.compare(&w[0].0, &w[1].0) == std::cmp::Ordering::Less));
        let position = items.len();
        Self {
            comparator,
            items,
            position,
        }
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        self.position < self.items.len()
    }

    #[must_use]
    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.items[self.position].0
    }

    #[must_use]
    pub fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.items[self.position].1
    }

    pub fn seek_to_first(&mut self) {
        self.position = 0;
    }

    /// Positions at the first entry with key `>= target`.
    pub fn seek(&mut self, target: &[u8]) {
        self.position = self
            .items
            .partition_point(|(key, _)| {
                self.comparator.compare(key, target) == std::cmp::Ordering::Less
            });
    }

    pub fn next(&mut self) {
        debug_assert!(self.valid());
        self.position += 1;
    }
}
