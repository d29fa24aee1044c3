//! SSTable reading.
//!
//! A [`Table`] owns the open file, the eagerly decoded index block and the
//! optional filter reader. Data blocks are fetched on demand, through the
//! shared block cache when one is configured.
//!
//! Tables are reference counted. The creating cache holds the initial
//! reference; iterators retain their own. An evicted table therefore stays
//! readable until its last reference is released, at which point the file is
//! closed exactly once.

use std::cmp::Ordering;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use bloom::FilterPolicy;
use cache::{ShardedLruCache, Weigher};
use config::Options;

use crate::block::Block;
use crate::cmp::{BytewiseComparator, KeyComparator};
use crate::compress;
use crate::env::RandomInputFile;
use crate::error::{Error, Result};
use crate::filter_block::FilterBlockReader;
use crate::format::{BlockHandle, BlockTrailer, Footer};
use crate::iter::TableIterator;

/// Process-local table identity. Not the file number: a file number can be
/// reused after compaction deletes and recreates a table, and stale cache
/// entries from the previous generation must never collide with the new one.
static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one decoded block across every open table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub table_id: u64,
    pub offset: u64,
    pub size: u64,
}

/// The shared cache of decoded blocks, byte-budgeted by decoded length.
pub type BlockCache = ShardedLruCache<CacheKey, Block, Error>;

/// Weighs cached blocks by their decoded byte length.
pub struct BlockWeigher;

impl Weigher<Block> for BlockWeigher {
    fn weight(&self, block: &Block) -> usize {
        block.size()
    }
}

/// One open SSTable.
pub struct Table {
    id: u64,
    source: Box<dyn RandomInputFile>,
    comparator: Arc<dyn KeyComparator>,
    index_block: Arc<Block>,
    metaindex_handle: BlockHandle,
    filter: Option<FilterBlockReader>,
    block_cache: Option<Arc<BlockCache>>,
    verify_checksums: bool,
    /// The only cross-thread mutable state on an otherwise immutable object.
    ref_count: AtomicU32,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("metaindex_handle", &self.metaindex_handle)
            .field("verify_checksums", &self.verify_checksums)
            .finish_non_exhaustive()
    }
}

impl Table {
    /// Opens a table: validates the footer, decodes the index block and, if
    /// a filter policy is configured, loads the filter via the metaindex.
    ///
    /// The index block is always read directly (uncached): it is decoded once
    /// and held for the table's lifetime.
    ///
    /// # Errors
    ///
    /// `Corruption` for an undersized file, bad magic number or malformed
    /// blocks; `Io` for read failures.
    pub fn open(
        source: Box<dyn RandomInputFile>,
        options: &Options,
        comparator: Arc<dyn KeyComparator>,
        block_cache: Option<Arc<BlockCache>>,
    ) -> Result<Table> {
        let size = source.size()?;
        if size < Footer::ENCODED_LENGTH as u64 {
            return Err(Error::corruption(format!(
                "file of {size} bytes is too small to hold a table footer"
            )));
        }

        let footer_bytes = source.read(
            size - Footer::ENCODED_LENGTH as u64,
            Footer::ENCODED_LENGTH,
        )?;
        let footer = Footer::decode(&footer_bytes)?;

        let verify_checksums = options.verify_checksums;
        let index_raw = read_raw_block(source.as_ref(), footer.index_handle, verify_checksums)?;
        let index_block = Arc::new(Block::new(index_raw)?);

        let mut table = Table {
            id: NEXT_TABLE_ID.fetch_add(1, AtomicOrdering::Relaxed),
            source,
            comparator,
            index_block,
            metaindex_handle: footer.metaindex_handle,
            filter: None,
            block_cache,
            verify_checksums,
            ref_count: AtomicU32::new(1),
        };
        if let Some(policy) = &options.filter_policy {
            table.filter = table.read_filter(policy.clone())?;
        }
        Ok(table)
    }

    /// Process-local identity; also the table component of block cache keys.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Point lookup: returns the stored value for exactly `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.internal_get(key)?.and_then(|(found, value)| {
            (self.comparator.compare(&found, key) == Ordering::Equal).then_some(value)
        }))
    }

    /// Returns the first entry with key `>= key`, confined to the one data
    /// block the index says could contain it.
    ///
    /// A configured filter is consulted first; a negative answer
    /// short-circuits without touching the data block.
    pub fn internal_get(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        debug_assert!(self.ref_count.load(AtomicOrdering::Acquire) > 0);

        let mut index_iter = self.index_block.iter(self.comparator.clone());
        index_iter.seek(key)?;
        if !index_iter.valid() {
            return Ok(None);
        }
        let (handle, _) = BlockHandle::decode(index_iter.value())?;

        if let Some(filter) = &self.filter {
            if !filter.key_may_match(handle.offset, key) {
                return Ok(None);
            }
        }

        let block = self.block(handle)?;
        let mut data_iter = block.iter(self.comparator.clone());
        data_iter.seek(key)?;
        if data_iter.valid() {
            Ok(Some((data_iter.key().to_vec(), data_iter.value().to_vec())))
        } else {
            Ok(None)
        }
    }

    /// Approximate file offset where data for `key` would live. Keys past
    /// the end of the table map to the metaindex offset, which sits right
    /// near the end of the file. Used for compaction size estimation.
    pub fn approximate_offset_of(&self, key: &[u8]) -> Result<u64> {
        debug_assert!(self.ref_count.load(AtomicOrdering::Acquire) > 0);
        let mut index_iter = self.index_block.iter(self.comparator.clone());
        index_iter.seek(key)?;
        if index_iter.valid() {
            let (handle, _) = BlockHandle::decode(index_iter.value())?;
            Ok(handle.offset)
        } else {
            Ok(self.metaindex_handle.offset)
        }
    }

    /// Returns a two-level iterator over the table, holding its own
    /// reference so the table survives cache eviction while iterating.
    ///
    /// # Errors
    ///
    /// `State` when the table has already been fully released.
    pub fn iter(self: &Arc<Self>) -> Result<TableIterator> {
        let handle = TableHandle::retain(self)
            .ok_or(Error::State("iterator requested on a fully released table"))?;
        Ok(TableIterator::new(handle))
    }

    /// Attempts to acquire a reference.
    ///
    /// Fails (returns `false`) once the count has reached zero: the file is
    /// closed and the table must be re-fetched from the cache, never
    /// resurrected.
    #[must_use]
    pub fn retain(&self) -> bool {
        let mut refs = self.ref_count.load(AtomicOrdering::Relaxed);
        loop {
            if refs == 0 {
                return false;
            }
            match self.ref_count.compare_exchange_weak(
                refs,
                refs + 1,
                AtomicOrdering::AcqRel,
                AtomicOrdering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => refs = actual,
            }
        }
    }

    /// Drops one reference, closing the file when the count reaches zero.
    pub fn release(&self) -> Result<()> {
        let previous = self.ref_count.fetch_sub(1, AtomicOrdering::AcqRel);
        debug_assert!(previous > 0, "release on a fully released table");
        if previous == 1 {
            self.source.close()
        } else {
            Ok(())
        }
    }

    pub(crate) fn ref_count(&self) -> u32 {
        self.ref_count.load(AtomicOrdering::Acquire)
    }

    /// Closes the file regardless of outstanding references. Backstop for
    /// leaked handles; normal teardown goes through `release`.
    pub(crate) fn force_close(&self) -> Result<()> {
        self.source.close()
    }

    pub(crate) fn comparator(&self) -> Arc<dyn KeyComparator> {
        self.comparator.clone()
    }

    pub(crate) fn index_block(&self) -> &Arc<Block> {
        &self.index_block
    }

    /// Fetches a data block, through the shared cache when configured.
    /// Concurrent misses on the same block coalesce into a single read.
    pub(crate) fn block(&self, handle: BlockHandle) -> Result<Arc<Block>> {
        debug_assert!(self.ref_count.load(AtomicOrdering::Acquire) > 0);
        match &self.block_cache {
            Some(cache) => cache.load(
                CacheKey {
                    table_id: self.id,
                    offset: handle.offset,
                    size: handle.size,
                },
                || {
                    let raw = read_raw_block(self.source.as_ref(), handle, self.verify_checksums)?;
                    Ok(Arc::new(Block::new(raw)?))
                },
            ),
            None => {
                let raw = read_raw_block(self.source.as_ref(), handle, self.verify_checksums)?;
                Ok(Arc::new(Block::new(raw)?))
            }
        }
    }

    fn read_filter(&self, policy: Arc<dyn FilterPolicy>) -> Result<Option<FilterBlockReader>> {
        let meta_raw = read_raw_block(
            self.source.as_ref(),
            self.metaindex_handle,
            self.verify_checksums,
        )?;
        let meta = Arc::new(Block::new(meta_raw)?);

        let mut target = b"filter.".to_vec();
        target.extend_from_slice(policy.name().as_bytes());

        let bytewise: Arc<dyn KeyComparator> = Arc::new(BytewiseComparator);
        let mut iter = meta.iter(bytewise);
        iter.seek(&target)?;
        if iter.valid() && iter.key() == target.as_slice() {
            let (handle, _) = BlockHandle::decode(iter.value())?;
            let contents = read_raw_block(self.source.as_ref(), handle, self.verify_checksums)?;
            match FilterBlockReader::new(policy, contents) {
                Some(reader) => return Ok(Some(reader)),
                None => {
                    log::warn!(
                        "table {}: malformed filter block, continuing without a filter",
                        self.id
                    );
                }
            }
        }
        Ok(None)
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        let refs = *self.ref_count.get_mut();
        if refs > 0 {
            // Every handle clones the Arc, so getting here with a non-zero
            // count means references were leaked without release.
            if let Err(e) = self.source.close() {
                log::warn!("table {}: backstop close failed: {e}", self.id);
            }
            log::warn!(
                "table {} dropped with {refs} unreleased references",
                self.id
            );
        }
    }
}

/// Reads and decodes one framed block (`payload ++ trailer`) from `source`.
fn read_raw_block(
    source: &dyn RandomInputFile,
    handle: BlockHandle,
    verify_checksums: bool,
) -> Result<Vec<u8>> {
    let length = usize::try_from(handle.size)
        .map_err(|_| Error::corruption("block handle size overflows"))?
        + BlockTrailer::ENCODED_LENGTH;
    let raw = source.read(handle.offset, length)?;
    compress::decode_block(&raw, verify_checksums)
}

/// An RAII reference to a [`Table`]: retained on creation and clone,
/// released on drop.
pub struct TableHandle {
    table: Arc<Table>,
}

impl TableHandle {
    /// Acquires a reference, or `None` if the table was already fully
    /// released.
    #[must_use]
    pub fn retain(table: &Arc<Table>) -> Option<TableHandle> {
        table.retain().then(|| TableHandle {
            table: table.clone(),
        })
    }

    /// Returns a fresh two-level iterator over the table.
    #[must_use]
    pub fn iter(&self) -> TableIterator {
        TableIterator::new(self.clone())
    }

    pub(crate) fn shared(&self) -> &Arc<Table> {
        &self.table
    }
}

impl Deref for TableHandle {
    type Target = Table;

    fn deref(&self) -> &Table {
        &self.table
    }
}

impl Clone for TableHandle {
    fn clone(&self) -> Self {
        // We hold a reference, so the count cannot have reached zero.
        let retained = self.table.retain();
        debug_assert!(retained);
        TableHandle {
            table: self.table.clone(),
        }
    }
}

impl Drop for TableHandle {
    fn drop(&mut self) {
        if let Err(e) = self.table.release() {
            log::warn!("table {}: close failed on release: {e}", self.table.id);
        }
    }
}
