//! The bounded cache of open tables.
//!
//! Tables are keyed by file number and opened on demand; opening is
//! single-flight per key, so a thundering herd on one file performs one disk
//! open. The lock protecting the LRU is never held across disk I/O.
//!
//! Eviction releases the cache's creation reference. A table still in use by
//! readers survives until its last [`TableHandle`](crate::TableHandle) drops
//! — RAII is the deterministic replacement for a garbage-collector finalizer
//! here. Evicted-but-live tables are additionally remembered on an orphan
//! list, swept on later cache mutations; [`TableCache::close`] force-closes
//! anything a leaked handle is still pinning and reports it to the log sink.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, Weak};

use config::Options;
use hashlink::LruCache;

use crate::cmp::KeyComparator;
use crate::env::FsInput;
use crate::error::{Error, Result};
use crate::iter::TableIterator;
use crate::reader::{BlockCache, BlockWeigher, Table, TableHandle};

/// Identifies a physical table file. Produced by the (external) version set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetaData {
    pub file_number: u64,
    pub file_size: u64,
}

/// Preferred table file name: `<number>.ldb`, zero-padded.
#[must_use]
pub fn table_file_name(dir: &Path, file_number: u64) -> PathBuf {
    dir.join(format!("{file_number:06}.ldb"))
}

/// Legacy table file name: `<number>.sst`.
#[must_use]
pub fn legacy_table_file_name(dir: &Path, file_number: u64) -> PathBuf {
    dir.join(format!("{file_number:06}.sst"))
}

/// A pending open, shared by every thread racing on the same file number.
struct OpenSlot {
    result: Mutex<Option<Result<Arc<Table>>>>,
    ready: Condvar,
}

impl OpenSlot {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }
}

struct CacheState {
    tables: LruCache<u64, Arc<Table>>,
    in_flight: HashMap<u64, Arc<OpenSlot>>,
    /// Evicted tables that still had readers at eviction time.
    orphans: Vec<Weak<Table>>,
}

/// LRU cache of open [`Table`]s, bounded by entry count.
pub struct TableCache {
    dir: PathBuf,
    options: Options,
    comparator: Arc<dyn KeyComparator>,
    block_cache: Option<Arc<BlockCache>>,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl TableCache {
    /// Creates a cache serving table files out of `dir`.
    ///
    /// # Errors
    ///
    /// `Config` when the options are invalid.
    pub fn new(
        dir: impl Into<PathBuf>,
        options: Options,
        comparator: Arc<dyn KeyComparator>,
    ) -> Result<TableCache> {
        options.validate().map_err(Error::Config)?;
        let block_cache = (options.block_cache_bytes > 0).then(|| {
            Arc::new(BlockCache::new(
                options.block_cache_bytes,
                Box::new(BlockWeigher),
            ))
        });
        let capacity = options.table_cache_entries;
        Ok(TableCache {
            dir: dir.into(),
            options,
            comparator,
            block_cache,
            capacity,
            state: Mutex::new(CacheState {
                tables: LruCache::new_unbounded(),
                in_flight: HashMap::new(),
                orphans: Vec::new(),
            }),
        })
    }

    /// The block cache shared by every table this cache opens, if enabled.
    #[must_use]
    pub fn block_cache(&self) -> Option<&Arc<BlockCache>> {
        self.block_cache.as_ref()
    }

    /// Returns a retained handle for the table backing `file_number`,
    /// opening it if necessary. Concurrent requests for the same file
    /// coalesce into one open.
    pub fn table(&self, file_number: u64) -> Result<TableHandle> {
        enum Role {
            Hit(TableHandle),
            Wait(Arc<OpenSlot>),
            Lead(Arc<OpenSlot>),
        }

        loop {
            let role = {
                let mut state = self.state.lock().unwrap();
                sweep_orphans(&mut state.orphans);
                let hit = state
                    .tables
                    .get(&file_number)
                    .and_then(TableHandle::retain);
                match hit {
                    Some(handle) => Role::Hit(handle),
                    None => match state.in_flight.get(&file_number) {
                        Some(slot) => Role::Wait(slot.clone()),
                        None => {
                            let slot = Arc::new(OpenSlot::new());
                            state.in_flight.insert(file_number, slot.clone());
                            Role::Lead(slot)
                        }
                    },
                }
            };

            match role {
                Role::Hit(handle) => return Ok(handle),
                Role::Wait(slot) => {
                    let mut result = slot.result.lock().unwrap();
                    while result.is_none() {
                        result = slot.ready.wait(result).unwrap();
                    }
                    match result.as_ref().unwrap() {
                        Ok(table) => {
                            if let Some(handle) = TableHandle::retain(table) {
                                return Ok(handle);
                            }
                            // Evicted and fully released between publication
                            // and wake-up; start over.
                        }
                        Err(e) => return Err(e.clone()),
                    }
                }
                Role::Lead(slot) => {
                    let outcome = self.open_table(file_number);
                    let handle = {
                        let mut state = self.state.lock().unwrap();
                        state.in_flight.remove(&file_number);
                        match &outcome {
                            Ok(table) => {
                                let handle = TableHandle::retain(table);
                                debug_assert!(handle.is_some(), "fresh table already released");
                                if let Some(replaced) =
                                    state.tables.insert(file_number, table.clone())
                                {
                                    release_evicted(&mut state.orphans, replaced);
                                }
                                while state.tables.len() > self.capacity {
                                    match state.tables.remove_lru() {
                                        Some((_, evicted)) => {
                                            release_evicted(&mut state.orphans, evicted);
                                        }
                                        None => break,
                                    }
                                }
                                handle
                            }
                            Err(_) => None,
                        }
                    };

                    let mut result = slot.result.lock().unwrap();
                    *result = Some(outcome.clone());
                    slot.ready.notify_all();
                    drop(result);

                    return match outcome {
                        Ok(_) => Ok(handle.expect("retained before publication")),
                        Err(e) => Err(e),
                    };
                }
            }
        }
    }

    /// Point lookup through the cached table for `file`.
    pub fn get(&self, key: &[u8], file: &FileMetaData) -> Result<Option<Vec<u8>>> {
        self.table(file.file_number)?.get(key)
    }

    /// Returns a two-level iterator over the table for `file`. The iterator
    /// holds its own reference and survives eviction.
    pub fn iterate(&self, file: &FileMetaData) -> Result<TableIterator> {
        Ok(self.table(file.file_number)?.iter())
    }

    /// Approximate file offset of `key` within the table for `file`.
    pub fn approximate_offset_of(&self, file: &FileMetaData, key: &[u8]) -> Result<u64> {
        self.table(file.file_number)?.approximate_offset_of(key)
    }

    /// Drops the entry for `file_number`, releasing the cache's reference.
    /// Used when compaction deletes the file.
    pub fn evict(&self, file_number: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(table) = state.tables.remove(&file_number) {
            release_evicted(&mut state.orphans, table);
        }
        sweep_orphans(&mut state.orphans);
    }

    /// Invalidates every entry and reclaims whatever can be reclaimed.
    /// Tables pinned by leaked handles are force-closed and reported to the
    /// diagnostic sink; the error never reaches the caller.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        while let Some((_, table)) = state.tables.remove_lru() {
            release_evicted(&mut state.orphans, table);
        }
        for weak in state.orphans.drain(..) {
            if let Some(table) = weak.upgrade() {
                log::warn!(
                    "table {} still referenced at cache close; forcing close",
                    table.id()
                );
                if let Err(e) = table.force_close() {
                    log::warn!("table {}: forced close failed: {e}", table.id());
                }
            }
        }
    }

    fn open_table(&self, file_number: u64) -> Result<Arc<Table>> {
        let mut path = table_file_name(&self.dir, file_number);
        if !path.exists() {
            let legacy = legacy_table_file_name(&self.dir, file_number);
            if legacy.exists() {
                path = legacy;
            }
        }
        let source = Box::new(FsInput::open(&path)?);
        let table = Table::open(
            source,
            &self.options,
            self.comparator.clone(),
            self.block_cache.clone(),
        )?;
        Ok(Arc::new(table))
    }
}

/// Releases the cache's reference to an evicted table. If readers still hold
/// it, the table is tracked as an orphan; its file closes when the last
/// handle drops. Close failures go to the log sink, never to the caller that
/// triggered the eviction.
fn release_evicted(orphans: &mut Vec<Weak<Table>>, table: Arc<Table>) {
    if let Err(e) = table.release() {
        log::warn!("table {}: deferred close failed: {e}", table.id());
    }
    if table.ref_count() > 0 {
        orphans.push(Arc::downgrade(&table));
    }
}

/// Drops orphan records whose tables have fully gone away.
fn sweep_orphans(orphans: &mut Vec<Weak<Table>>) {
    orphans.retain(|weak| weak.strong_count() > 0);
}
