//! # SSTable — the on-disk table layer
//!
//! Immutable, sorted, block-structured files for the Shoal storage engine,
//! plus the caches and merge machinery that make reads across many files
//! behave like one sorted map. Tables are *write-once, read-many*: once a
//! builder finishes a file it is never modified, only replaced by
//! compaction.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA BLOCKS (prefix-compressed sorted entries)                │
//! │                                                               │
//! │ each block: [payload][tag: u8][masked crc32: u32 LE]          │
//! │ payload is raw or compressed; compressed payloads carry a     │
//! │ varint original-length prefix                                 │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FILTER BLOCK (optional; same trailer framing)                 │
//! │                                                               │
//! │ one filter per 2 KiB of data-block offsets                    │
//! ├───────────────────────────────────────────────────────────────┤
//! │ METAINDEX BLOCK ("filter.<policy>" -> filter block handle)    │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX BLOCK (separator key -> data block handle)              │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (always the last 48 bytes)                             │
//! │                                                               │
//! │ metaindex handle | index handle | padding | magic (u64 LE)    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All fixed-width integers are little-endian; handles and lengths are
//! LEB128 varints. The magic constant is
//! [`format::TABLE_MAGIC_NUMBER`].
//!
//! ## Read path
//!
//! The [`TableCache`] resolves a file number to an open [`Table`]
//! (single-flight, LRU-bounded). A point lookup walks index block → optional
//! filter → one data block, with decoded blocks served from the shared
//! byte-budgeted block cache. Range reads compose [`TableIterator`]s through
//! a [`MergingIterator`].
//!
//! Tables are reference counted: iterators retain the table they read, so an
//! eviction never pulls a file out from under a live reader.

pub mod block;
pub mod cmp;
pub mod compress;
pub mod env;
pub mod error;
pub mod filter_block;
pub mod format;
pub mod ikey;
pub mod iter;
pub mod merge;
pub mod reader;
pub mod table_cache;
pub mod writer;

pub use bloom::{BloomFilterPolicy, FilterPolicy};
pub use config::{CompressionType, Options};

pub use block::{Block, BlockBuilder, BlockIterator};
pub use cmp::{BytewiseComparator, KeyComparator};
pub use error::{Error, Result};
pub use format::{BlockHandle, Footer, TABLE_MAGIC_NUMBER};
pub use iter::{ItemsIterator, TableIterator};
pub use merge::{MergeChild, MergingIterator};
pub use reader::{BlockCache, CacheKey, Table, TableHandle};
pub use table_cache::{FileMetaData, TableCache};
pub use writer::TableBuilder;

#[cfg(test)]
mod tests;
