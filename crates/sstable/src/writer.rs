//! SSTable construction.
//!
//! [`TableBuilder`] consumes a strictly ascending key/value stream and emits
//! the on-disk table: data blocks as they fill, then the filter block, the
//! metaindex block, the index block and the footer.

use std::cmp::Ordering;
use std::sync::Arc;

use config::{CompressionType, Options};

use crate::block::BlockBuilder;
use crate::cmp::KeyComparator;
use crate::compress::{self, Compressor};
use crate::env::WritableFile;
use crate::error::{Error, Result};
use crate::filter_block::FilterBlockBuilder;
use crate::format::{BlockHandle, BlockTrailer, Footer};

/// Streams an ascending sequence of entries into a table file.
///
/// The index entry for a flushed data block is deferred until the first key
/// of the *next* block is seen, so the index can use the shortest separator
/// between the two instead of the full last key. For a boundary between
/// `"the quick brown fox"` and `"the who"`, `"the r"` suffices: it is `>=`
/// everything in the first block and `<` everything after it.
pub struct TableBuilder {
    file: Box<dyn WritableFile>,
    comparator: Arc<dyn KeyComparator>,
    compressor: Option<Compressor>,
    block_size: usize,
    restart_interval: usize,

    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter_block: Option<FilterBlockBuilder>,

    last_key: Vec<u8>,
    entry_count: u64,
    /// Bytes written so far; the offset the next block will land at.
    position: u64,
    /// Handle of the last flushed data block, awaiting its index entry.
    pending_handle: Option<BlockHandle>,
    /// Set once `finish` or `abandon` has been called.
    closed: bool,
}

impl TableBuilder {
    /// Creates a builder writing to `file`.
    ///
    /// # Errors
    ///
    /// `Config` when the options are invalid or name an unavailable
    /// compression algorithm.
    pub fn new(
        options: &Options,
        file: Box<dyn WritableFile>,
        comparator: Arc<dyn KeyComparator>,
    ) -> Result<TableBuilder> {
        options.validate().map_err(Error::Config)?;
        let compressor = match options.compression {
            CompressionType::None => None,
            ty => Some(compress::require_compressor(ty)?),
        };
        let filter_block = options.filter_policy.clone().map(|policy| {
            let mut builder = FilterBlockBuilder::new(policy);
            builder.start_block(0);
            builder
        });

        Ok(TableBuilder {
            file,
            comparator,
            compressor,
            block_size: options.block_size,
            restart_interval: options.block_restart_interval,
            data_block: BlockBuilder::new(options.block_restart_interval),
            // Index entries restart every time: each is sought individually.
            index_block: BlockBuilder::new(1),
            filter_block,
            last_key: Vec::new(),
            entry_count: 0,
            position: 0,
            pending_handle: None,
            closed: false,
        })
    }

    /// Number of entries added so far.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Bytes written to the file so far (the final size after `finish`).
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.position
    }

    /// Appends an entry. Keys must arrive in strictly ascending order.
    ///
    /// # Errors
    ///
    /// `State` when the builder is finished/abandoned or the key is not
    /// strictly greater than its predecessor; `Io` on write failure.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::State("add on a finished or abandoned builder"));
        }
        if self.entry_count > 0
            && self.comparator.compare(key, &self.last_key) != Ordering::Greater
        {
            return Err(Error::State("keys must be added in strictly ascending order"));
        }

        if let Some(pending) = self.pending_handle.take() {
            debug_assert!(self.data_block.is_empty());
            let separator = self.comparator.find_shortest_separator(&self.last_key, key);
            self.index_block.add(&separator, &pending.encode());
        }

        if let Some(filter) = &mut self.filter_block {
            filter.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.entry_count += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes the filter, metaindex and index blocks plus the footer, and
    /// forces everything to stable storage.
    ///
    /// # Errors
    ///
    /// `State` when already finished or abandoned; `Io` on write failure.
    pub fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::State("finish on a finished or abandoned builder"));
        }
        self.flush()?;
        self.closed = true;

        let filter_contents = self.filter_block.as_mut().map(FilterBlockBuilder::finish);
        let filter_handle = match filter_contents {
            Some(contents) => Some(self.write_raw_block(&contents)?),
            None => None,
        };

        // Metaindex: maps "filter.<policy>" to the filter block. Written
        // even when empty so the footer always has a real handle.
        let mut metaindex = BlockBuilder::new(self.restart_interval);
        if let (Some(filter), Some(handle)) = (&self.filter_block, filter_handle) {
            let mut key = b"filter.".to_vec();
            key.extend_from_slice(filter.name().as_bytes());
            metaindex.add(&key, &handle.encode());
        }
        let raw = metaindex.finish();
        let metaindex_handle = self.write_raw_block(&raw)?;

        if let Some(pending) = self.pending_handle.take() {
            let successor = self.comparator.find_short_successor(&self.last_key);
            self.index_block.add(&successor, &pending.encode());
        }
        let raw = self.index_block.finish();
        let index_handle = self.write_raw_block(&raw)?;

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        let encoding = footer.encode();
        self.file.append(&encoding)?;
        self.position += encoding.len() as u64;

        self.file.force()?;
        Ok(())
    }

    /// Marks the builder unusable without writing a footer. Used on error
    /// paths; the partial file is the caller's to delete.
    pub fn abandon(&mut self) {
        self.closed = true;
    }

    /// Flushes the data block under construction, if any, and remembers its
    /// handle for the deferred index entry.
    fn flush(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(
            self.pending_handle.is_none(),
            "flushed a block while its predecessor's index entry is pending"
        );

        let raw = self.data_block.finish();
        self.data_block.reset();
        let handle = self.write_raw_block(&raw)?;
        self.pending_handle = Some(handle);

        if let Some(filter) = &mut self.filter_block {
            filter.start_block(self.position);
        }
        Ok(())
    }

    fn write_raw_block(&mut self, raw: &[u8]) -> Result<BlockHandle> {
        let (payload, trailer) = compress::encode_block(raw, self.compressor.as_ref());
        let handle = BlockHandle::new(self.position, payload.len() as u64);
        self.file.append(&payload)?;
        self.file.append(&trailer.encode())?;
        self.position += payload.len() as u64 + BlockTrailer::ENCODED_LENGTH as u64;
        Ok(handle)
    }
}
