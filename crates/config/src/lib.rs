//! Table-layer configuration for the Shoal storage engine.
//!
//! [`Options`] collects the tuning knobs consumed by the SSTable writer,
//! reader and caches. Values are validated once, up front, so a misconfigured
//! engine fails at startup instead of deep inside a flush or a read.

use std::fmt;
use std::sync::Arc;

use bloom::FilterPolicy;

/// Block compression algorithm, identified by the tag byte persisted in each
/// block trailer.
///
/// The value space is closed on purpose: the on-disk tag is a single byte and
/// readers must reject tags they do not know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionType {
    /// Store block bytes as-is.
    None,
    /// Snappy raw format (self-describing, carries its own length prefix).
    Snappy,
    /// LZ4 block format with a varint original-length prefix.
    Lz4,
}

impl CompressionType {
    /// The tag byte written into the block trailer.
    #[must_use]
    pub fn tag(self) -> u8 {
        match self {
            CompressionType::None => 0,
            CompressionType::Snappy => 1,
            CompressionType::Lz4 => 2,
        }
    }

    /// Maps a persisted tag byte back to a compression type.
    ///
    /// Returns `None` for tags outside the known value space; the caller is
    /// expected to treat that as corruption.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Snappy),
            2 => Some(CompressionType::Lz4),
            _ => None,
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionType::None => write!(f, "none"),
            CompressionType::Snappy => write!(f, "snappy"),
            CompressionType::Lz4 => write!(f, "lz4"),
        }
    }
}

/// Tuning options for the table layer.
///
/// `Options` is cheap to clone; the only non-trivial field is the shared
/// filter policy handle.
#[derive(Clone)]
pub struct Options {
    /// Approximate uncompressed size of a data block. A block is flushed once
    /// its estimated encoded size reaches this threshold.
    pub block_size: usize,
    /// Number of entries between restart points inside a block. Larger values
    /// trade point-lookup speed for better prefix compression.
    pub block_restart_interval: usize,
    /// Compression applied to data/index blocks when it pays for itself.
    pub compression: CompressionType,
    /// Verify block checksums on every read.
    pub verify_checksums: bool,
    /// Filter policy applied per table; `None` disables filter blocks.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    /// Byte budget for the shared cache of decoded blocks. `0` disables it.
    pub block_cache_bytes: usize,
    /// Maximum number of open tables kept by the table cache.
    pub table_cache_entries: usize,
}

impl Options {
    /// Checks the options for values that cannot work.
    ///
    /// # Errors
    ///
    /// Returns a description of the first offending field. Callers surface
    /// this as a configuration error before any file is touched.
    pub fn validate(&self) -> Result<(), String> {
        if self.block_size == 0 {
            return Err("block_size must be non-zero".to_string());
        }
        if self.block_restart_interval == 0 {
            return Err("block_restart_interval must be non-zero".to_string());
        }
        if self.table_cache_entries == 0 {
            return Err("table_cache_entries must be non-zero".to_string());
        }
        Ok(())
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            block_size: 4096,
            block_restart_interval: 16,
            compression: CompressionType::None,
            verify_checksums: true,
            filter_policy: None,
            block_cache_bytes: 8 * 1024 * 1024,
            table_cache_entries: 1000,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("block_size", &self.block_size)
            .field("block_restart_interval", &self.block_restart_interval)
            .field("compression", &self.compression)
            .field("verify_checksums", &self.verify_checksums)
            .field("filter_policy", &self.filter_policy.as_ref().map(|p| p.name()))
            .field("block_cache_bytes", &self.block_cache_bytes)
            .field("table_cache_entries", &self.table_cache_entries)
            .finish()
    }
}
