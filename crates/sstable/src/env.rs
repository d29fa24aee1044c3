//! File capabilities consumed by the table layer.
//!
//! The reader needs positioned reads against an immutable file; the writer
//! needs append-and-sync. Both are traits so tests (and alternative storage
//! backends) can substitute in-memory files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::RwLock;

use crate::error::{Error, Result};

/// A randomly-readable, immutable file.
///
/// Implementations must support concurrent `read` calls; `close` is
/// idempotent and releases the underlying handle.
pub trait RandomInputFile: Send + Sync {
    /// Total length of the file in bytes.
    fn size(&self) -> Result<u64>;

    /// Reads exactly `length` bytes starting at `offset`.
    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>>;

    /// Releases the underlying handle. Reads after close fail.
    fn close(&self) -> Result<()>;
}

/// An append-only output file.
pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Flushes buffered data and forces it to stable storage.
    fn force(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// [`RandomInputFile`] backed by the local filesystem, using positioned
/// reads so concurrent readers never contend on a shared cursor.
pub struct FsInput {
    file: RwLock<Option<File>>,
    len: u64,
}

impl FsInput {
    pub fn open(path: &Path) -> Result<FsInput> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(FsInput {
            file: RwLock::new(Some(file)),
            len,
        })
    }
}

impl RandomInputFile for FsInput {
    fn size(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let guard = self.file.read().unwrap();
        let file = guard
            .as_ref()
            .ok_or(Error::State("read on a closed table file"))?;
        let mut buf = vec![0u8; length];
        file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    fn close(&self) -> Result<()> {
        self.file.write().unwrap().take();
        Ok(())
    }
}

/// [`WritableFile`] backed by the local filesystem. Appends are buffered;
/// `force` flushes and fsyncs.
pub struct FsOutput {
    inner: Option<BufWriter<File>>,
}

impl FsOutput {
    pub fn create(path: &Path) -> Result<FsOutput> {
        let file = File::create(path)?;
        Ok(FsOutput {
            inner: Some(BufWriter::new(file)),
        })
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.inner
            .as_mut()
            .ok_or(Error::State("write on a closed table file"))
    }
}

impl WritableFile for FsOutput {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer()?.write_all(data)?;
        Ok(())
    }

    fn force(&mut self) -> Result<()> {
        let writer = self.writer()?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.inner.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for FsOutput {
    fn drop(&mut self) {
        if let Some(mut writer) = self.inner.take() {
            let _ = writer.flush();
        }
    }
}
