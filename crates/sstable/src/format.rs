//! On-disk format primitives: varints, block handles, block trailers and the
//! table footer.
//!
//! ## Block framing
//!
//! ```text
//! [payload (compressed or raw)][tag: u8][masked crc32: u32 LE]
//! ```
//!
//! The checksum covers the payload plus the tag byte and is stored masked so
//! that checksumming data which itself embeds checksums stays
//! well-distributed.
//!
//! ## Footer (always the last 48 bytes of a table file)
//!
//! ```text
//! [metaindex handle][index handle][zero padding to 40 bytes][magic: u64 LE]
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Identifies the table file format. A file whose trailing eight bytes do not
/// decode to this constant is not a table.
pub const TABLE_MAGIC_NUMBER: u64 = 0xdb47_7524_8b80_fb57;

const MAX_VARINT64_LENGTH: usize = 10;

const MASK_DELTA: u32 = 0xa282_ead8;

/// Masks a CRC so that a checksum-of-a-checksum stays well-distributed.
#[must_use]
pub fn mask_checksum(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Inverse of [`mask_checksum`].
#[must_use]
pub fn unmask_checksum(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}

/// Computes the masked checksum stored in a block trailer: crc32 over the
/// payload followed by the compression tag byte.
#[must_use]
pub fn block_checksum(payload: &[u8], tag: u8) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.update(&[tag]);
    mask_checksum(hasher.finalize())
}

/// Appends `value` to `dst` as a LEB128 varint.
pub fn write_varint32(dst: &mut Vec<u8>, value: u32) {
    write_varint64(dst, u64::from(value));
}

/// Appends `value` to `dst` as a LEB128 varint.
pub fn write_varint64(dst: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        dst.push((value as u8) | 0x80);
        value >>= 7;
    }
    dst.push(value as u8);
}

/// Decodes a varint starting at `data[pos]`, returning the value and the
/// position just past it.
///
/// # Errors
///
/// `Corruption` if the buffer ends mid-varint or the encoding overflows
/// 32 bits.
pub fn read_varint32(data: &[u8], pos: usize) -> Result<(u32, usize)> {
    let (value, next) = read_varint64(data, pos)?;
    let value =
        u32::try_from(value).map_err(|_| Error::corruption("varint32 overflows 32 bits"))?;
    Ok((value, next))
}

/// Decodes a varint starting at `data[pos]`, returning the value and the
/// position just past it.
///
/// # Errors
///
/// `Corruption` if the buffer ends mid-varint or the encoding runs past ten
/// bytes.
pub fn read_varint64(data: &[u8], pos: usize) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    let mut i = pos;
    loop {
        let byte = *data
            .get(i)
            .ok_or_else(|| Error::corruption("truncated varint"))?;
        i += 1;
        if shift == 63 && byte > 1 {
            return Err(Error::corruption("varint64 overflows 64 bits"));
        }
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i));
        }
        shift += 7;
        if shift > 63 {
            return Err(Error::corruption("varint64 longer than ten bytes"));
        }
    }
}

/// A pointer to a block inside a table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle {
    /// Byte offset of the block's payload within the file.
    pub offset: u64,
    /// Payload length in bytes, excluding the trailer.
    pub size: u64,
}

impl BlockHandle {
    /// Upper bound for an encoded handle: two ten-byte varints.
    pub const MAX_ENCODED_LENGTH: usize = 2 * MAX_VARINT64_LENGTH;

    #[must_use]
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Encodes the handle as two varint64s.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(Self::MAX_ENCODED_LENGTH);
        self.encode_into(&mut dst);
        dst
    }

    pub fn encode_into(&self, dst: &mut Vec<u8>) {
        write_varint64(dst, self.offset);
        write_varint64(dst, self.size);
    }

    /// Decodes a handle from the front of `data`, returning it together with
    /// the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(BlockHandle, usize)> {
        let (offset, pos) = read_varint64(data, 0)?;
        let (size, pos) = read_varint64(data, pos)?;
        Ok((BlockHandle { offset, size }, pos))
    }
}

/// The five bytes appended after every block's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTrailer {
    /// Compression tag byte; see `config::CompressionType`.
    pub compression_tag: u8,
    /// Masked crc32 of payload + tag.
    pub checksum: u32,
}

impl BlockTrailer {
    pub const ENCODED_LENGTH: usize = 5;

    #[must_use]
    pub fn encode(&self) -> [u8; Self::ENCODED_LENGTH] {
        let mut dst = [0u8; Self::ENCODED_LENGTH];
        dst[0] = self.compression_tag;
        LittleEndian::write_u32(&mut dst[1..], self.checksum);
        dst
    }

    pub fn decode(data: &[u8]) -> Result<BlockTrailer> {
        if data.len() < Self::ENCODED_LENGTH {
            return Err(Error::corruption("block trailer truncated"));
        }
        Ok(BlockTrailer {
            compression_tag: data[0],
            checksum: LittleEndian::read_u32(&data[1..5]),
        })
    }
}

/// The fixed-size trailer of a table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    /// Two max-length handles padded to 40 bytes, plus the magic number.
    pub const ENCODED_LENGTH: usize = 2 * BlockHandle::MAX_ENCODED_LENGTH + 8;

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(Self::ENCODED_LENGTH);
        self.metaindex_handle.encode_into(&mut dst);
        self.index_handle.encode_into(&mut dst);
        dst.resize(2 * BlockHandle::MAX_ENCODED_LENGTH, 0);
        let mut magic = [0u8; 8];
        LittleEndian::write_u64(&mut magic, TABLE_MAGIC_NUMBER);
        dst.extend_from_slice(&magic);
        dst
    }

    /// Decodes the footer from the final [`Footer::ENCODED_LENGTH`] bytes of
    /// a table file.
    ///
    /// # Errors
    ///
    /// `Corruption` if the buffer is the wrong size, the magic number does
    /// not match, or either handle is malformed.
    pub fn decode(data: &[u8]) -> Result<Footer> {
        if data.len() != Self::ENCODED_LENGTH {
            return Err(Error::corruption(format!(
                "footer must be exactly {} bytes, got {}",
                Self::ENCODED_LENGTH,
                data.len()
            )));
        }
        let magic = LittleEndian::read_u64(&data[data.len() - 8..]);
        if magic != TABLE_MAGIC_NUMBER {
            return Err(Error::corruption(format!(
                "bad table magic number {magic:#018x}"
            )));
        }
        let (metaindex_handle, consumed) = BlockHandle::decode(data)?;
        let (index_handle, _) = BlockHandle::decode(&data[consumed..])?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}
