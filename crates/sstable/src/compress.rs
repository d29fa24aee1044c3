//! The compression adapter and block codec.
//!
//! Algorithms form a small closed set selected by the tag byte persisted in
//! each block trailer. Every compressed payload is self-describing: it starts
//! with the original length as a varint, so decompression can size its output
//! buffer without consulting external metadata. Snappy's raw format already
//! carries that prefix; the LZ4 adapter writes one itself.

use config::CompressionType;

use crate::error::{Error, Result};
use crate::format::{self, BlockTrailer};

/// Returns `true` if `ty` can be used to compress and decompress data.
///
/// `CompressionType::None` is not a codec and reports unavailable; callers
/// probing for a preferred algorithm fall back to storing blocks raw.
#[must_use]
pub fn is_available(ty: CompressionType) -> bool {
    !matches!(ty, CompressionType::None)
}

/// Returns a compressor for `ty` when the algorithm is available.
#[must_use]
pub fn try_compressor(ty: CompressionType) -> Option<Compressor> {
    is_available(ty).then_some(Compressor { ty })
}

/// Returns a compressor for `ty`, failing fast with a configuration error
/// when the algorithm is unavailable.
pub fn require_compressor(ty: CompressionType) -> Result<Compressor> {
    try_compressor(ty)
        .ok_or_else(|| Error::Config(format!("compression algorithm `{ty}` is unavailable")))
}

/// A selected compression algorithm.
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    ty: CompressionType,
}

impl Compressor {
    #[must_use]
    pub fn compression_type(&self) -> CompressionType {
        self.ty
    }

    /// Compresses `raw` into a self-describing payload.
    pub fn compress(&self, raw: &[u8]) -> Result<Vec<u8>> {
        match self.ty {
            CompressionType::None => Ok(raw.to_vec()),
            CompressionType::Snappy => snap::raw::Encoder::new()
                .compress_vec(raw)
                .map_err(|e| Error::Io(std::io::Error::other(e))),
            CompressionType::Lz4 => {
                let compressed = lz4_flex::block::compress(raw);
                let mut payload = Vec::with_capacity(compressed.len() + 5);
                format::write_varint64(&mut payload, raw.len() as u64);
                payload.extend_from_slice(&compressed);
                Ok(payload)
            }
        }
    }
}

/// Reads the original (uncompressed) length out of a payload's prefix.
pub fn uncompressed_length(ty: CompressionType, payload: &[u8]) -> Result<usize> {
    match ty {
        CompressionType::None => Ok(payload.len()),
        CompressionType::Snappy => snap::raw::decompress_len(payload)
            .map_err(|e| Error::corruption(format!("bad snappy payload: {e}"))),
        CompressionType::Lz4 => {
            let (len, _) = format::read_varint64(payload, 0)?;
            usize::try_from(len).map_err(|_| Error::corruption("lz4 length prefix overflows"))
        }
    }
}

/// Inflates `payload` back to its original bytes.
pub fn uncompress(ty: CompressionType, payload: &[u8]) -> Result<Vec<u8>> {
    match ty {
        CompressionType::None => Ok(payload.to_vec()),
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(payload)
            .map_err(|e| Error::corruption(format!("bad snappy payload: {e}"))),
        CompressionType::Lz4 => {
            let (len, pos) = format::read_varint64(payload, 0)?;
            let len =
                usize::try_from(len).map_err(|_| Error::corruption("lz4 length prefix overflows"))?;
            lz4_flex::block::decompress(&payload[pos..], len)
                .map_err(|e| Error::corruption(format!("bad lz4 payload: {e}")))
        }
    }
}

/// Frames `raw` as an on-disk block: compresses when it pays for itself and
/// returns the payload plus its trailer.
///
/// Compression is kept only when it saves at least 12.5%; otherwise the block
/// is stored raw so readers don't burn CPU inflating for no space win. A
/// failing codec also falls back to the raw form.
#[must_use]
pub fn encode_block(raw: &[u8], compressor: Option<&Compressor>) -> (Vec<u8>, BlockTrailer) {
    let mut chosen: Option<(Vec<u8>, CompressionType)> = None;
    if let Some(compressor) = compressor {
        if let Ok(compressed) = compressor.compress(raw) {
            if compressed.len() < raw.len() - raw.len() / 8 {
                chosen = Some((compressed, compressor.compression_type()));
            }
        }
    }
    let (payload, ty) = chosen.unwrap_or_else(|| (raw.to_vec(), CompressionType::None));
    let tag = ty.tag();
    let trailer = BlockTrailer {
        compression_tag: tag,
        checksum: format::block_checksum(&payload, tag),
    };
    (payload, trailer)
}

/// Decodes one block as read from disk (`payload ++ trailer`): verifies the
/// trailer and inflates the payload.
///
/// # Errors
///
/// `Corruption` when the compression tag is not recognized, the checksum does
/// not match the recomputed checksum of payload + tag, or the payload fails
/// to inflate.
pub fn decode_block(file_bytes: &[u8], verify_checksums: bool) -> Result<Vec<u8>> {
    if file_bytes.len() < BlockTrailer::ENCODED_LENGTH {
        return Err(Error::corruption("block shorter than its trailer"));
    }
    let payload_len = file_bytes.len() - BlockTrailer::ENCODED_LENGTH;
    let (payload, trailer_bytes) = file_bytes.split_at(payload_len);
    let trailer = BlockTrailer::decode(trailer_bytes)?;

    let ty = CompressionType::from_tag(trailer.compression_tag).ok_or_else(|| {
        Error::corruption(format!(
            "unknown compression tag {}",
            trailer.compression_tag
        ))
    })?;

    if verify_checksums {
        let expected = format::block_checksum(payload, trailer.compression_tag);
        if expected != trailer.checksum {
            return Err(Error::corruption(format!(
                "block checksum mismatch: stored {:#010x}, computed {expected:#010x}",
                trailer.checksum
            )));
        }
    }

    uncompress(ty, payload)
}
