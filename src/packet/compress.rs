//! Optional LZ4 payload compression (§4.2.5). The sender only applies this
//! when the compressed form is strictly smaller; the receiver expands
//! after dearmor and bounds the expanded size to guard against a
//! decompression bomb.

use crate::error::DecodeError;
use lz4_flex::block::{compress_prepend_size, decompress_size_prepended};

/// Generous ceiling on a single packet's decompressed verb payload; well
/// above the largest legal fragmented packet (`11 * physMTU`).
const MAX_DECOMPRESSED_SIZE: usize = 256 * 1024;

/// Returns `Some(compressed)` iff compression strictly shrinks `payload`.
pub fn maybe_compress(payload: &[u8]) -> Option<Vec<u8>> {
    let compressed = compress_prepend_size(payload);
    if compressed.len() < payload.len() {
        Some(compressed)
    } else {
        None
    }
}

pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let out = decompress_size_prepended(compressed).map_err(|_| DecodeError::BadCompression)?;
    if out.len() > MAX_DECOMPRESSED_SIZE {
        return Err(DecodeError::BadCompression);
    }
    Ok(out)
}
