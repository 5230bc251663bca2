//! LZ4 block decompression for compressed frames.

use crate::error::{Error, Result};

/// Each LZ4 length byte extends a match by at most 255 bytes
const MAX_EXPANSION: usize = 255;

/// Largest output `compressed` could expand to.
fn expansion_limit(compressed: &[u8]) -> usize {
  compressed.len().saturating_mul(MAX_EXPANSION).saturating_add(64)
}

/// Decompress one LZ4 block whose decompressed size is known up front.
///
/// The output is allocated at exactly `decompressed_len` bytes; producing any
/// other number of bytes is a protocol error. A declared size the block
/// cannot possibly expand to is rejected before allocating.
pub fn decompress_block(compressed: &[u8], decompressed_len: usize) -> Result<Vec<u8>> {
  if decompressed_len > expansion_limit(compressed) {
    return Err(Error::protocol(format!(
      "{} compressed bytes cannot expand to {} bytes",
      compressed.len(),
      decompressed_len
    )));
  }

  let mut output = vec![0u8; decompressed_len];
  let produced = lz4_flex::block::decompress_into(compressed, &mut output)
    .map_err(|e| Error::protocol(format!("LZ4 decompression failed: {}", e)))?;

  if produced != decompressed_len {
    return Err(Error::protocol(format!(
      "decompressed {} bytes, expected {}",
      produced, decompressed_len
    )));
  }

  Ok(output)
}
