//! FlateDecode (zlib/deflate) support.
//!
//! Object streams, cross-reference streams and the image data embedded in
//! signature appearances all go through this filter.

use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Inflate zlib data, falling back to a raw deflate stream.
///
/// Data recovered before a corruption point is returned instead of an
/// error, since xref streams in the wild are often truncated by a byte.
pub fn inflate(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    match ZlibDecoder::new(input).read_to_end(&mut output) {
        Ok(_) => return Ok(output),
        Err(e) if !output.is_empty() => {
            log::warn!("FlateDecode partial recovery: {} bytes before error: {}", output.len(), e);
            return Ok(output);
        },
        Err(e) => log::debug!("zlib decode failed ({}), trying raw deflate", e),
    }

    output.clear();
    match DeflateDecoder::new(input).read_to_end(&mut output) {
        Ok(_) => Ok(output),
        Err(_) if !output.is_empty() => Ok(output),
        Err(e) => Err(Error::Decode(format!("FlateDecode failed: {}", e))),
    }
}

/// Compress data with zlib at the default level.
pub fn deflate(input: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(input.len() / 2), Compression::default());
    encoder.write_all(input)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deflate_then_inflate() {
        let data = b"q 1 0 0 1 0 0 cm /Im0 Do Q".repeat(20);
        let compressed = deflate(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(inflate(&compressed).unwrap(), data);
    }

    #[test]
    fn test_inflate_raw_deflate() {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"raw deflate payload").unwrap();
        let raw = encoder.finish().unwrap();
        assert_eq!(inflate(&raw).unwrap(), b"raw deflate payload");
    }

    #[test]
    fn test_inflate_garbage_fails() {
        assert!(inflate(&[0xFF, 0x00, 0x13, 0x37]).is_err());
    }
}
