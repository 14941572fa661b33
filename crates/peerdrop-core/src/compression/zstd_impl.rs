//! Zstd compression implementation.
//!
//! Thin wrappers over the zstd library for compressing and decompressing
//! payload chunks.

use std::io::Cursor;

use crate::error::{Error, Result};

/// Compress data using zstd.
///
/// # Arguments
///
/// * `data` - The data to compress
/// * `level` - Compression level (1-22, lower = faster)
///
/// # Errors
///
/// Returns an error if compression fails.
pub fn compress(data: &[u8], level: i32) -> Result<Vec<u8>> {
    let cursor = Cursor::new(data);
    zstd::stream::encode_all(cursor, level)
        .map_err(|e| Error::Compression(format!("zstd compress failed: {e}")))
}

/// Decompress one zstd frame holding at most `capacity` bytes.
///
/// # Errors
///
/// Returns an error if the data is not valid zstd or decompresses to more
/// than `capacity` bytes.
pub fn decompress(data: &[u8], capacity: usize) -> Result<Vec<u8>> {
    zstd::bulk::decompress(data, capacity)
        .map_err(|e| Error::Compression(format!("zstd decompress failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_decompress_roundtrip() {
        let original = b"Hello, this is test data that should compress well. ".repeat(100);
        let compressed = compress(&original, 1).unwrap();
        let decompressed = decompress(&compressed, original.len()).unwrap();
        assert_eq!(original.as_slice(), decompressed.as_slice());
    }

    #[test]
    fn test_compress_empty() {
        let compressed = compress(b"", 1).unwrap();
        let decompressed = decompress(&compressed, 16).unwrap();
        assert!(decompressed.is_empty());
    }

    #[test]
    fn test_decompress_invalid_data() {
        let invalid = b"this is not valid zstd data";
        assert!(decompress(invalid, 1024).is_err());
    }

    #[test]
    fn test_decompress_over_capacity() {
        let compressed = compress(&[0u8; 4096], 1).unwrap();
        assert!(decompress(&compressed, 1024).is_err());
    }
}
