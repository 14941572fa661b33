//! Payload compression for file transfers.
//!
//! Compression is a session-wide setting that both ends must agree on out of
//! band; it is not negotiated on the wire. With [`Compression::Zstd`] every
//! chunk of at most `chunk_size` raw bytes travels as one frame:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────┐
//! │  Length (u32, BE)    │   zstd frame             │
//! └──────────────────────┴──────────────────────────┘
//! ```
//!
//! Frames never span two files, so the receiver can account for each
//! manifest entry separately. With [`Compression::None`] the raw bytes are
//! written back to back.

mod stats;
mod zstd_impl;

pub use stats::PayloadStats;
pub use zstd_impl::{compress, decompress};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// Largest compressed frame accepted from the wire.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Largest raw chunk a sender may compress into one frame.
///
/// Half of [`MAX_FRAME_SIZE`], so even incompressible chunks fit in a frame.
pub const MAX_CHUNK_SIZE: usize = MAX_FRAME_SIZE / 2;

/// Compression applied to the payload stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Raw bytes
    #[default]
    None,
    /// Length-prefixed zstd frame per chunk
    Zstd,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Zstd => f.write_str("zstd"),
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "zstd" => Ok(Self::Zstd),
            other => Err(Error::InvalidConfig {
                key: "compression".into(),
                reason: format!("unknown compression '{other}' (expected none or zstd)"),
            }),
        }
    }
}

/// Write one chunk of raw bytes using the given compression.
///
/// Returns the number of bytes put on the wire.
///
/// # Errors
///
/// Returns an error if compression or writing fails.
pub async fn write_chunk<W>(
    writer: &mut W,
    chunk: &[u8],
    compression: Compression,
    level: i32,
) -> Result<u64>
where
    W: AsyncWriteExt + Unpin,
{
    match compression {
        Compression::None => {
            writer.write_all(chunk).await?;
            Ok(chunk.len() as u64)
        }
        Compression::Zstd => {
            let frame = compress(chunk, level)?;
            #[allow(clippy::cast_possible_truncation)]
            let len = frame.len() as u32;
            writer.write_all(&len.to_be_bytes()).await?;
            writer.write_all(&frame).await?;
            Ok(4 + frame.len() as u64)
        }
    }
}

/// Read the next chunk of a file's payload into `buf`.
///
/// `remaining` is how many raw bytes of the current file are still
/// expected; a chunk never exceeds it. Uncompressed reads are capped at
/// `chunk_size`. Returns the number of wire bytes consumed; the raw bytes are
/// left in `buf`.
///
/// # Errors
///
/// Returns an I/O error when the stream ends early, and a protocol or
/// compression error for an invalid frame.
pub async fn read_chunk<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    remaining: u64,
    compression: Compression,
    chunk_size: usize,
) -> Result<u64>
where
    R: AsyncReadExt + Unpin,
{
    buf.clear();
    match compression {
        Compression::None => {
            let want = usize::try_from(remaining).map_or(chunk_size, |r| r.min(chunk_size));
            buf.resize(want, 0);
            let n = reader.read(buf).await?;
            if n == 0 && want > 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "sender closed the connection mid-file",
                )));
            }
            buf.truncate(n);
            Ok(n as u64)
        }
        Compression::Zstd => {
            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf).await?;
            let len = u32::from_be_bytes(len_buf) as usize;
            if len > MAX_FRAME_SIZE {
                return Err(Error::ProtocolError(format!(
                    "compressed frame of {len} bytes exceeds the {MAX_FRAME_SIZE} byte limit"
                )));
            }

            let mut frame = vec![0u8; len];
            reader.read_exact(&mut frame).await?;

            let capacity =
                usize::try_from(remaining).map_or(MAX_CHUNK_SIZE, |r| r.min(MAX_CHUNK_SIZE));
            *buf = decompress(&frame, capacity)?;
            if buf.is_empty() && remaining > 0 {
                return Err(Error::ProtocolError("empty compressed frame".into()));
            }
            Ok(4 + len as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            compression: Compression,
        }

        let parsed: Wrapper = toml::from_str("compression = \"zstd\"").expect("parse");
        assert_eq!(parsed.compression, Compression::Zstd);

        let parsed: Wrapper = toml::from_str("compression = \"none\"").expect("parse");
        assert_eq!(parsed.compression, Compression::None);
    }

    #[test]
    fn test_compression_from_str() {
        assert_eq!("ZSTD".parse::<Compression>().expect("parse"), Compression::Zstd);
        assert_eq!("off".parse::<Compression>().expect("parse"), Compression::None);
        assert!("gzip".parse::<Compression>().is_err());
    }

    #[tokio::test]
    async fn test_raw_chunks_respect_file_boundary() {
        let mut wire = Vec::new();
        write_chunk(&mut wire, b"hello", Compression::None, 1)
            .await
            .expect("write first");
        write_chunk(&mut wire, b"world", Compression::None, 1)
            .await
            .expect("write second");

        let mut cursor = std::io::Cursor::new(wire);
        let mut buf = Vec::new();
        read_chunk(&mut cursor, &mut buf, 5, Compression::None, 64)
            .await
            .expect("read first file");
        assert_eq!(buf, b"hello");
        read_chunk(&mut cursor, &mut buf, 5, Compression::None, 64)
            .await
            .expect("read second file");
        assert_eq!(buf, b"world");
    }

    #[tokio::test]
    async fn test_zstd_chunks_roundtrip() {
        let data = b"compressible payload ".repeat(200);
        let mut wire = Vec::new();
        let written = write_chunk(&mut wire, &data, Compression::Zstd, 1)
            .await
            .expect("write chunk");
        assert_eq!(written, wire.len() as u64);
        assert!(wire.len() < data.len());

        let mut cursor = std::io::Cursor::new(wire);
        let mut buf = Vec::new();
        let consumed = read_chunk(&mut cursor, &mut buf, data.len() as u64, Compression::Zstd, 64)
            .await
            .expect("read chunk");
        assert_eq!(consumed, written);
        assert_eq!(buf, data);
    }

    #[tokio::test]
    async fn test_zstd_frame_larger_than_remaining_is_rejected() {
        let mut wire = Vec::new();
        write_chunk(&mut wire, &[1u8; 100], Compression::Zstd, 1)
            .await
            .expect("write chunk");

        let mut cursor = std::io::Cursor::new(wire);
        let mut buf = Vec::new();
        let result = read_chunk(&mut cursor, &mut buf, 10, Compression::Zstd, 64).await;
        assert!(matches!(result, Err(Error::Compression(_))));
    }

    #[tokio::test]
    async fn test_early_eof_is_io_error() {
        let mut cursor = std::io::Cursor::new(b"abc".to_vec());
        let mut buf = Vec::new();
        read_chunk(&mut cursor, &mut buf, 10, Compression::None, 64)
            .await
            .expect("partial read");
        assert_eq!(buf, b"abc");

        let result = read_chunk(&mut cursor, &mut buf, 7, Compression::None, 64).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
