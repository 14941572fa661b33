//! File transfer engine for PeerDrop.
//!
//! This module handles the TCP side of a transfer:
//!
//! - [`send::TransferSession`]: the initiator, one per outgoing transfer
//! - [`receive::ReceiveServer`]: the responder, one accept loop per node
//!
//! ## Transfer Protocol
//!
//! 1. Initiator connects and writes the manifest frame
//! 2. Responder answers with an `ACCEPT_TRANSMISSION` or `DENY_TRANSMISSION`
//!    frame
//! 3. On accept, the initiator streams every file's bytes in manifest order,
//!    raw or as zstd chunk frames
//! 4. Initiator closes the connection
//!
//! There is no per-file acknowledgement: the receiver relies on the sizes
//! declared in the manifest to split the stream.

pub mod receive;
pub mod send;

pub use receive::{IncomingFile, IncomingTransfer, ReceiveConfig, ReceiveEvent, ReceiveServer};
pub use send::{SendState, TransferEvent, TransferSession};

use std::fmt;
use std::time::{Duration, Instant};

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

use crate::compression::Compression;
use crate::error::{Error, Result};

/// Configure TCP keep-alive on a socket.
///
/// Configuration:
/// - Start keep-alive after 10 seconds of idle time
/// - Retry keep-alive packets every 5 seconds
pub(crate) fn configure_tcp_keepalive(stream: &TcpStream) -> Result<()> {
    let socket_ref = SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    socket_ref
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    tracing::debug!("TCP keep-alive enabled on socket");
    Ok(())
}

/// Configuration for an outgoing transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Raw bytes read per chunk, capped at [`crate::compression::MAX_CHUNK_SIZE`]
    pub chunk_size: usize,
    /// Payload compression; must match the receiver's
    pub compression: Compression,
    /// zstd level (1-22)
    pub compression_level: i32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            compression: Compression::None,
            compression_level: 1,
        }
    }
}

/// Progress of a transfer, taken after every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Index of the file being transferred (0-based)
    pub current_file_index: usize,
    /// Number of files in the manifest
    pub total_files: usize,
    /// Payload bytes transferred across all files
    pub bytes_transferred: u64,
    /// Sum of the declared sizes
    pub total_bytes: u64,
    /// Average throughput since the transfer was accepted
    pub throughput_bits_per_second: u64,
}

impl ProgressSnapshot {
    /// Overall progress in `[0.0, 1.0]`. An empty transfer counts as complete.
    #[must_use]
    pub fn total_progress(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            (self.bytes_transferred as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
        }
    }

    /// Estimated time left, or `None` while there is no throughput yet.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        if self.throughput_bits_per_second == 0 {
            return None;
        }
        let left_bits = self.total_bytes.saturating_sub(self.bytes_transferred) as f64 * 8.0;
        Some(Duration::from_secs_f64(
            left_bits / self.throughput_bits_per_second as f64,
        ))
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file {}/{} {:.1}%",
            (self.current_file_index + 1).min(self.total_files.max(1)),
            self.total_files,
            self.total_progress() * 100.0
        )
    }
}

/// Accumulates payload bytes and derives snapshots.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    total_files: usize,
    total_bytes: u64,
    bytes_transferred: u64,
    current_file_index: usize,
    started_at: Instant,
}

impl ProgressTracker {
    /// Start measuring now.
    pub(crate) fn new(total_files: usize, total_bytes: u64) -> Self {
        Self {
            total_files,
            total_bytes,
            bytes_transferred: 0,
            current_file_index: 0,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn begin_file(&mut self, index: usize) {
        self.current_file_index = index;
    }

    /// Account for `bytes` more and return the new snapshot.
    pub(crate) fn advance(&mut self, bytes: u64) -> ProgressSnapshot {
        self.bytes_transferred += bytes;
        self.snapshot()
    }

    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let throughput = if elapsed > 0.0 {
            (self.bytes_transferred as f64 * 8.0 / elapsed) as u64
        } else {
            0
        };

        ProgressSnapshot {
            current_file_index: self.current_file_index,
            total_files: self.total_files,
            bytes_transferred: self.bytes_transferred,
            total_bytes: self.total_bytes,
            throughput_bits_per_second: throughput,
        }
    }
}
