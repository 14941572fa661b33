//! Error types for PeerDrop.
//!
//! This module provides a unified error type for all PeerDrop operations,
//! with specific error variants for different failure modes.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// A specialized `Result` type for PeerDrop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for PeerDrop.
#[derive(Error, Debug)]
pub enum Error {
    /// No usable LAN address detected (E001)
    #[error("no network connection detected")]
    NoNetwork,

    /// Unable to broadcast on network (E002)
    #[error("unable to broadcast on network: {0}")]
    BroadcastFailed(String),

    /// Connection lost during transfer (E003)
    #[error("connection lost during transfer with {0}")]
    ConnectionLost(SocketAddr),

    /// Receiver answered the manifest with anything but an accept token (E004)
    #[error("transmission denied by receiver")]
    TransmissionDenied,

    /// Cannot create or write a destination file (E005)
    #[error("cannot write '{0}': permission denied")]
    PermissionDenied(String),

    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Relative path that cannot be placed under the save directory
    #[error("invalid path '{0}': cannot be placed under the save directory")]
    InvalidPath(String),

    /// Invalid input from the caller or the user
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid protocol message
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// Source file changed size after its manifest entry was built
    #[error("'{path}' ended after {actual} of {expected} bytes")]
    ShortRead {
        /// Relative path of the file
        path: String,
        /// Size declared in the manifest
        expected: u64,
        /// Bytes that could be read
        actual: u64,
    },

    /// Compression or decompression failed
    #[error("compression error: {0}")]
    Compression(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// A listener that is already running was started again
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::NoNetwork => Some("E001"),
            Self::BroadcastFailed(_) => Some("E002"),
            Self::ConnectionLost(_) => Some("E003"),
            Self::TransmissionDenied => Some("E004"),
            Self::PermissionDenied(_) => Some("E005"),
            _ => None,
        }
    }

    /// Returns whether this error is recoverable (can be retried by the caller).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost(_) | Self::BroadcastFailed(_) | Self::Io(_)
        )
    }

    /// Turn a failure of the peer connection into `ConnectionLost`.
    ///
    /// Other errors are returned unchanged.
    #[must_use]
    pub fn on_connection(self, peer: SocketAddr) -> Self {
        match &self {
            Self::Io(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::UnexpectedEof
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::BrokenPipe
                ) =>
            {
                Self::ConnectionLost(peer)
            }
            _ => self,
        }
    }

    /// Wrap an I/O error with the path it happened on, keeping permission
    /// failures distinguishable.
    #[must_use]
    pub fn for_path(err: io::Error, path: &std::path::Path) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.display().to_string()),
            io::ErrorKind::NotFound => Self::FileNotFound(path.display().to_string()),
            kind => Self::Io(io::Error::new(kind, format!("{}: {err}", path.display()))),
        }
    }
}
