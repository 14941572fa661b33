//! File types for PeerDrop transfers.
//!
//! This module handles:
//! - Manifest entries and the transfer manifest
//! - Outgoing file descriptions on the sending side
//! - Per-file outcomes on the receiving side
//! - Destination path derivation under the save directory
//! - Human-readable sizes, throughput and durations
//!
//! Relative paths always use `/` as separator, whatever the platform of
//! either end.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::peer::PeerIdentity;

/// One file announced in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the transfer root, `/`-separated
    pub relative_path: String,
    /// Size in bytes
    pub size: u64,
}

impl ManifestEntry {
    /// Create a new manifest entry.
    #[must_use]
    pub fn new(relative_path: impl Into<String>, size: u64) -> Self {
        Self {
            relative_path: relative_path.into(),
            size,
        }
    }
}

/// The list of files a sender intends to transmit, plus who is sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferManifest {
    /// Files in transmission order
    pub files: Vec<ManifestEntry>,
    /// Sender identity
    pub sender: PeerIdentity,
}

impl TransferManifest {
    /// Create a new manifest.
    #[must_use]
    pub fn new(files: Vec<ManifestEntry>, sender: PeerIdentity) -> Self {
        Self { files, sender }
    }

    /// Number of files in the manifest.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Sum of all declared sizes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// A file on the sending side, already expanded from the user's selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    /// Where to read the bytes from
    pub source: PathBuf,
    /// Path announced to the receiver, `/`-separated
    pub relative_path: String,
    /// Size announced to the receiver
    pub size: u64,
}

impl OutgoingFile {
    /// Create an outgoing file with an explicit size.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>, relative_path: impl Into<String>, size: u64) -> Self {
        Self {
            source: source.into(),
            relative_path: relative_path.into(),
            size,
        }
    }

    /// Describe a file on disk, taking its size from the filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read or the path is
    /// not a regular file.
    pub fn from_path(source: impl Into<PathBuf>, relative_path: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let metadata = std::fs::metadata(&source).map_err(|e| Error::for_path(e, &source))?;
        if !metadata.is_file() {
            return Err(Error::InvalidInput(format!(
                "{} is not a regular file",
                source.display()
            )));
        }
        Ok(Self::new(source, relative_path, metadata.len()))
    }

    /// The manifest entry announcing this file.
    #[must_use]
    pub fn entry(&self) -> ManifestEntry {
        ManifestEntry::new(self.relative_path.clone(), self.size)
    }
}

/// Result of receiving one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    /// Path as announced by the sender
    pub relative_path: String,
    /// Where the file was (or would have been) written; `None` when the
    /// announced path cannot be placed under the save directory
    pub destination: Option<PathBuf>,
    /// Declared size
    pub size: u64,
    /// Whether every byte was written
    pub succeeded: bool,
}

/// Derive the destination of `relative_path` under `save_dir`.
///
/// The path is split on `/` and every segment must be a plain name. Absolute
/// paths, `..`, `.` and platform prefixes are refused, so the result always
/// lies inside `save_dir`. Returns `None` for a path that cannot be placed.
#[must_use]
pub fn destination_for(save_dir: &Path, relative_path: &str) -> Option<PathBuf> {
    if relative_path.is_empty() || relative_path.starts_with('/') {
        return None;
    }

    let mut destination = save_dir.to_path_buf();
    let mut pushed = 0usize;

    for segment in relative_path.split('/') {
        if segment.is_empty() {
            continue;
        }
        if segment.contains('\\') {
            return None;
        }
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => destination.push(name),
            _ => return None,
        }
        pushed += 1;
    }

    (pushed > 0).then_some(destination)
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Format a throughput in bits per second for display.
#[must_use]
pub fn format_bits_per_second(bits_per_second: u64) -> String {
    const UNITS: [&str; 3] = ["Kbit/s", "Mbit/s", "Gbit/s"];

    if bits_per_second < 1024 {
        return format!("{bits_per_second} bit/s");
    }

    let mut value = bits_per_second as f64;
    let mut unit = 0;
    value /= 1024.0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Format a duration as `1 h 02 min 03 s`, `4 min 05 s` or `6 s`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs() + u64::from(duration.subsec_millis() >= 500);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours} h {minutes:02} min {seconds:02} s")
    } else if minutes > 0 {
        format!("{minutes} min {seconds:02} s")
    } else {
        format!("{seconds} s")
    }
}
