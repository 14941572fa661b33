//! Sent/received log for PeerDrop.
//!
//! Every outgoing file and every received outcome is recorded in memory for
//! the lifetime of a node, so the application can show what went where.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::file::{FileOutcome, OutgoingFile};
use crate::peer::PeerIdentity;

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// Files were sent to another peer
    Sent,
    /// Files were received from another peer
    Received,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => write!(f, "Sent"),
            Self::Received => write!(f, "Received"),
        }
    }
}

/// One file sent or received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Unique identifier of this record
    pub id: Uuid,
    /// When the file was recorded
    pub timestamp: DateTime<Utc>,
    /// Direction of the transfer
    pub direction: TransferDirection,
    /// Remote peer
    pub peer: PeerIdentity,
    /// Path as it appeared in the manifest
    pub relative_path: String,
    /// Declared size in bytes
    pub size: u64,
    /// Whether the file made it completely
    pub succeeded: bool,
}

impl TransferRecord {
    /// Create a record stamped with the current time.
    #[must_use]
    pub fn new(
        direction: TransferDirection,
        peer: PeerIdentity,
        relative_path: impl Into<String>,
        size: u64,
        succeeded: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            direction,
            peer,
            relative_path: relative_path.into(),
            size,
            succeeded,
        }
    }
}

/// Shared in-memory transfer log. Cloning yields another handle on the same
/// log.
#[derive(Debug, Clone, Default)]
pub struct TransferLog {
    records: Arc<RwLock<Vec<TransferRecord>>>,
}

impl TransferLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub fn record(&self, record: TransferRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Record an outgoing file.
    pub fn record_sent(&self, receiver: &PeerIdentity, file: &OutgoingFile, succeeded: bool) {
        self.record(TransferRecord::new(
            TransferDirection::Sent,
            receiver.clone(),
            file.relative_path.clone(),
            file.size,
            succeeded,
        ));
    }

    /// Record a received file.
    pub fn record_received(&self, sender: &PeerIdentity, outcome: &FileOutcome) {
        self.record(TransferRecord::new(
            TransferDirection::Received,
            sender.clone(),
            outcome.relative_path.clone(),
            outcome.size,
            outcome.succeeded,
        ));
    }

    /// All records, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<TransferRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records of sent files, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<TransferRecord> {
        self.filtered(TransferDirection::Sent)
    }

    /// Records of received files, oldest first.
    #[must_use]
    pub fn received(&self) -> Vec<TransferRecord> {
        self.filtered(TransferDirection::Received)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every record.
    pub fn clear(&self) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn filtered(&self, direction: TransferDirection) -> Vec<TransferRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.direction == direction)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn bob() -> PeerIdentity {
        PeerIdentity::new("Bob", "10.0.0.2", 5000, "default")
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(TransferDirection::Sent.to_string(), "Sent");
        assert_eq!(TransferDirection::Received.to_string(), "Received");
    }

    #[test]
    fn test_sent_and_received_are_separated() {
        let log = TransferLog::new();
        log.record_sent(&bob(), &OutgoingFile::new("/tmp/a.txt", "a.txt", 100), true);
        log.record_received(
            &bob(),
            &FileOutcome {
                relative_path: "dir/b.txt".into(),
                destination: Some(PathBuf::from("/save/dir/b.txt")),
                size: 50,
                succeeded: false,
            },
        );

        assert_eq!(log.len(), 2);

        let sent = log.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].relative_path, "a.txt");
        assert!(sent[0].succeeded);

        let received = log.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].size, 50);
        assert!(!received[0].succeeded);
    }

    #[test]
    fn test_clones_share_records() {
        let log = TransferLog::new();
        let handle = log.clone();
        handle.record(TransferRecord::new(
            TransferDirection::Sent,
            bob(),
            "x",
            1,
            true,
        ));
        assert_eq!(log.len(), 1);

        log.clear();
        assert!(handle.is_empty());
    }
}
