//! Initiator side of a transfer.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use super::{configure_tcp_keepalive, ProgressSnapshot, ProgressTracker, TransferConfig};
use crate::compression::{self, PayloadStats};
use crate::error::{Error, Result};
use crate::file::{OutgoingFile, TransferManifest};
use crate::peer::PeerIdentity;
use crate::protocol::{self, ACCEPT_TRANSMISSION};

/// Lifecycle of a [`TransferSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    /// Opening the TCP connection
    Connecting,
    /// Manifest written
    ManifestSent,
    /// Waiting for the receiver's token
    AwaitingDecision,
    /// Receiver refused
    Denied,
    /// Writing file bytes
    Streaming,
    /// Every file sent
    Finished,
    /// Stopped by an error
    Failed,
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::ManifestSent => "manifest sent",
            Self::AwaitingDecision => "awaiting decision",
            Self::Denied => "denied",
            Self::Streaming => "streaming",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Events raised while sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// The receiver accepted the manifest
    Accepted(PeerIdentity),
    /// The receiver refused the manifest or closed without answering
    Denied(PeerIdentity),
    /// A chunk was written
    Progress(ProgressSnapshot),
    /// A file was written completely
    FileFinished {
        /// Path as announced in the manifest
        relative_path: String,
        /// Who received it
        receiver: PeerIdentity,
    },
    /// Every file was written
    AllFinished(PeerIdentity),
    /// The transfer stopped with an error
    Failed(String),
}

/// One outgoing transfer to one receiver.
#[derive(Debug)]
pub struct TransferSession {
    local: PeerIdentity,
    receiver: PeerIdentity,
    files: Vec<OutgoingFile>,
    config: TransferConfig,
    state: watch::Sender<SendState>,
    files_sent: AtomicUsize,
}

impl TransferSession {
    /// Prepare a transfer of `files` from `local` to `receiver`.
    #[must_use]
    pub fn new(
        local: PeerIdentity,
        receiver: PeerIdentity,
        files: Vec<OutgoingFile>,
        config: TransferConfig,
    ) -> Self {
        let (state, _) = watch::channel(SendState::Connecting);
        Self {
            local,
            receiver,
            files,
            config,
            state,
            files_sent: AtomicUsize::new(0),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SendState {
        *self.state.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SendState> {
        self.state.subscribe()
    }

    /// Files to send, in order.
    #[must_use]
    pub fn files(&self) -> &[OutgoingFile] {
        &self.files
    }

    /// Receiver of this transfer.
    #[must_use]
    pub fn receiver(&self) -> &PeerIdentity {
        &self.receiver
    }

    /// Number of files written completely so far.
    #[must_use]
    pub fn files_sent(&self) -> usize {
        self.files_sent.load(Ordering::Relaxed)
    }

    /// Run the transfer to completion.
    ///
    /// Events are delivered on `events`; a closed channel is not an error.
    ///
    /// # Errors
    ///
    /// Returns `TransmissionDenied` if the receiver did not accept, or the
    /// I/O or protocol error that stopped the transfer. Files already sent
    /// stay on the receiver.
    pub async fn send(&self, events: mpsc::UnboundedSender<TransferEvent>) -> Result<()> {
        let result = self.run(&events).await;

        match &result {
            Ok(()) | Err(Error::TransmissionDenied) => {}
            Err(e) => {
                tracing::warn!("Transfer to {} failed: {}", self.receiver, e);
                self.state.send_replace(SendState::Failed);
                let _ = events.send(TransferEvent::Failed(e.to_string()));
            }
        }

        result
    }

    async fn run(&self, events: &mpsc::UnboundedSender<TransferEvent>) -> Result<()> {
        self.state.send_replace(SendState::Connecting);
        let addr = self.receiver.socket_addr()?;
        let mut stream = TcpStream::connect(addr).await?;
        if let Err(e) = configure_tcp_keepalive(&stream) {
            tracing::warn!("Failed to configure TCP keep-alive: {}", e);
        }
        tracing::debug!("Connected to {}", addr);

        let manifest = TransferManifest::new(
            self.files.iter().map(OutgoingFile::entry).collect(),
            self.local.clone(),
        );
        protocol::write_manifest(&mut stream, &manifest).await?;
        self.state.send_replace(SendState::ManifestSent);

        self.state.send_replace(SendState::AwaitingDecision);
        match protocol::read_token(&mut stream).await {
            Ok(token) if token == ACCEPT_TRANSMISSION => {
                self.state.send_replace(SendState::Streaming);
                let _ = events.send(TransferEvent::Accepted(self.receiver.clone()));
            }
            other => {
                match other {
                    Ok(token) => tracing::info!("{} denied the transfer ({})", self.receiver, token),
                    Err(e) => tracing::info!("{} closed without accepting: {}", self.receiver, e),
                }
                self.state.send_replace(SendState::Denied);
                let _ = events.send(TransferEvent::Denied(self.receiver.clone()));
                return Err(Error::TransmissionDenied);
            }
        }

        let chunk_size = self.config.chunk_size.clamp(1, compression::MAX_CHUNK_SIZE);
        let mut tracker = ProgressTracker::new(self.files.len(), manifest.total_size());
        let mut stats = PayloadStats::default();
        let mut buf = vec![0u8; chunk_size];

        for (index, file) in self.files.iter().enumerate() {
            tracker.begin_file(index);
            self.stream_file(&mut stream, file, &mut buf, &mut tracker, &mut stats, events)
                .await
                .map_err(|e| e.on_connection(addr))?;
            self.files_sent.fetch_add(1, Ordering::Relaxed);
            let _ = events.send(TransferEvent::FileFinished {
                relative_path: file.relative_path.clone(),
                receiver: self.receiver.clone(),
            });
        }

        stream
            .flush()
            .await
            .map_err(|e| Error::from(e).on_connection(addr))?;
        stream
            .shutdown()
            .await
            .map_err(|e| Error::from(e).on_connection(addr))?;

        self.state.send_replace(SendState::Finished);
        let _ = events.send(TransferEvent::AllFinished(self.receiver.clone()));
        tracing::info!(
            "Sent {} file(s) to {} ({} chunks) {}",
            self.files.len(),
            self.receiver,
            stats.chunks,
            stats.savings_display()
        );

        Ok(())
    }

    async fn stream_file(
        &self,
        stream: &mut TcpStream,
        file: &OutgoingFile,
        buf: &mut [u8],
        tracker: &mut ProgressTracker,
        stats: &mut PayloadStats,
        events: &mpsc::UnboundedSender<TransferEvent>,
    ) -> Result<()> {
        let mut source = File::open(&file.source)
            .await
            .map_err(|e| Error::for_path(e, &file.source))?;
        let mut remaining = file.size;

        while remaining > 0 {
            let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
            let n = source.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(Error::ShortRead {
                    path: file.relative_path.clone(),
                    expected: file.size,
                    actual: file.size - remaining,
                });
            }

            let wire = compression::write_chunk(
                stream,
                &buf[..n],
                self.config.compression,
                self.config.compression_level,
            )
            .await?;
            stats.add_chunk(n as u64, wire);
            remaining -= n as u64;

            let _ = events.send(TransferEvent::Progress(tracker.advance(n as u64)));
        }

        tracing::debug!("Sent {} ({} bytes)", file.relative_path, file.size);
        Ok(())
    }
}
