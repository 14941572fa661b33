//! Responder side of a transfer.
//!
//! A [`ReceiveServer`] accepts connections in a background task and handles
//! each one in its own task. Every connection is announced to the
//! application as a [`ReceiveEvent::Incoming`] carrying a decision handle;
//! the payload is only read once the application accepts.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{configure_tcp_keepalive, ProgressSnapshot, ProgressTracker};
use crate::compression::{self, Compression, PayloadStats};
use crate::error::{Error, Result};
use crate::file::{destination_for, FileOutcome};
use crate::peer::PeerIdentity;
use crate::protocol::{self, ACCEPT_TRANSMISSION, DENY_TRANSMISSION};

/// Configuration of a receive server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveConfig {
    /// Address to listen on
    pub bind_addr: SocketAddr,
    /// Directory received files are placed under
    pub save_dir: PathBuf,
    /// Upper bound on raw bytes read per chunk
    pub chunk_size: usize,
    /// Payload compression; must match the sender's
    pub compression: Compression,
}

impl ReceiveConfig {
    /// Listen on `bind_addr` and save under `save_dir` with default chunking.
    #[must_use]
    pub fn new(bind_addr: SocketAddr, save_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr,
            save_dir: save_dir.into(),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            compression: Compression::None,
        }
    }

    /// Set the payload compression.
    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

/// A file offered by a sender, with where it would be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingFile {
    /// Path as announced by the sender
    pub relative_path: String,
    /// Declared size
    pub size: u64,
    /// Destination under the save directory, `None` if the path cannot be
    /// placed there
    pub destination: Option<PathBuf>,
}

/// A transfer waiting for the application's decision.
///
/// Dropping it without deciding declines the transfer.
pub struct IncomingTransfer {
    /// Connection identifier, repeated on every later event
    pub connection_id: Uuid,
    /// Who is sending
    pub sender: PeerIdentity,
    /// Offered files in transmission order
    pub files: Vec<IncomingFile>,
    decision: oneshot::Sender<bool>,
}

impl IncomingTransfer {
    /// Sum of the declared sizes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Accept the transfer.
    pub fn accept(self) {
        let _ = self.decision.send(true);
    }

    /// Decline the transfer.
    pub fn decline(self) {
        let _ = self.decision.send(false);
    }
}

impl fmt::Debug for IncomingTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingTransfer")
            .field("connection_id", &self.connection_id)
            .field("sender", &self.sender)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

/// Events raised by a receive server.
#[derive(Debug)]
pub enum ReceiveEvent {
    /// A sender offers files
    Incoming(IncomingTransfer),
    /// A chunk was received
    Progress {
        /// Connection identifier
        connection_id: Uuid,
        /// Progress so far
        snapshot: ProgressSnapshot,
    },
    /// Something went wrong on a connection
    Error {
        /// Connection identifier
        connection_id: Uuid,
        /// File affected, `None` when the whole connection failed
        path: Option<String>,
        /// Description
        message: String,
    },
    /// Every file of an accepted transfer was processed
    Finished {
        /// Connection identifier
        connection_id: Uuid,
        /// One outcome per manifest entry, in order
        outcomes: Vec<FileOutcome>,
        /// Who sent the files
        sender: PeerIdentity,
    },
}

/// Accepts transfers on a TCP port.
#[derive(Debug)]
pub struct ReceiveServer {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    config: Arc<ReceiveConfig>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReceiveServer {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(config: ReceiveConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener: Some(listener),
            local_addr,
            config: Arc::new(config),
            cancel: CancellationToken::new(),
            task: None,
        })
    }

    /// Address the server is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Directory received files are placed under.
    #[must_use]
    pub fn save_dir(&self) -> &Path {
        &self.config.save_dir
    }

    /// Start accepting connections, delivering events on `events`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if the server was started before.
    pub fn start(&mut self, events: mpsc::UnboundedSender<ReceiveEvent>) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or(Error::AlreadyRunning("receive server"))?;

        tracing::info!(
            "Receiving on {} into {}",
            self.local_addr,
            self.config.save_dir.display()
        );
        self.task = Some(tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.config),
            events,
            self.cancel.clone(),
        )));

        Ok(())
    }

    /// Stop accepting and abandon in-flight connections.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Receive accept task ended abnormally: {}", e);
            }
            tracing::info!("Receive server stopped");
        }
    }
}

impl Drop for ReceiveServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<ReceiveConfig>,
    events: mpsc::UnboundedSender<ReceiveEvent>,
    cancel: CancellationToken,
) {
    loop {
        let (stream, peer_addr) = tokio::select! {
            () = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let connection_id = Uuid::new_v4();
        tracing::debug!("Connection {} from {}", connection_id, peer_addr);

        tokio::spawn(handle_connection(
            stream,
            peer_addr,
            connection_id,
            Arc::clone(&config),
            events.clone(),
            cancel.child_token(),
        ));
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    connection_id: Uuid,
    config: Arc<ReceiveConfig>,
    events: mpsc::UnboundedSender<ReceiveEvent>,
    cancel: CancellationToken,
) {
    if let Err(e) = configure_tcp_keepalive(&stream) {
        tracing::warn!("Failed to configure TCP keep-alive: {}", e);
    }

    let result = tokio::select! {
        () = cancel.cancelled() => {
            tracing::debug!("Connection {} abandoned on shutdown", connection_id);
            return;
        }
        result = receive_transfer(&mut stream, peer_addr, connection_id, &config, &events) => result,
    };

    if let Err(e) = result.map_err(|e| e.on_connection(peer_addr)) {
        tracing::warn!("Connection {} failed: {}", connection_id, e);
        let _ = events.send(ReceiveEvent::Error {
            connection_id,
            path: None,
            message: e.to_string(),
        });
    }
}

async fn receive_transfer(
    stream: &mut TcpStream,
    peer_addr: SocketAddr,
    connection_id: Uuid,
    config: &ReceiveConfig,
    events: &mpsc::UnboundedSender<ReceiveEvent>,
) -> Result<()> {
    let manifest = protocol::read_manifest(stream).await?;
    let sender = manifest.sender.clone();
    let files: Vec<IncomingFile> = manifest
        .files
        .iter()
        .map(|entry| IncomingFile {
            relative_path: entry.relative_path.clone(),
            size: entry.size,
            destination: destination_for(&config.save_dir, &entry.relative_path),
        })
        .collect();

    tracing::info!(
        "{} offers {} file(s), {} bytes",
        sender,
        files.len(),
        manifest.total_size()
    );

    let (decision, decided) = oneshot::channel();
    let incoming = IncomingTransfer {
        connection_id,
        sender: sender.clone(),
        files: files.clone(),
        decision,
    };
    let accepted = events.send(ReceiveEvent::Incoming(incoming)).is_ok()
        && decided.await.unwrap_or(false);

    if !accepted {
        protocol::write_token(stream, DENY_TRANSMISSION).await?;
        tracing::info!("Declined transfer from {}", sender);
        return Ok(());
    }
    protocol::write_token(stream, ACCEPT_TRANSMISSION).await?;

    let mut tracker = ProgressTracker::new(files.len(), manifest.total_size());
    let mut stats = PayloadStats::default();
    let mut buf = Vec::with_capacity(config.chunk_size);
    let mut outcomes = Vec::with_capacity(files.len());
    let mut stream_broken = false;

    for (index, file) in files.into_iter().enumerate() {
        let succeeded = if stream_broken {
            false
        } else {
            tracker.begin_file(index);
            let mut sink = FileSink {
                connection_id,
                file: &file,
                events,
            };
            match sink
                .receive(stream, config, &mut buf, &mut tracker, &mut stats)
                .await
            {
                Ok(written) => written,
                Err(e) => {
                    let e = e.on_connection(peer_addr);
                    tracing::warn!("Stream from {} broke during {}: {}", sender, file.relative_path, e);
                    sink.report(&e.to_string());
                    stream_broken = true;
                    false
                }
            }
        };

        outcomes.push(FileOutcome {
            relative_path: file.relative_path,
            destination: file.destination,
            size: file.size,
            succeeded,
        });
    }

    let ok = outcomes.iter().filter(|o| o.succeeded).count();
    tracing::info!(
        "Received {}/{} file(s) from {} {}",
        ok,
        outcomes.len(),
        sender,
        stats.savings_display()
    );

    let _ = events.send(ReceiveEvent::Finished {
        connection_id,
        outcomes,
        sender,
    });

    Ok(())
}

/// Writes one manifest entry to disk, or drains it when it cannot be written.
struct FileSink<'a> {
    connection_id: Uuid,
    file: &'a IncomingFile,
    events: &'a mpsc::UnboundedSender<ReceiveEvent>,
}

impl FileSink<'_> {
    /// Consume exactly `file.size` payload bytes.
    ///
    /// Returns whether the file was written completely. Only a failure of the
    /// stream itself is returned as an error; local write failures are
    /// reported and the remaining bytes are drained to keep the stream
    /// aligned with the manifest.
    async fn receive(
        &mut self,
        stream: &mut TcpStream,
        config: &ReceiveConfig,
        buf: &mut Vec<u8>,
        tracker: &mut ProgressTracker,
        stats: &mut PayloadStats,
    ) -> Result<bool> {
        let mut output = match &self.file.destination {
            Some(destination) => match create_destination(destination).await {
                Ok(output) => Some(output),
                Err(e) => {
                    self.report(&e.to_string());
                    None
                }
            },
            None => {
                self.report(&Error::InvalidPath(self.file.relative_path.clone()).to_string());
                None
            }
        };
        let mut written = output.is_some();

        let mut remaining = self.file.size;
        while remaining > 0 {
            let wire = compression::read_chunk(
                stream,
                buf,
                remaining,
                config.compression,
                config.chunk_size.max(1),
            )
            .await?;
            let n = buf.len() as u64;
            stats.add_chunk(n, wire);
            remaining -= n;

            if let Some(out) = output.as_mut() {
                if let Err(e) = out.write_all(buf).await {
                    self.report(&Error::for_path(e, self.destination()).to_string());
                    output = None;
                    written = false;
                }
            }

            let _ = self.events.send(ReceiveEvent::Progress {
                connection_id: self.connection_id,
                snapshot: tracker.advance(n),
            });
        }

        if let Some(mut out) = output {
            if let Err(e) = out.flush().await {
                self.report(&Error::for_path(e, self.destination()).to_string());
                written = false;
            }
        }

        if written {
            tracing::debug!("Received {} ({} bytes)", self.file.relative_path, self.file.size);
        }
        Ok(written)
    }

    fn destination(&self) -> &Path {
        self.file.destination.as_deref().unwrap_or(Path::new(""))
    }

    fn report(&self, message: &str) {
        tracing::warn!("Cannot receive {}: {}", self.file.relative_path, message);
        let _ = self.events.send(ReceiveEvent::Error {
            connection_id: self.connection_id,
            path: Some(self.file.relative_path.clone()),
            message: message.to_string(),
        });
    }
}

async fn create_destination(destination: &Path) -> Result<File> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::for_path(e, parent))?;
    }
    File::create(destination)
        .await
        .map_err(|e| Error::for_path(e, destination))
}
