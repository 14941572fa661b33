//! Node facade.
//!
//! A [`Node`] owns this peer's identity and the long-running listeners
//! (discovery responder, presence service and receive server), runs
//! discovery on demand and bounds how many outgoing transfers run at once.
//! Every file sent or received through it ends up in its [`TransferLog`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex, Semaphore};

use crate::config::Config;
use crate::connection;
use crate::discovery::{self, DiscoveryConfig, DiscoveryOutcome, DiscoveryResponder};
use crate::error::{Error, Result};
use crate::file::OutgoingFile;
use crate::history::TransferLog;
use crate::peer::PeerIdentity;
use crate::presence::{PresenceConfig, PresenceEvent, PresenceService, Roster};
use crate::transfer::{
    ReceiveConfig, ReceiveEvent, ReceiveServer, TransferConfig, TransferEvent, TransferSession,
};

const PRESENCE_EVENT_CAPACITY: usize = 64;

/// One peer on the network.
#[derive(Debug)]
pub struct Node {
    identity: PeerIdentity,
    config: Config,
    roster: Roster,
    history: TransferLog,
    presence_events: broadcast::Sender<PresenceEvent>,
    send_permits: Arc<Semaphore>,
    presence: Mutex<Option<PresenceService>>,
    responder: Mutex<Option<DiscoveryResponder>>,
    receiver: Mutex<Option<ReceiveServer>>,
}

impl Node {
    /// Build a node from configuration, detecting the advertised address.
    ///
    /// The ip is `network.advertise_ip` or the detected LAN address, the port
    /// is `network.transfer_port` or a free port picked now.
    ///
    /// # Errors
    ///
    /// Returns `NoNetwork` if no LAN address can be found, or an error if no
    /// free port is available.
    pub fn new(config: &Config) -> Result<Self> {
        let ip = match config.network.advertise_ip {
            Some(ip) => ip,
            None => connection::detect_lan_address()?,
        };
        let port = match config.network.transfer_port {
            0 => connection::find_free_port()?,
            port => port,
        };

        let identity = PeerIdentity::new(
            config.identity.name.clone(),
            ip.to_string(),
            port,
            config.identity.avatar.clone(),
        );
        Ok(Self::from_parts(identity, config))
    }

    /// Build a node around an already known identity.
    #[must_use]
    pub fn from_parts(identity: PeerIdentity, config: &Config) -> Self {
        let (presence_events, _) = broadcast::channel(PRESENCE_EVENT_CAPACITY);
        Self {
            identity,
            config: config.clone(),
            roster: Roster::new(),
            history: TransferLog::new(),
            presence_events,
            send_permits: Arc::new(Semaphore::new(config.transfer.max_concurrent_sends.max(1))),
            presence: Mutex::new(None),
            responder: Mutex::new(None),
            receiver: Mutex::new(None),
        }
    }

    /// This peer's identity as announced to others.
    #[must_use]
    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Peers currently known, from presence and discovery.
    #[must_use]
    pub fn roster(&self) -> Roster {
        self.roster.clone()
    }

    /// Files sent and received by this node.
    #[must_use]
    pub fn history(&self) -> TransferLog {
        self.history.clone()
    }

    /// Receive roster changes from now on.
    #[must_use]
    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.presence_events.subscribe()
    }

    fn discovery_config(&self) -> DiscoveryConfig {
        self.config.discovery_config()
    }

    fn presence_config(&self) -> PresenceConfig {
        self.config.presence_config()
    }

    fn transfer_config(&self) -> TransferConfig {
        self.config.transfer_config()
    }

    fn discovery_timeout(&self) -> Duration {
        self.config.network.discovery_timeout
    }

    /// Run discovery for the configured window.
    ///
    /// Peers found for the first time are added to the roster and announced
    /// as [`PresenceEvent::Joined`].
    pub async fn discover(&self) -> DiscoveryOutcome {
        let outcome =
            discovery::discover(&self.identity, &self.discovery_config(), self.discovery_timeout())
                .await;

        for peer in self.roster.merge(outcome.peers.iter().cloned()) {
            let _ = self.presence_events.send(PresenceEvent::Joined(peer));
        }
        outcome
    }

    /// Announce this peer and track others.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if presence is already on, or an error if
    /// the presence port cannot be bound.
    pub async fn start_presence(&self) -> Result<()> {
        let mut slot = self.presence.lock().await;
        if slot.is_some() {
            return Err(Error::AlreadyRunning("presence service"));
        }

        let mut service = PresenceService::new(self.identity.clone(), self.presence_config())
            .with_roster(self.roster.clone())
            .with_events(self.presence_events.clone());
        service.start().await?;
        *slot = Some(service);
        Ok(())
    }

    /// Say goodbye and stop tracking. Does nothing if presence is off.
    pub async fn stop_presence(&self) {
        if let Some(mut service) = self.presence.lock().await.take() {
            service.stop().await;
        }
    }

    /// Answer discovery requests from other peers.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if the responder is already on, or an error
    /// if the discovery port cannot be bound.
    pub async fn start_responder(&self) -> Result<()> {
        let mut slot = self.responder.lock().await;
        if slot.is_some() {
            return Err(Error::AlreadyRunning("discovery responder"));
        }

        *slot = Some(DiscoveryResponder::start(self.identity.clone(), &self.discovery_config()).await?);
        Ok(())
    }

    /// Stop answering discovery requests.
    pub async fn stop_responder(&self) {
        if let Some(mut responder) = self.responder.lock().await.take() {
            responder.stop().await;
        }
    }

    /// Accept transfers on this node's port, saving under `save_dir`.
    ///
    /// Events are forwarded to `events`; finished transfers are recorded in
    /// the history before being forwarded.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if the receive server is already on, or an
    /// error if the transfer port cannot be bound.
    pub async fn start_receiving(
        &self,
        save_dir: impl Into<PathBuf>,
        events: mpsc::UnboundedSender<ReceiveEvent>,
    ) -> Result<()> {
        let mut slot = self.receiver.lock().await;
        if slot.is_some() {
            return Err(Error::AlreadyRunning("receive server"));
        }

        let config: ReceiveConfig = self.config.receive_config(self.identity.port, save_dir);
        let mut server = ReceiveServer::bind(config).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        server.start(tx)?;
        tokio::spawn(record_received(rx, self.history.clone(), events));

        *slot = Some(server);
        Ok(())
    }

    /// Stop accepting transfers.
    pub async fn stop_receiving(&self) {
        if let Some(mut server) = self.receiver.lock().await.take() {
            server.stop().await;
        }
    }

    /// Start the responder, presence and the receive server into the
    /// configured save directory.
    ///
    /// # Errors
    ///
    /// Returns the first listener that fails to start; listeners started
    /// before it are stopped again.
    pub async fn start(&self, events: mpsc::UnboundedSender<ReceiveEvent>) -> Result<()> {
        self.start_receiving(self.config.transfer.save_dir.clone(), events)
            .await?;

        if let Err(e) = self.start_responder().await {
            self.stop_receiving().await;
            return Err(e);
        }
        if let Err(e) = self.start_presence().await {
            self.stop_responder().await;
            self.stop_receiving().await;
            return Err(e);
        }

        tracing::info!("Node {} started", self.identity);
        Ok(())
    }

    /// Stop every listener, announcing `BYE` first.
    pub async fn stop(&self) {
        self.stop_presence().await;
        self.stop_responder().await;
        self.stop_receiving().await;
        tracing::info!("Node {} stopped", self.identity);
    }

    /// Send `files` to `receiver`, waiting for a free send slot first.
    ///
    /// Every file is recorded in the history; files the receiver did not
    /// get completely are recorded as failed.
    ///
    /// # Errors
    ///
    /// Returns `TransmissionDenied` if the receiver declined, or the error
    /// that stopped the transfer.
    pub async fn send(
        &self,
        receiver: PeerIdentity,
        files: Vec<OutgoingFile>,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> Result<()> {
        let _permit = self
            .send_permits
            .acquire()
            .await
            .map_err(|e| Error::Internal(format!("Send limiter closed: {e}")))?;

        let session =
            TransferSession::new(self.identity.clone(), receiver, files, self.transfer_config());
        let result = session.send(events).await;

        let sent = session.files_sent();
        for (index, file) in session.files().iter().enumerate() {
            self.history
                .record_sent(session.receiver(), file, index < sent);
        }

        result
    }
}

async fn record_received(
    mut rx: mpsc::UnboundedReceiver<ReceiveEvent>,
    history: TransferLog,
    events: mpsc::UnboundedSender<ReceiveEvent>,
) {
    while let Some(event) = rx.recv().await {
        if let ReceiveEvent::Finished {
            outcomes, sender, ..
        } = &event
        {
            for outcome in outcomes {
                history.record_received(sender, outcome);
            }
        }
        if events.send(event).is_err() {
            tracing::debug!("Receive event consumer dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::TransferDirection;
    use tempfile::TempDir;

    fn loopback_node(name: &str) -> Node {
        let port = connection::find_free_port().unwrap();
        let identity = PeerIdentity::new(name, "127.0.0.1", port, "default");
        let mut config = Config::default();
        config.network.discovery_port = 0;
        config.network.presence_port = 0;
        config.network.broadcast_addr = std::net::Ipv4Addr::LOCALHOST;
        Node::from_parts(identity, &config)
    }

    #[tokio::test]
    async fn test_send_records_history_on_both_sides() {
        let source_dir = TempDir::new().unwrap();
        let save_dir = TempDir::new().unwrap();
        let path = source_dir.path().join("note.txt");
        std::fs::write(&path, b"hello bob").unwrap();

        let alice = loopback_node("Alice");
        let bob = loopback_node("Bob");

        let (receive_tx, mut receive_rx) = mpsc::unbounded_channel();
        bob.start_receiving(save_dir.path(), receive_tx).await.unwrap();

        let accept = tokio::spawn(async move {
            loop {
                match receive_rx.recv().await {
                    Some(ReceiveEvent::Incoming(incoming)) => incoming.accept(),
                    Some(ReceiveEvent::Finished { outcomes, .. }) => break outcomes,
                    Some(_) => {}
                    None => panic!("receive channel closed"),
                }
            }
        });

        let (send_tx, _send_rx) = mpsc::unbounded_channel();
        let file = OutgoingFile::from_path(&path, "note.txt").unwrap();
        alice
            .send(bob.identity().clone(), vec![file], send_tx)
            .await
            .unwrap();

        let outcomes = accept.await.unwrap();
        assert!(outcomes[0].succeeded);
        assert_eq!(
            std::fs::read(save_dir.path().join("note.txt")).unwrap(),
            b"hello bob"
        );

        let sent = alice.history().sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].succeeded);
        assert_eq!(sent[0].peer, *bob.identity());

        // Finished is forwarded after being recorded
        let received = bob.history().received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].direction, TransferDirection::Received);
        assert_eq!(received[0].peer, *alice.identity());

        bob.stop_receiving().await;
    }

    #[tokio::test]
    async fn test_denied_send_records_failures() {
        let source_dir = TempDir::new().unwrap();
        let save_dir = TempDir::new().unwrap();
        let path = source_dir.path().join("a.bin");
        std::fs::write(&path, [7u8; 32]).unwrap();

        let alice = loopback_node("Alice");
        let bob = loopback_node("Bob");

        let (receive_tx, mut receive_rx) = mpsc::unbounded_channel();
        bob.start_receiving(save_dir.path(), receive_tx).await.unwrap();
        tokio::spawn(async move {
            while let Some(event) = receive_rx.recv().await {
                if let ReceiveEvent::Incoming(incoming) = event {
                    incoming.decline();
                }
            }
        });

        let (send_tx, _send_rx) = mpsc::unbounded_channel();
        let file = OutgoingFile::from_path(&path, "a.bin").unwrap();
        let result = alice.send(bob.identity().clone(), vec![file], send_tx).await;

        assert!(matches!(result, Err(Error::TransmissionDenied)));
        let sent = alice.history().sent();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].succeeded);
        assert!(bob.history().is_empty());

        bob.stop_receiving().await;
    }

    #[tokio::test]
    async fn test_listeners_refuse_double_start() {
        let save_dir = TempDir::new().unwrap();
        let node = loopback_node("Carol");

        let (tx, _rx) = mpsc::unbounded_channel();
        node.start_receiving(save_dir.path(), tx.clone()).await.unwrap();
        assert!(matches!(
            node.start_receiving(save_dir.path(), tx).await,
            Err(Error::AlreadyRunning(_))
        ));

        node.start_responder().await.unwrap();
        assert!(matches!(
            node.start_responder().await,
            Err(Error::AlreadyRunning(_))
        ));

        node.stop().await;
        node.start_responder().await.unwrap();
        node.stop_responder().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let node = loopback_node("Dave");
        node.stop().await;
        node.stop_presence().await;
        assert!(node.roster().is_empty());
    }
}
