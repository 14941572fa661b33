//! Network discovery for PeerDrop.
//!
//! Discovery is on demand: a requester broadcasts one `DISCOVERY_REQUEST`
//! datagram and collects `DISCOVERY_RESPONSE` answers for a bounded window.
//! Every running node keeps a [`DiscoveryResponder`] bound to the discovery
//! port that answers such requests with its own identity.
//!
//! ## Protocol
//!
//! - Port: 8888 (UDP)
//! - Request: `DISCOVERY_REQUEST`, broadcast
//! - Response: `DISCOVERY_RESPONSE|<name>|<ip>|<port>|<avatar>`, unicast back
//!   to the requester's source address
//! - Collection window: 2 seconds by default

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::peer::PeerIdentity;
use crate::protocol::{self, DISCOVERY_REQUEST};

/// Largest datagram read by the discovery and presence sockets.
pub(crate) const MAX_DATAGRAM_SIZE: usize = 4096;

/// Where discovery requests are sent and answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// UDP port responders listen on
    pub port: u16,
    /// Destination address of the request
    pub broadcast_addr: Ipv4Addr,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_DISCOVERY_PORT,
            broadcast_addr: Ipv4Addr::BROADCAST,
        }
    }
}

/// Result of one discovery round.
///
/// A socket failure ends collection early; the peers gathered until then are
/// still returned next to the error.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    /// Peers that answered, excluding the local peer
    pub peers: HashSet<PeerIdentity>,
    /// Error that stopped collection, if any
    pub error: Option<Error>,
}

impl DiscoveryOutcome {
    /// Peers sorted by name, then address.
    #[must_use]
    pub fn sorted_peers(&self) -> Vec<PeerIdentity> {
        let mut peers: Vec<_> = self.peers.iter().cloned().collect();
        peers.sort_by(|a, b| {
            (a.name.as_str(), a.ip.as_str(), a.port).cmp(&(b.name.as_str(), b.ip.as_str(), b.port))
        });
        peers
    }
}

/// Broadcast a discovery request and collect answers until `timeout`.
///
/// Answers equal to `local` (same ip and port) are dropped, and duplicates
/// collapse. Never fails: errors are reported in [`DiscoveryOutcome::error`].
pub async fn discover(
    local: &PeerIdentity,
    config: &DiscoveryConfig,
    timeout: Duration,
) -> DiscoveryOutcome {
    let deadline = Instant::now() + timeout;
    let mut outcome = DiscoveryOutcome::default();

    let socket = match broadcast_socket() {
        Ok(socket) => socket,
        Err(e) => {
            tracing::warn!("Failed to create discovery socket: {}", e);
            outcome.error = Some(e);
            return outcome;
        }
    };

    let target = SocketAddrV4::new(config.broadcast_addr, config.port);
    if let Err(e) = socket.send_to(DISCOVERY_REQUEST.as_bytes(), target).await {
        tracing::warn!("Failed to send discovery request to {}: {}", target, e);
        outcome.error = Some(Error::BroadcastFailed(e.to_string()));
        return outcome;
    }
    tracing::debug!("Discovery request sent to {}", target);

    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, source))) => {
                let Some(peer) = protocol::decode_discovery_response(&buf[..len]) else {
                    tracing::debug!("Ignoring unexpected datagram from {}", source);
                    continue;
                };
                if peer == *local {
                    continue;
                }
                tracing::debug!("Discovered {} via {}", peer, source);
                outcome.peers.insert(peer);
            }
            Ok(Err(e)) => {
                tracing::warn!("Error receiving discovery response: {}", e);
                outcome.error = Some(e.into());
                break;
            }
            Err(_) => break,
        }
    }

    tracing::info!("Discovery finished with {} peer(s)", outcome.peers.len());
    outcome
}

/// Answers discovery requests with this peer's identity.
#[derive(Debug)]
pub struct DiscoveryResponder {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DiscoveryResponder {
    /// Bind the discovery port and start answering requests.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `local` cannot be encoded, or an error if
    /// the port cannot be bound.
    pub async fn start(local: PeerIdentity, config: &DiscoveryConfig) -> Result<Self> {
        let response = protocol::encode_discovery_response(&local)?;
        let socket = bind_udp(config.port, false)?;
        let local_addr = socket.local_addr()?;
        let cancel = CancellationToken::new();

        let task = tokio::spawn(respond_loop(socket, response, cancel.clone()));
        tracing::info!("Discovery responder listening on {}", local_addr);

        Ok(Self {
            local_addr,
            cancel,
            task: Some(task),
        })
    }

    /// Address the responder is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop answering and wait for the task to finish.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Discovery responder task ended abnormally: {}", e);
            }
            tracing::info!("Discovery responder stopped");
        }
    }

    /// Whether the responder task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for DiscoveryResponder {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn respond_loop(socket: UdpSocket, response: Vec<u8>, cancel: CancellationToken) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, source) = tokio::select! {
            () = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!("Error receiving discovery request: {}", e);
                    continue;
                }
            },
        };

        if !protocol::is_discovery_request(&buf[..len]) {
            continue;
        }

        tracing::debug!("Answering discovery request from {}", source);
        if let Err(e) = socket.send_to(&response, source).await {
            tracing::warn!("Failed to answer discovery request from {}: {}", source, e);
        }
    }
}

/// Ephemeral UDP socket allowed to send broadcasts.
pub(crate) fn broadcast_socket() -> Result<UdpSocket> {
    bind_udp(0, true)
}

/// Bind a UDP socket on all interfaces.
///
/// Address reuse is enabled so several local processes can share the
/// well-known ports.
pub(crate) fn bind_udp(port: u16, broadcast: bool) -> Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    socket.set_broadcast(broadcast)?;
    socket.set_reuse_address(true)?;

    #[cfg(target_os = "macos")]
    socket.set_reuse_port(true)?;

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&addr.into())?;

    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}
