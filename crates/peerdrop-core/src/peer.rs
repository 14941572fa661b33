//! Peer identity.
//!
//! A [`PeerIdentity`] names one participant on the network: what to show the
//! user (name, avatar tag) and where its receive server listens (ip, port).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Avatar tag used when none is configured.
pub const DEFAULT_AVATAR: &str = "default";

/// Placeholder for string fields missing from a received message.
pub const UNKNOWN: &str = "unknown";

/// Identity of a participant.
///
/// Two identities are equal when their `ip` and `port` match. The name and
/// avatar can change between announcements of the same peer and are not part
/// of equality or hashing.
///
/// The text fields travel `|`-separated and must not contain `|`; encoding an
/// identity that does fails with `InvalidInput`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Display name
    pub name: String,
    /// IP address the peer is reachable on
    pub ip: String,
    /// TCP port of the peer's receive server
    pub port: u16,
    /// Opaque avatar tag
    pub avatar: String,
}

impl PeerIdentity {
    /// Create a new identity.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        ip: impl Into<String>,
        port: u16,
        avatar: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
            port,
            avatar: avatar.into(),
        }
    }

    /// Socket address of the peer's receive server.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `ip` is not a literal IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .ip
            .parse()
            .map_err(|_| Error::InvalidInput(format!("'{}' is not an IP address", self.ip)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Whether `ip:port` is this identity's endpoint.
    #[must_use]
    pub fn same_endpoint(&self, ip: &str, port: u16) -> bool {
        self.ip == ip && self.port == port
    }
}

impl PartialEq for PeerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.same_endpoint(&other.ip, other.port)
    }
}

impl Eq for PeerIdentity {}

impl Hash for PeerIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.ip, self.port)
    }
}
