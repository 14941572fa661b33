//! Connection utilities.
//!
//! This module provides:
//! - Host address parsing for peers entered by hand
//! - Detection of the LAN address this machine is reachable on
//! - Selection of a free TCP port for the receive server

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use crate::error::{Error, Result};
use crate::peer::{PeerIdentity, DEFAULT_AVATAR};

/// Parse a host address string into a `SocketAddr`.
///
/// Accepts formats:
/// - `IP:PORT` (e.g., `192.168.1.100:40123`)
/// - `[IPv6]:PORT` (e.g., `[::1]:40123`)
/// - `IP` or `[IPv6]`, which use `default_port`
///
/// # Examples
///
/// ```
/// use peerdrop_core::connection::parse_host_address;
///
/// let addr = parse_host_address("192.168.1.100:40123", 0).unwrap();
/// assert_eq!(addr.port(), 40123);
///
/// let addr = parse_host_address("192.168.1.100", 7000).unwrap();
/// assert_eq!(addr.port(), 7000);
/// ```
///
/// # Errors
///
/// Returns an error if the host string cannot be parsed.
pub fn parse_host_address(host: &str, default_port: u16) -> Result<SocketAddr> {
    let host = host.trim();

    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Some(ip_str) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        let ip: IpAddr = ip_str.parse().map_err(|_| invalid_host(host))?;
        return Ok(SocketAddr::new(ip, default_port));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    if let Some((ip_part, port_part)) = host.rsplit_once(':') {
        if !ip_part.contains(':') {
            let ip: IpAddr = ip_part.parse().map_err(|_| invalid_host(host))?;
            let port: u16 = port_part.parse().map_err(|_| {
                Error::InvalidInput(format!(
                    "Invalid port '{port_part}'. Port must be a number between 1 and 65535"
                ))
            })?;
            return Ok(SocketAddr::new(ip, port));
        }
    }

    Err(invalid_host(host))
}

/// Parse a manually entered peer, `[name@]ip[:port]`.
///
/// The name defaults to the IP address. A missing port is returned as 0,
/// meaning the port still has to be resolved (for example through
/// discovery).
///
/// # Errors
///
/// Returns an error if the name is empty, contains `|`, or the address
/// cannot be parsed.
pub fn parse_peer_address(input: &str) -> Result<PeerIdentity> {
    let input = input.trim();
    let (name, host) = match input.rsplit_once('@') {
        Some((name, host)) => (Some(name.trim()), host),
        None => (None, input),
    };

    if let Some(name) = name {
        if name.is_empty() || name.contains('|') {
            return Err(Error::InvalidInput(format!("Invalid peer name '{name}'")));
        }
    }

    let addr = parse_host_address(host, 0)?;
    let ip = addr.ip().to_string();
    Ok(PeerIdentity::new(
        name.map_or_else(|| ip.clone(), str::to_string),
        ip,
        addr.port(),
        DEFAULT_AVATAR,
    ))
}

/// Detect the IPv4 address this machine uses to reach the local network.
///
/// Connects an unbound UDP socket towards a public address (no packet is
/// sent) and reads back the local address the OS picked for the route.
///
/// # Errors
///
/// Returns `NoNetwork` if there is no route or only a loopback address.
pub fn detect_lan_address() -> Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(|_| Error::NoNetwork)?;
    socket.connect("8.8.8.8:53").map_err(|_| Error::NoNetwork)?;
    let ip = socket.local_addr().map_err(|_| Error::NoNetwork)?.ip();

    if ip.is_loopback() || ip.is_unspecified() {
        return Err(Error::NoNetwork);
    }
    Ok(ip)
}

/// Ask the OS for a TCP port that is currently free.
///
/// # Errors
///
/// Returns an error if no port could be bound.
pub fn find_free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    Ok(listener.local_addr()?.port())
}

fn invalid_host(host: &str) -> Error {
    Error::InvalidInput(format!(
        "Invalid host format '{host}'. Use IP or IP:PORT (e.g., 192.168.1.100 or 192.168.1.100:40123)"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_ipv4_only() {
        let addr = parse_host_address("192.168.1.100", 7000).unwrap();
        assert_eq!(addr.ip().to_string(), "192.168.1.100");
        assert_eq!(addr.port(), 7000);
    }

    #[test]
    fn test_parse_host_ipv4_with_port() {
        let addr = parse_host_address("192.168.1.100:52540", 0).unwrap();
        assert_eq!(addr.ip().to_string(), "192.168.1.100");
        assert_eq!(addr.port(), 52540);
    }

    #[test]
    fn test_parse_host_ipv6() {
        let addr = parse_host_address("[::1]", 7000).unwrap();
        assert_eq!(addr.ip().to_string(), "::1");
        assert_eq!(addr.port(), 7000);

        let addr = parse_host_address("[2001:db8::1]:52540", 0).unwrap();
        assert_eq!(addr.ip().to_string(), "2001:db8::1");
        assert_eq!(addr.port(), 52540);
    }

    #[test]
    fn test_parse_host_invalid() {
        assert!(parse_host_address("not-an-ip", 0).is_err());
        assert!(parse_host_address("192.168.1.100:abc", 0).is_err());
        assert!(parse_host_address("192.168.1.256", 0).is_err());
    }

    #[test]
    fn test_parse_host_whitespace() {
        let addr = parse_host_address("  192.168.1.100:9  ", 0).unwrap();
        assert_eq!(addr.ip().to_string(), "192.168.1.100");
        assert_eq!(addr.port(), 9);
    }

    #[test]
    fn test_parse_peer_with_name() {
        let peer = parse_peer_address("Bob@192.168.1.20:40123").unwrap();
        assert_eq!(peer.name, "Bob");
        assert_eq!(peer.ip, "192.168.1.20");
        assert_eq!(peer.port, 40123);
        assert_eq!(peer.avatar, DEFAULT_AVATAR);
    }

    #[test]
    fn test_parse_peer_without_name_or_port() {
        let peer = parse_peer_address("192.168.1.20").unwrap();
        assert_eq!(peer.name, "192.168.1.20");
        assert_eq!(peer.port, 0);
    }

    #[test]
    fn test_parse_peer_invalid() {
        assert!(parse_peer_address("@192.168.1.20:1").is_err());
        assert!(parse_peer_address("a|b@192.168.1.20:1").is_err());
        assert!(parse_peer_address("Bob@nowhere").is_err());
    }

    #[test]
    fn test_find_free_port() {
        let port = find_free_port().unwrap();
        assert_ne!(port, 0);
    }
}
