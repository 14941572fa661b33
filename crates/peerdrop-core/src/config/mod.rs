//! Configuration management for PeerDrop.
//!
//! This module handles loading, saving, and managing PeerDrop configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/peerdrop/config.toml` |
//! | macOS | `~/Library/Application Support/com.peerdrop.PeerDrop/config.toml` |
//! | Windows | `%APPDATA%\PeerDrop\PeerDrop\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use peerdrop_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Display name: {}", config.identity.name);
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compression::{Compression, MAX_CHUNK_SIZE};
use crate::discovery::DiscoveryConfig;
use crate::error::{Error, Result};
use crate::peer::DEFAULT_AVATAR;
use crate::presence::PresenceConfig;
use crate::transfer::ReceiveConfig;

/// Main configuration struct for PeerDrop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How this peer presents itself
    pub identity: IdentityConfig,
    /// Ports and addresses
    pub network: NetworkConfig,
    /// Transfer settings
    pub transfer: TransferConfig,
}

/// Identity options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Display name on the network
    pub name: String,
    /// Avatar tag shown by other peers
    pub avatar: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: hostname::get().map_or_else(
                |_| "PeerDrop Device".to_string(),
                |h| h.to_string_lossy().to_string(),
            ),
            avatar: DEFAULT_AVATAR.to_string(),
        }
    }
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Discovery port (UDP)
    pub discovery_port: u16,
    /// Presence port (UDP)
    pub presence_port: u16,
    /// Receive server port (TCP), 0 picks a free port at startup
    pub transfer_port: u16,
    /// Destination of discovery requests and presence announcements
    pub broadcast_addr: Ipv4Addr,
    /// How long discovery collects answers
    #[serde(with = "humantime_serde")]
    pub discovery_timeout: Duration,
    /// Address to advertise instead of the detected LAN address
    pub advertise_ip: Option<IpAddr>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: crate::DEFAULT_DISCOVERY_PORT,
            presence_port: crate::DEFAULT_PRESENCE_PORT,
            transfer_port: 0,
            broadcast_addr: Ipv4Addr::BROADCAST,
            discovery_timeout: Duration::from_millis(crate::DEFAULT_DISCOVERY_TIMEOUT_MS),
            advertise_ip: None,
        }
    }
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Directory received files are saved under
    pub save_dir: PathBuf,
    /// Chunk size for transfers
    pub chunk_size: usize,
    /// Payload compression, must match on both ends
    pub compression: Compression,
    /// zstd level (1-22)
    pub compression_level: i32,
    /// Outgoing transfers allowed to run at once
    pub max_concurrent_sends: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            save_dir: default_save_dir(),
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            compression: Compression::None,
            compression_level: 1,
            max_concurrent_sends: crate::DEFAULT_MAX_CONCURRENT_SENDS,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or
    /// validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path` as pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check values the services cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.identity.name.trim().is_empty() || self.identity.name.contains('|') {
            return Err(invalid("identity.name", "must be non-empty and not contain '|'"));
        }
        if self.identity.avatar.contains('|') {
            return Err(invalid("identity.avatar", "must not contain '|'"));
        }
        if self.transfer.chunk_size == 0 {
            return Err(invalid("transfer.chunk_size", "must be greater than zero"));
        }
        if self.transfer.chunk_size > MAX_CHUNK_SIZE {
            return Err(invalid("transfer.chunk_size", "must not exceed 8 MiB"));
        }
        if !(1..=22).contains(&self.transfer.compression_level) {
            return Err(invalid("transfer.compression_level", "must be between 1 and 22"));
        }
        if self.transfer.max_concurrent_sends == 0 {
            return Err(invalid(
                "transfer.max_concurrent_sends",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "peerdrop", "PeerDrop")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Settings for the discovery requester and responder.
    #[must_use]
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            port: self.network.discovery_port,
            broadcast_addr: self.network.broadcast_addr,
        }
    }

    /// Settings for the presence service.
    #[must_use]
    pub fn presence_config(&self) -> PresenceConfig {
        PresenceConfig {
            port: self.network.presence_port,
            broadcast_addr: self.network.broadcast_addr,
        }
    }

    /// Settings for outgoing transfers.
    #[must_use]
    pub fn transfer_config(&self) -> crate::transfer::TransferConfig {
        crate::transfer::TransferConfig {
            chunk_size: self.transfer.chunk_size,
            compression: self.transfer.compression,
            compression_level: self.transfer.compression_level,
        }
    }

    /// Settings for a receive server on `port` saving into `save_dir`.
    #[must_use]
    pub fn receive_config(&self, port: u16, save_dir: impl Into<PathBuf>) -> ReceiveConfig {
        ReceiveConfig {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            save_dir: save_dir.into(),
            chunk_size: self.transfer.chunk_size,
            compression: self.transfer.compression,
        }
    }
}

/// `<download dir>/peerdrop`, or `./peerdrop` without a home directory.
fn default_save_dir() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| {
            dirs.download_dir()
                .map(Path::to_path_buf)
                .or_else(|| Some(dirs.home_dir().join("Downloads")))
        })
        .unwrap_or_else(|| PathBuf::from("."))
        .join("peerdrop")
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::InvalidConfig {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();
        s.strip_suffix("ms")
            .map(|millis| {
                millis
                    .parse()
                    .map(Duration::from_millis)
                    .map_err(serde::de::Error::custom)
            })
            .or_else(|| {
                s.strip_suffix('s').map(|secs| {
                    secs.parse()
                        .map(Duration::from_secs)
                        .map_err(serde::de::Error::custom)
                })
            })
            .or_else(|| {
                s.strip_suffix('m').map(|mins| {
                    mins.parse::<u64>()
                        .map(|m| Duration::from_secs(m * 60))
                        .map_err(serde::de::Error::custom)
                })
            })
            .unwrap_or_else(|| Err(serde::de::Error::custom("invalid duration format")))
    }
}
