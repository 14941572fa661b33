//! # PeerDrop Core Library
//!
//! `peerdrop-core` lets programs on the same local network find each other
//! and transfer files and directories without a central server.
//!
//! ## Protocol engines
//!
//! - **Discovery**: one-shot UDP broadcast request, responses collected for a
//!   bounded window
//! - **Presence**: `HELLO` on join and `BYE` on leave, keeping a live roster
//! - **Transfer**: TCP manifest exchange, accept/deny handshake, then the raw
//!   (or zstd-framed) payload with progress accounting
//!
//! ## Modules
//!
//! - [`compression`] - Per-chunk zstd framing for the payload stream
//! - [`config`] - Configuration management
//! - [`connection`] - Address parsing and local address selection
//! - [`discovery`] - Discovery requester and responder
//! - [`mod@file`] - Manifest entries, outcomes and destination paths
//! - [`history`] - Sent/received transfer log
//! - [`node`] - Facade owning the long-running listeners
//! - [`peer`] - Peer identity
//! - [`presence`] - Hello/bye presence announcements and the roster
//! - [`protocol`] - Wire codec and TCP framing
//! - [`transfer`] - Outgoing sessions and the receive server
//!
//! ## Example
//!
//! ```rust,ignore
//! use peerdrop_core::config::Config;
//! use peerdrop_core::node::Node;
//!
//! let node = Node::new(&Config::load()?)?;
//! let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
//! node.start(events_tx).await?;
//!
//! let outcome = node.discover().await;
//! for peer in &outcome.peers {
//!     println!("{peer}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod compression;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod file;
pub mod history;
pub mod node;
pub mod peer;
pub mod presence;
pub mod protocol;
pub mod transfer;

pub use error::{Error, Result};
pub use peer::PeerIdentity;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default discovery port (UDP)
pub const DEFAULT_DISCOVERY_PORT: u16 = 8888;

/// Default presence port (UDP)
pub const DEFAULT_PRESENCE_PORT: u16 = 8889;

/// Default chunk size for payload streaming (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default discovery collection window in milliseconds
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 2000;

/// Default bound on concurrently running outgoing transfers
pub const DEFAULT_MAX_CONCURRENT_SENDS: usize = 4;
