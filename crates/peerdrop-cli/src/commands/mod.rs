//! CLI command definitions and handlers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use peerdrop_core::compression::Compression;
use peerdrop_core::config::Config;
use peerdrop_core::node::Node;

pub mod config;
pub mod peers;
pub mod receive;
pub mod scan;
pub mod send;

/// Load configuration with graceful fallback to defaults.
///
/// A broken configuration file is reported and otherwise ignored.
pub fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring configuration ({}), using defaults", e);
        Config::default()
    })
}

/// Build the local node, applying the `--compress` override.
pub fn build_node(config: &mut Config, compress: bool) -> Result<Node> {
    if compress {
        config.transfer.compression = Compression::Zstd;
    }
    Node::new(config).context("Failed to determine this machine's network identity")
}

/// Print the banner shown by long-running commands.
pub fn print_banner(node: &Node) {
    println!();
    println!("PeerDrop v{}", peerdrop_core::VERSION);
    println!("{}", "-".repeat(37));
    println!("  You are {}", node.identity());
    println!();
}

/// PeerDrop - Serverless local network file transfer
#[derive(Parser)]
#[command(name = "peerdrop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Detailed logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Discover peers on the network
    Scan(ScanArgs),

    /// Send files and folders to a peer
    Send(SendArgs),

    /// Wait for incoming transfers
    Receive(ReceiveArgs),

    /// Watch peers join and leave
    Peers(PeersArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the scan command
#[derive(Parser)]
pub struct ScanArgs {
    /// How long to wait for answers (e.g., 500ms, 2s)
    #[arg(short, long)]
    pub timeout: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the send command
#[derive(Parser)]
pub struct SendArgs {
    /// Receiver: `[name@]ip[:port]`, or a peer name found by discovery
    pub target: String,

    /// Files and folders to send
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Compress the payload (the receiver must use --compress too)
    #[arg(long)]
    pub compress: bool,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the receive command
#[derive(Parser)]
pub struct ReceiveArgs {
    /// Output directory for received files
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Accept every transfer without asking
    #[arg(short, long)]
    pub yes: bool,

    /// Expect a compressed payload (the sender must use --compress too)
    #[arg(long)]
    pub compress: bool,
}

/// Arguments for the peers command
#[derive(Parser)]
pub struct PeersArgs {
    /// How long to watch (e.g., 10s, 5m)
    #[arg(short, long, default_value = "10s")]
    pub duration: String,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show the configuration file path
    Path,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
