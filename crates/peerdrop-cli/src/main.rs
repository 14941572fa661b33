//! PeerDrop CLI - Serverless local network file transfer
//!
//! PeerDrop finds other peers on the local network and sends files and
//! directories to them directly.
//!
//! ## Quick Start
//!
//! ```bash
//! # Wait for files (on the receiving machine)
//! peerdrop receive
//!
//! # Look around, then send
//! peerdrop scan
//! peerdrop send Bob ./photos
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Command::Scan(args) => commands::scan::run(args).await,
        Command::Send(args) => commands::send::run(args).await,
        Command::Receive(args) => commands::receive::run(args).await,
        Command::Peers(args) => commands::peers::run(args).await,
        Command::Config(args) => commands::config::run(args),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = if verbose {
        "info,peerdrop=debug,peerdrop_core=debug"
    } else {
        "warn,peerdrop=info,peerdrop_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
