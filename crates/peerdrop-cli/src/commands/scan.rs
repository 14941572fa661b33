//! Scan command implementation.

use anyhow::{Context, Result};

use peerdrop_core::PeerIdentity;

use super::ScanArgs;
use crate::ui::{display_peers, parse_duration};

/// Run the scan command.
pub async fn run(args: ScanArgs) -> Result<()> {
    let mut config = super::load_config();

    if let Some(timeout) = &args.timeout {
        config.network.discovery_timeout = parse_duration(timeout)
            .context("Invalid timeout format. Use formats like '500ms', '2s', '10s'")?;
    }

    let node = super::build_node(&mut config, false)?;

    if !args.json {
        println!();
        println!(
            "Scanning for peers ({} ms)...",
            config.network.discovery_timeout.as_millis()
        );
        println!();
    }

    let outcome = node.discover().await;
    let peers = outcome.sorted_peers();

    if args.json {
        output_json_peers(&peers)?;
    } else {
        display_peers(&peers);
    }

    if let Some(error) = outcome.error {
        if peers.is_empty() {
            return Err(error).context("Discovery failed");
        }
        tracing::warn!("Discovery ended early: {}", error);
    }

    Ok(())
}

/// Output peers as JSON.
fn output_json_peers(peers: &[PeerIdentity]) -> Result<()> {
    let output = serde_json::json!({ "peers": peers });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
