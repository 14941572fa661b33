//! Peers command implementation.

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use peerdrop_core::presence::PresenceEvent;

use super::PeersArgs;
use crate::ui::{display_peers, parse_duration};

/// Run the peers command.
pub async fn run(args: PeersArgs) -> Result<()> {
    let duration = parse_duration(&args.duration)
        .context("Invalid duration format. Use formats like '10s', '5m'")?;

    let mut config = super::load_config();
    let node = super::build_node(&mut config, false)?;

    let mut events = node.subscribe_presence();
    node.start_presence()
        .await
        .context("Failed to start presence")?;

    super::print_banner(&node);
    println!("  Watching for {}. Press Ctrl+C to stop.", args.duration);
    println!();

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(PresenceEvent::Joined(peer)) => println!("  + {} is online", peer),
                Ok(PresenceEvent::Left(peer)) => println!("  - {} went offline", peer),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Missed {} presence events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    node.stop_presence().await;

    println!();
    println!("Peers seen:");
    display_peers(&node.roster().peers());
    Ok(())
}
