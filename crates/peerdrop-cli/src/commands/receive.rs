//! Receive command implementation.
//!
//! Runs the whole node (discovery responder, presence and receive server)
//! until Ctrl+C, asking before each incoming transfer.

use std::io::{self, Write};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::{broadcast, mpsc};

use peerdrop_core::file::{format_size, FileOutcome};
use peerdrop_core::presence::PresenceEvent;
use peerdrop_core::transfer::{IncomingTransfer, ReceiveEvent};

use super::ReceiveArgs;
use crate::ui;

/// Run the receive command.
pub async fn run(args: ReceiveArgs) -> Result<()> {
    let mut config = super::load_config();
    if let Some(output) = &args.output {
        config.transfer.save_dir.clone_from(output);
    }
    let node = super::build_node(&mut config, args.compress)?;

    std::fs::create_dir_all(&config.transfer.save_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            config.transfer.save_dir.display()
        )
    })?;

    let mut presence = node.subscribe_presence();
    let (tx, mut events) = mpsc::unbounded_channel();
    node.start(tx).await.context("Failed to start listeners")?;

    super::print_banner(&node);
    println!("  Saving to {}", config.transfer.save_dir.display());
    println!("  Waiting for transfers. Press Ctrl+C to stop.");
    println!();

    let mut stdin = BufReader::new(tokio::io::stdin());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("  Stopping...");
                break;
            }
            event = presence.recv() => match event {
                Ok(event) => show_presence(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Missed {} presence events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Some(event) => handle_event(event, &args, &mut stdin).await?,
                None => break,
            },
        }
    }

    node.stop().await;
    Ok(())
}

async fn handle_event(
    event: ReceiveEvent,
    args: &ReceiveArgs,
    stdin: &mut BufReader<Stdin>,
) -> Result<()> {
    match event {
        ReceiveEvent::Incoming(incoming) => {
            show_incoming(&incoming);
            if args.yes || confirm(stdin).await? {
                println!("  Accepted.");
                incoming.accept();
            } else {
                println!("  Declined.");
                incoming.decline();
            }
            println!();
        }
        ReceiveEvent::Progress { snapshot, .. } => ui::print_progress(&snapshot),
        ReceiveEvent::Error { path, message, .. } => {
            println!();
            match path {
                Some(path) => println!("  Failed to receive {}: {}", path, message),
                None => println!("  Connection failed: {}", message),
            }
        }
        ReceiveEvent::Finished {
            outcomes, sender, ..
        } => {
            println!();
            show_outcomes(&sender.name, &outcomes);
        }
    }
    Ok(())
}

fn show_presence(event: &PresenceEvent) {
    match event {
        PresenceEvent::Joined(peer) => println!("  + {} is online", peer),
        PresenceEvent::Left(peer) => println!("  - {} went offline", peer),
    }
}

fn show_incoming(incoming: &IncomingTransfer) {
    println!(
        "  {} wants to send {} file(s) ({}):",
        incoming.sender,
        incoming.files.len(),
        format_size(incoming.total_size())
    );
    for file in &incoming.files {
        let note = if file.destination.is_some() {
            ""
        } else {
            "  [unsafe path, will be skipped]"
        };
        println!(
            "    {} ({}){}",
            file.relative_path,
            format_size(file.size),
            note
        );
    }
}

async fn confirm(stdin: &mut BufReader<Stdin>) -> Result<bool> {
    print!("  Accept transfer? [Y/n] ");
    let _ = io::stdout().flush();

    let mut input = String::new();
    if stdin.read_line(&mut input).await? == 0 {
        return Ok(false);
    }
    let input = input.trim().to_lowercase();

    Ok(input.is_empty() || input == "y" || input == "yes")
}

fn show_outcomes(sender: &str, outcomes: &[FileOutcome]) {
    let ok = outcomes.iter().filter(|o| o.succeeded).count();
    println!("  Received {}/{} file(s) from {}", ok, outcomes.len(), sender);
    for outcome in outcomes.iter().filter(|o| !o.succeeded) {
        println!("    failed: {}", outcome.relative_path);
    }
    println!();
}
