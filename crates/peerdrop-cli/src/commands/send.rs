//! Send command implementation.
//!
//! Expands the given paths into a file list, resolves the receiver (directly
//! from the address, or by discovery) and streams the files to it.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use walkdir::WalkDir;

use peerdrop_core::connection::parse_peer_address;
use peerdrop_core::file::{format_duration, format_size, OutgoingFile};
use peerdrop_core::node::Node;
use peerdrop_core::transfer::TransferEvent;
use peerdrop_core::{Error, PeerIdentity};

use super::SendArgs;
use crate::ui;

/// Run the send command.
pub async fn run(args: SendArgs) -> Result<()> {
    let mut config = super::load_config();
    let node = super::build_node(&mut config, args.compress)?;

    let files = collect_files(&args.paths)?;
    if files.is_empty() {
        bail!("Nothing to send: the given folders contain no files");
    }
    let total_size: u64 = files.iter().map(|f| f.size).sum();

    if !args.quiet {
        super::print_banner(&node);
    }

    let receiver = resolve_receiver(&node, &args.target, args.quiet).await?;

    if !args.quiet {
        println!(
            "  Sending {} file(s) ({}) to {}",
            files.len(),
            format_size(total_size),
            receiver
        );
        println!();
        for file in &files {
            println!("    {} ({})", file.relative_path, format_size(file.size));
        }
        println!();
        println!("  Waiting for {} to accept...", receiver.name);
    }

    let file_count = files.len();
    let (tx, rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(display_progress(rx, args.quiet));
    let start_time = Instant::now();

    let result = node.send(receiver.clone(), files, tx).await;
    let _ = progress.await;

    match result {
        Ok(()) => {
            if !args.quiet {
                println!(
                    "  Sent {} file(s) ({}) to {} in {}",
                    file_count,
                    format_size(total_size),
                    receiver.name,
                    format_duration(start_time.elapsed())
                );
            }
            Ok(())
        }
        Err(Error::TransmissionDenied) => bail!("{} declined the transfer", receiver.name),
        Err(e) => {
            let context = failure_context(&receiver.name, &e);
            Err(e).context(context)
        }
    }
}

/// Headline for a failed transfer, tagged with the error code when it has one.
fn failure_context(receiver: &str, error: &Error) -> String {
    let mut message = match error.code() {
        Some(code) => format!("[{}] Transfer to {} failed", code, receiver),
        None => format!("Transfer to {} failed", receiver),
    };
    if error.is_recoverable() {
        message.push_str(", check the network and try again");
    }
    message
}

/// Expand `paths` into files with `/`-separated relative paths.
///
/// A file is sent under its own name; a directory's files are sent under
/// the directory's name.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<OutgoingFile>> {
    let mut files = Vec::new();

    for path in paths {
        let path = path
            .canonicalize()
            .with_context(|| format!("Cannot access {}", path.display()))?;
        let root_name = path
            .file_name()
            .with_context(|| format!("Cannot send {} as a whole", path.display()))?
            .to_string_lossy()
            .to_string();

        if !path.is_dir() {
            files.push(OutgoingFile::from_path(&path, root_name)?);
            continue;
        }

        for entry in WalkDir::new(&path).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = relative_path(&root_name, &path, entry.path())?;
            files.push(OutgoingFile::from_path(entry.path(), relative)?);
        }
    }

    Ok(files)
}

fn relative_path(root_name: &str, root: &Path, file: &Path) -> Result<String> {
    let inner = file
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", file.display(), root.display()))?;

    let mut parts = vec![root_name.to_string()];
    parts.extend(
        inner
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string()),
    );
    Ok(parts.join("/"))
}

/// Turn the command line target into a receiver.
///
/// `ip:port` is used as is; a bare ip or a name is looked up by discovery.
async fn resolve_receiver(node: &Node, target: &str, quiet: bool) -> Result<PeerIdentity> {
    let parsed = parse_peer_address(target).ok();
    if let Some(peer) = parsed.as_ref().filter(|p| p.port != 0) {
        return Ok(peer.clone());
    }

    if !quiet {
        print!("  Looking for {} on the network...", target);
        let _ = io::stdout().flush();
    }
    let outcome = node.discover().await;
    if !quiet {
        println!(" {} peer(s) answered", outcome.peers.len());
        println!();
    }

    let candidates: Vec<PeerIdentity> = match &parsed {
        Some(peer) => outcome
            .sorted_peers()
            .into_iter()
            .filter(|p| p.ip == peer.ip)
            .collect(),
        None => outcome
            .sorted_peers()
            .into_iter()
            .filter(|p| p.name.eq_ignore_ascii_case(target))
            .collect(),
    };

    match candidates.as_slice() {
        [peer] => Ok(peer.clone()),
        [] => match outcome.error {
            Some(e) => Err(e).with_context(|| format!("Could not find '{}'", target)),
            None => bail!("No peer matching '{}' answered discovery", target),
        },
        several => bail!(
            "'{}' matches {} peers, use name@ip:port instead",
            target,
            several.len()
        ),
    }
}

async fn display_progress(mut rx: mpsc::UnboundedReceiver<TransferEvent>, quiet: bool) {
    let mut drawing = false;

    while let Some(event) = rx.recv().await {
        match event {
            TransferEvent::Accepted(receiver) => {
                if !quiet {
                    println!("  {} accepted, sending...", receiver.name);
                }
            }
            TransferEvent::Progress(snapshot) => {
                if !quiet {
                    ui::print_progress(&snapshot);
                    drawing = true;
                }
            }
            TransferEvent::FileFinished { relative_path, .. } => {
                tracing::debug!("Finished {}", relative_path);
            }
            TransferEvent::Denied(_) | TransferEvent::AllFinished(_) | TransferEvent::Failed(_) => {}
        }
    }

    if drawing {
        println!();
        println!();
    }
}
