//! UI utilities for PeerDrop CLI.

use std::io::{self, Write};
use std::time::Duration;

use peerdrop_core::file::{format_bits_per_second, format_duration, format_size};
use peerdrop_core::transfer::ProgressSnapshot;
use peerdrop_core::PeerIdentity;

/// Parse a duration string like "500ms", "30s", "5m", or "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(num_str) = s.strip_suffix("ms") {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_millis(num))
    } else if let Some(num_str) = s.strip_suffix('m') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num * 60))
    } else if let Some(num_str) = s.strip_suffix('s') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num))
    } else if let Some(num_str) = s.strip_suffix('h') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num * 3600))
    } else {
        None
    }
}

/// Truncate a string to fit within a maximum width.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{}…", truncated)
    }
}

/// One-line progress, e.g. `[ 42.0%] file 1/3 - 3.2 MB/3.5 MB - 12.5 Mbit/s - ETA 2 s`.
pub fn progress_line(snapshot: &ProgressSnapshot) -> String {
    let eta = snapshot
        .remaining()
        .map_or_else(|| "--".to_string(), format_duration);
    format!(
        "[{:>5.1}%] file {}/{} - {}/{} - {} - ETA {}",
        snapshot.total_progress() * 100.0,
        (snapshot.current_file_index + 1).min(snapshot.total_files.max(1)),
        snapshot.total_files,
        format_size(snapshot.bytes_transferred),
        format_size(snapshot.total_bytes),
        format_bits_per_second(snapshot.throughput_bits_per_second),
        eta
    )
}

/// Redraw the progress line in place.
pub fn print_progress(snapshot: &ProgressSnapshot) {
    print!("\r  {}    ", progress_line(snapshot));
    let _ = io::stdout().flush();
}

/// Print the peers table.
pub fn display_peers(peers: &[PeerIdentity]) {
    println!("{}", "─".repeat(60));
    println!("  {:20}  {:24}  {:10}", "Name", "Address", "Avatar");
    println!("{}", "─".repeat(60));

    if peers.is_empty() {
        println!("  (no peers found)");
        println!("{}", "─".repeat(60));
        return;
    }

    for peer in peers {
        println!(
            "  {:20}  {:24}  {:10}",
            truncate_string(&peer.name, 20),
            format!("{}:{}", peer.ip, peer.port),
            truncate_string(&peer.avatar, 10)
        );
    }

    println!("{}", "─".repeat(60));
}
