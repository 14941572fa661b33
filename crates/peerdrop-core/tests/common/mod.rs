//! Common test utilities for `PeerDrop` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use peerdrop_core::transfer::{ReceiveConfig, ReceiveEvent, ReceiveServer};
use peerdrop_core::PeerIdentity;

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}

/// A loopback identity with the given name and port.
pub fn loopback_peer(name: &str, port: u16) -> PeerIdentity {
    PeerIdentity::new(name, "127.0.0.1", port, "default")
}

/// Bind and start a receive server on a free loopback port.
///
/// Returns the server, the identity it answers as, and its event stream.
pub async fn start_receiver(
    name: &str,
    config: ReceiveConfig,
) -> (
    ReceiveServer,
    PeerIdentity,
    mpsc::UnboundedReceiver<ReceiveEvent>,
) {
    let mut server = ReceiveServer::bind(config)
        .await
        .expect("Failed to bind receive server");
    let (tx, rx) = mpsc::unbounded_channel();
    server.start(tx).expect("Failed to start receive server");
    let identity = loopback_peer(name, server.local_addr().port());
    (server, identity, rx)
}

/// Receive config listening on an OS-assigned loopback port.
pub fn loopback_receive_config(save_dir: &Path) -> ReceiveConfig {
    ReceiveConfig::new("127.0.0.1:0".parse().expect("valid address"), save_dir)
}
