//! End-to-end transfer tests over loopback TCP.
//!
//! Each test runs a real receive server and a real sending session in the
//! same runtime.

mod common;

use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use peerdrop_core::compression::Compression;
use peerdrop_core::file::{FileOutcome, OutgoingFile};
use peerdrop_core::transfer::{
    ReceiveEvent, SendState, TransferConfig, TransferEvent, TransferSession,
};
use peerdrop_core::{Error, PeerIdentity};

use common::{
    assert_files_equal, create_temp_dir, create_test_file, loopback_peer,
    loopback_receive_config, random_bytes, start_receiver,
};

/// Events a receiver saw for one connection, up to and including `Finished`.
struct ReceiverLog {
    progress: Vec<u64>,
    errors: Vec<Option<String>>,
    outcomes: Vec<FileOutcome>,
    sender: Option<PeerIdentity>,
    events: mpsc::UnboundedReceiver<ReceiveEvent>,
}

/// Answer every incoming transfer with `accept` and record what follows.
///
/// A declined transfer has no `Finished`, so the log ends when the channel
/// stays quiet.
fn answer_transfers(
    mut events: mpsc::UnboundedReceiver<ReceiveEvent>,
    accept: bool,
) -> JoinHandle<ReceiverLog> {
    tokio::spawn(async move {
        let mut progress = Vec::new();
        let mut errors = Vec::new();
        loop {
            let next = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv()).await;
            match next {
                Ok(Some(ReceiveEvent::Incoming(incoming))) => {
                    if accept {
                        incoming.accept();
                    } else {
                        incoming.decline();
                        return ReceiverLog {
                            progress,
                            errors,
                            outcomes: Vec::new(),
                            sender: None,
                            events,
                        };
                    }
                }
                Ok(Some(ReceiveEvent::Progress { snapshot, .. })) => {
                    progress.push(snapshot.bytes_transferred);
                }
                Ok(Some(ReceiveEvent::Error { path, .. })) => errors.push(path),
                Ok(Some(ReceiveEvent::Finished {
                    outcomes, sender, ..
                })) => {
                    return ReceiverLog {
                        progress,
                        errors,
                        outcomes,
                        sender: Some(sender),
                        events,
                    };
                }
                Ok(None) | Err(_) => panic!("receiver never finished"),
            }
        }
    })
}

fn drain_send_events(mut rx: mpsc::UnboundedReceiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn outgoing(source_root: &Path, relative: &str) -> OutgoingFile {
    OutgoingFile::from_path(source_root.join(relative), relative).expect("source file")
}

#[tokio::test]
async fn test_alice_sends_two_files_to_bob() {
    let source = create_temp_dir();
    let save = create_temp_dir();
    create_test_file(source.path(), "a.txt", &[b'a'; 100]);
    create_test_file(source.path(), "dir/b.txt", &[b'b'; 50]);

    let (mut server, bob, events) =
        start_receiver("Bob", loopback_receive_config(save.path())).await;
    let receiver = answer_transfers(events, true);

    let alice = loopback_peer("Alice", 40001);
    let session = TransferSession::new(
        alice.clone(),
        bob.clone(),
        vec![
            outgoing(source.path(), "a.txt"),
            outgoing(source.path(), "dir/b.txt"),
        ],
        TransferConfig::default(),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    session.send(tx).await.expect("send");
    assert_eq!(session.state(), SendState::Finished);
    assert_eq!(session.files_sent(), 2);

    let sent = drain_send_events(rx);
    assert_eq!(sent.first(), Some(&TransferEvent::Accepted(bob.clone())));
    assert_eq!(
        sent.iter()
            .filter(|e| matches!(e, TransferEvent::AllFinished(peer) if *peer == bob))
            .count(),
        1
    );
    assert_eq!(
        sent.iter()
            .filter(|e| matches!(e, TransferEvent::FileFinished { .. }))
            .count(),
        2
    );

    let mut log = receiver.await.unwrap();
    assert_eq!(log.sender, Some(alice));
    assert!(log.errors.is_empty());
    assert_eq!(log.outcomes.len(), 2);
    assert!(log.outcomes.iter().all(|o| o.succeeded));

    assert_files_equal(&source.path().join("a.txt"), &save.path().join("a.txt"));
    assert_files_equal(
        &source.path().join("dir/b.txt"),
        &save.path().join("dir").join("b.txt"),
    );

    server.stop().await;
    while let Ok(event) = log.events.try_recv() {
        assert!(
            !matches!(event, ReceiveEvent::Finished { .. }),
            "Finished delivered twice"
        );
    }
}

#[tokio::test]
async fn test_denied_transfer_writes_nothing() {
    let source = create_temp_dir();
    let save = create_temp_dir();
    create_test_file(source.path(), "secret.txt", b"not for you");

    let (mut server, bob, events) =
        start_receiver("Bob", loopback_receive_config(save.path())).await;
    let receiver = answer_transfers(events, false);

    let session = TransferSession::new(
        loopback_peer("Alice", 40002),
        bob.clone(),
        vec![outgoing(source.path(), "secret.txt")],
        TransferConfig::default(),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let result = session.send(tx).await;

    assert!(matches!(result, Err(Error::TransmissionDenied)));
    assert_eq!(session.state(), SendState::Denied);
    assert_eq!(session.files_sent(), 0);

    let sent = drain_send_events(rx);
    assert_eq!(sent, vec![TransferEvent::Denied(bob)]);

    let log = receiver.await.unwrap();
    assert!(log.progress.is_empty());
    assert!(log.outcomes.is_empty());
    assert!(!save.path().join("secret.txt").exists());

    server.stop().await;
}

#[tokio::test]
async fn test_one_unwritable_file_does_not_affect_the_others() {
    let source = create_temp_dir();
    let save = create_temp_dir();
    create_test_file(source.path(), "one.txt", b"first");
    create_test_file(source.path(), "blocked/two.txt", b"second");
    create_test_file(source.path(), "three.txt", b"third");

    // a regular file where the directory should go
    create_test_file(save.path(), "blocked", b"in the way");

    let (mut server, bob, events) =
        start_receiver("Bob", loopback_receive_config(save.path())).await;
    let receiver = answer_transfers(events, true);

    let session = TransferSession::new(
        loopback_peer("Alice", 40003),
        bob,
        vec![
            outgoing(source.path(), "one.txt"),
            outgoing(source.path(), "blocked/two.txt"),
            outgoing(source.path(), "three.txt"),
        ],
        TransferConfig::default(),
    );

    let (tx, _rx) = mpsc::unbounded_channel();
    session.send(tx).await.expect("sender is unaware of receiver-side failures");

    let mut log = receiver.await.unwrap();
    let succeeded: Vec<bool> = log.outcomes.iter().map(|o| o.succeeded).collect();
    assert_eq!(succeeded, vec![true, false, true]);
    assert_eq!(log.errors, vec![Some("blocked/two.txt".to_string())]);

    assert_eq!(std::fs::read(save.path().join("one.txt")).unwrap(), b"first");
    assert_eq!(std::fs::read(save.path().join("three.txt")).unwrap(), b"third");
    assert_eq!(
        std::fs::read(save.path().join("blocked")).unwrap(),
        b"in the way"
    );

    server.stop().await;
    while let Ok(event) = log.events.try_recv() {
        assert!(!matches!(event, ReceiveEvent::Finished { .. }));
    }
}

#[tokio::test]
async fn test_progress_is_monotonic_and_complete() {
    let source = create_temp_dir();
    let save = create_temp_dir();
    let content = random_bytes(300_000);
    create_test_file(source.path(), "big.bin", &content);
    create_test_file(source.path(), "small.bin", &content[..1_000]);
    let total = 301_000u64;

    let (mut server, bob, events) =
        start_receiver("Bob", loopback_receive_config(save.path())).await;
    let receiver = answer_transfers(events, true);

    let session = TransferSession::new(
        loopback_peer("Alice", 40004),
        bob,
        vec![
            outgoing(source.path(), "big.bin"),
            outgoing(source.path(), "small.bin"),
        ],
        TransferConfig {
            chunk_size: 16 * 1024,
            ..TransferConfig::default()
        },
    );

    let (tx, rx) = mpsc::unbounded_channel();
    session.send(tx).await.expect("send");

    let snapshots: Vec<_> = drain_send_events(rx)
        .into_iter()
        .filter_map(|e| match e {
            TransferEvent::Progress(snapshot) => Some(snapshot),
            _ => None,
        })
        .collect();
    assert!(snapshots.len() > 2);
    assert!(snapshots
        .windows(2)
        .all(|w| w[0].bytes_transferred <= w[1].bytes_transferred));
    let last = snapshots.last().unwrap();
    assert_eq!(last.bytes_transferred, total);
    assert_eq!(last.total_bytes, total);
    assert_eq!(last.current_file_index, 1);
    assert!((last.total_progress() - 1.0).abs() < f64::EPSILON);

    let log = receiver.await.unwrap();
    assert!(log.progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(log.progress.last().copied(), Some(total));
    assert_files_equal(&source.path().join("big.bin"), &save.path().join("big.bin"));

    server.stop().await;
}

#[tokio::test]
async fn test_compressed_transfer_is_byte_identical() {
    let source = create_temp_dir();
    let save = create_temp_dir();
    let text = "the quick brown fox jumps over the lazy dog\n".repeat(5_000);
    create_test_file(source.path(), "text.txt", text.as_bytes());
    create_test_file(source.path(), "noise.bin", &random_bytes(100_000));

    let config = loopback_receive_config(save.path()).with_compression(Compression::Zstd);
    let (mut server, bob, events) = start_receiver("Bob", config).await;
    let receiver = answer_transfers(events, true);

    let session = TransferSession::new(
        loopback_peer("Alice", 40005),
        bob,
        vec![
            outgoing(source.path(), "text.txt"),
            outgoing(source.path(), "noise.bin"),
        ],
        TransferConfig {
            compression: Compression::Zstd,
            compression_level: 3,
            ..TransferConfig::default()
        },
    );

    let (tx, _rx) = mpsc::unbounded_channel();
    session.send(tx).await.expect("send");

    let log = receiver.await.unwrap();
    assert!(log.outcomes.iter().all(|o| o.succeeded));
    assert_files_equal(&source.path().join("text.txt"), &save.path().join("text.txt"));
    assert_files_equal(
        &source.path().join("noise.bin"),
        &save.path().join("noise.bin"),
    );

    server.stop().await;
}

#[tokio::test]
async fn test_oversized_chunk_size_still_fits_compressed_frames() {
    let source = create_temp_dir();
    let save = create_temp_dir();
    create_test_file(source.path(), "big.bin", &random_bytes(9 * 1024 * 1024));

    let config = loopback_receive_config(save.path()).with_compression(Compression::Zstd);
    let (mut server, bob, events) = start_receiver("Bob", config).await;
    let receiver = answer_transfers(events, true);

    let session = TransferSession::new(
        loopback_peer("Alice", 40007),
        bob,
        vec![outgoing(source.path(), "big.bin")],
        TransferConfig {
            chunk_size: 32 * 1024 * 1024,
            compression: Compression::Zstd,
            compression_level: 1,
        },
    );

    let (tx, _rx) = mpsc::unbounded_channel();
    session.send(tx).await.expect("send");

    let log = receiver.await.unwrap();
    assert!(log.errors.is_empty());
    assert!(log.outcomes.iter().all(|o| o.succeeded));
    assert_files_equal(&source.path().join("big.bin"), &save.path().join("big.bin"));

    server.stop().await;
}

#[tokio::test]
async fn test_empty_transfer_finishes() {
    let save = create_temp_dir();
    let (mut server, bob, events) =
        start_receiver("Bob", loopback_receive_config(save.path())).await;
    let receiver = answer_transfers(events, true);

    let session = TransferSession::new(
        loopback_peer("Alice", 40006),
        bob.clone(),
        Vec::new(),
        TransferConfig::default(),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    session.send(tx).await.expect("send");

    assert_eq!(
        drain_send_events(rx),
        vec![TransferEvent::Accepted(bob.clone()), TransferEvent::AllFinished(bob)]
    );
    let log = receiver.await.unwrap();
    assert!(log.outcomes.is_empty());

    server.stop().await;
}
