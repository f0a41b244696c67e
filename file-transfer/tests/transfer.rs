//! End-to-end transfers over loopback, through the lossy relay.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use udp_file_transfer::simulator::{Direction, Fate, Relay, RelayConfig, RelayHandle};
use udp_file_transfer::socket::Socket;
use udp_file_transfer::{
    send_file, ReceiveReport, Receiver, ReceiverError, Segment, SendReport, TransferConfig,
};

const DEADLINE: Duration = Duration::from_secs(20);

fn config() -> TransferConfig {
    TransferConfig::default().with_linger(Duration::from_millis(300))
}

fn contents(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Receiver behind a relay, writing into a temporary directory.
struct Harness {
    relay: RelayHandle,
    receiver: JoinHandle<Result<ReceiveReport, ReceiverError>>,
    out: TempDir,
}

impl Harness {
    async fn start(relay_config: RelayConfig) -> Self {
        let out = tempfile::tempdir().unwrap();
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let receiver_addr = socket.local_addr;
        let receiver = Receiver::new(socket, out.path(), config()).unwrap();
        let receiver = tokio::spawn(receiver.run());

        let relay_config = relay_config.with_recording();
        let relay = Relay::bind("127.0.0.1:0".parse().unwrap(), receiver_addr, relay_config)
            .await
            .unwrap()
            .spawn()
            .unwrap();

        Self {
            relay,
            receiver,
            out,
        }
    }

    async fn send(&self, source: &Path, name: &str) -> SendReport {
        self.send_with(source, name, config()).await
    }

    async fn send_with(&self, source: &Path, name: &str, config: TransferConfig) -> SendReport {
        timeout(
            DEADLINE,
            send_file(source, "127.0.0.1", self.relay.addr.port(), name, config),
        )
        .await
        .expect("sender timed out")
        .expect("send failed")
    }

    /// Wait for the receiver to finish lingering.
    async fn finish(&mut self) -> ReceiveReport {
        timeout(DEADLINE, &mut self.receiver)
            .await
            .expect("receiver timed out")
            .expect("receiver panicked")
            .expect("receive failed")
    }

    fn output(&self, name: &str) -> PathBuf {
        self.out.path().join(name)
    }

    /// First arrival of each forward segment, keyed by sequence number.
    fn forward_by_seq(&self) -> BTreeMap<u32, Segment> {
        let mut by_seq = BTreeMap::new();
        for (seg, _) in self.relay.traffic.segments(Direction::Forward) {
            by_seq.entry(seg.seq).or_insert(seg);
        }
        by_seq
    }
}

fn write_source(dir: &TempDir, data: &[u8]) -> PathBuf {
    let path = dir.path().join("source.bin");
    std::fs::write(&path, data).unwrap();
    path
}

#[tokio::test]
async fn file_arrives_in_full_segments() {
    let src_dir = tempfile::tempdir().unwrap();
    let data = contents(2500);
    let source = write_source(&src_dir, &data);

    let mut h = Harness::start(RelayConfig::transparent()).await;
    let sent = h.send(&source, "copy.bin").await;
    let received = h.finish().await;

    assert_eq!(std::fs::read(h.output("copy.bin")).unwrap(), data);
    assert_eq!(sent.bytes, 2500);
    assert_eq!(sent.segments, 5);
    assert_eq!(received.file_name, "copy.bin");
    assert_eq!(received.bytes_written, 2500);
    assert_eq!(received.segments_accepted, 5);

    let forward = h.forward_by_seq();
    let seqs: Vec<u32> = forward.keys().copied().collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    assert_eq!(forward[&1].payload, b"copy.bin".to_vec());
    let lens: Vec<usize> = forward.values().skip(1).map(|s| s.payload_len()).collect();
    assert_eq!(lens, vec![986, 986, 528, 0]);
    assert!(forward[&5].is_end_marker());
}

#[tokio::test]
async fn lost_ack_is_recovered_without_duplicate_write() {
    let src_dir = tempfile::tempdir().unwrap();
    let data = contents(2500);
    let source = write_source(&src_dir, &data);

    // The ACK for the name segment never reaches the sender.
    let retry = Duration::from_millis(40);
    let relay = RelayConfig::transparent().drop_nth(Direction::Backward, 0);
    let mut h = Harness::start(relay).await;
    let sent = h
        .send_with(&source, "copy.bin", config().with_retry_interval(retry))
        .await;
    let received = h.finish().await;

    assert_eq!(std::fs::read(h.output("copy.bin")).unwrap(), data);
    assert!(sent.retransmissions >= 1);
    assert!(received.duplicates >= 1);
    assert_eq!(received.bytes_written, 2500);

    let name_copies: Vec<_> = h
        .relay
        .traffic
        .snapshot()
        .into_iter()
        .filter(|o| o.direction == Direction::Forward)
        .filter(|o| Segment::decode(&o.bytes).map(|s| s.seq) == Ok(1))
        .collect();
    assert!(name_copies.len() >= 2, "name segment sent {} times", name_copies.len());
    assert_eq!(name_copies[0].bytes, name_copies[1].bytes);

    // The resend comes from the timer, one retry interval after the original.
    let gap = name_copies[1].at - name_copies[0].at;
    assert!(
        gap >= retry * 3 / 4 && gap < retry * 10,
        "name resent after {gap:?}, retry interval {retry:?}"
    );
}

#[tokio::test]
async fn lossy_corrupting_link_still_delivers_exact_bytes() {
    let src_dir = tempfile::tempdir().unwrap();
    let data = contents(20_000);
    let source = write_source(&src_dir, &data);

    let relay = RelayConfig::transparent()
        .with_loss(0.15)
        .with_corruption(0.15)
        .with_seed(42);
    let mut h = Harness::start(relay).await;
    let sent = h.send(&source, "noisy.bin").await;
    let received = h.finish().await;

    assert_eq!(std::fs::read(h.output("noisy.bin")).unwrap(), data);
    assert_eq!(sent.bytes, 20_000);
    assert_eq!(received.bytes_written, 20_000);

    let faults = h
        .relay
        .traffic
        .snapshot()
        .iter()
        .filter(|o| o.fate != Fate::Delivered)
        .count();
    assert!(faults > 0, "seeded fault model injected nothing");
}

#[tokio::test]
async fn empty_file_sends_name_and_end_marker_only() {
    let src_dir = tempfile::tempdir().unwrap();
    let source = write_source(&src_dir, b"");

    let mut h = Harness::start(RelayConfig::transparent()).await;
    let sent = h.send(&source, "empty.txt").await;
    let received = h.finish().await;

    assert_eq!(std::fs::read(h.output("empty.txt")).unwrap(), b"");
    assert_eq!(sent.segments, 2);
    assert_eq!(received.bytes_written, 0);
    let seqs: Vec<u32> = h.forward_by_seq().keys().copied().collect();
    assert_eq!(seqs, vec![1, 2]);
}

#[tokio::test]
async fn exact_multiple_of_payload_size_has_no_short_chunk() {
    let src_dir = tempfile::tempdir().unwrap();
    let data = contents(986 * 2);
    let source = write_source(&src_dir, &data);

    let mut h = Harness::start(RelayConfig::transparent()).await;
    h.send(&source, "even.bin").await;
    h.finish().await;

    assert_eq!(std::fs::read(h.output("even.bin")).unwrap(), data);
    let lens: Vec<usize> = h
        .forward_by_seq()
        .values()
        .skip(1)
        .map(|s| s.payload_len())
        .collect();
    assert_eq!(lens, vec![986, 986, 0]);
}

#[tokio::test]
async fn unusable_name_is_refused_before_the_receiver_sees_anything() {
    let src_dir = tempfile::tempdir().unwrap();
    let source = write_source(&src_dir, b"payload");

    let h = Harness::start(RelayConfig::transparent()).await;
    for name in ["", "a/b"] {
        let err = timeout(
            Duration::from_secs(2),
            send_file(&source, "127.0.0.1", h.relay.addr.port(), name, config()),
        )
        .await
        .expect("sender kept retrying a name the receiver refuses")
        .unwrap_err();
        assert_eq!(err.exit_code(), 1, "{name:?}: {err}");
    }

    assert!(h.relay.traffic.snapshot().is_empty());
    assert!(!h.receiver.is_finished());
}
