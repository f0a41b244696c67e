//! Stop-and-wait receive side.
//!
//! Two layers, following the split between state and I/O used elsewhere in
//! the crate:
//!
//! - [`SequenceTracker`] only manages ordering state.  It decides whether an
//!   inbound segment is the next one ([`Verdict::Accept`]), a retransmission
//!   of the last accepted one ([`Verdict::Duplicate`]), or garbage
//!   ([`Verdict::Reject`]).
//! - [`Receiver`] owns the socket and the output file and acts on verdicts:
//!   accepted segments are acknowledged and written, duplicates are
//!   re-acknowledged without a write, everything else is dropped silently.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::Instant;

use crate::config::TransferConfig;
use crate::error::ReceiverError;
use crate::segment::{is_plain_file_name, Segment};
use crate::socket::{is_transient, Socket, SocketError};
use crate::state::ReceiverState;

// ---------------------------------------------------------------------------
// SequenceTracker
// ---------------------------------------------------------------------------

/// What to do with an inbound segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Valid and exactly `expected + 1`: acknowledge, deliver, advance.
    Accept,
    /// Valid copy of the last accepted segment: acknowledge again, nothing else.
    Duplicate,
    /// Corrupt, unknown kind, an ACK, or out of order: drop without reply.
    Reject,
}

/// Receive-side ordering state.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SequenceTracker {
    /// Sequence number of the last accepted segment; 0 before the first.
    pub expected: u32,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, segment: &Segment) -> Verdict {
        if !segment.is_valid() || segment.is_ack() {
            return Verdict::Reject;
        }
        if segment.seq == self.expected.wrapping_add(1) {
            Verdict::Accept
        } else if self.expected != 0 && segment.seq == self.expected {
            Verdict::Duplicate
        } else {
            Verdict::Reject
        }
    }

    /// Record acceptance of the segment numbered `expected + 1`.
    pub fn advance(&mut self) {
        self.expected = self.expected.wrapping_add(1);
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// Summary of a completed receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Name announced by the sender.
    pub file_name: String,
    /// Where the file was written.
    pub path: PathBuf,
    pub bytes_written: u64,
    /// Accepted segments, name and end marker included.
    pub segments_accepted: u32,
    /// Retransmissions that were re-acknowledged without a write.
    pub duplicates: u32,
    pub peer: SocketAddr,
}

/// Receive-side session for one transfer.
#[derive(Debug)]
pub struct Receiver {
    socket: Socket,
    output_dir: PathBuf,
    config: TransferConfig,

    /// Current FSM state.
    pub state: ReceiverState,
    pub tracker: SequenceTracker,
}

impl Receiver {
    /// Create a receiver that stores the incoming file in `output_dir`.
    pub fn new(
        socket: Socket,
        output_dir: impl Into<PathBuf>,
        config: TransferConfig,
    ) -> Result<Self, ReceiverError> {
        config.validate()?;
        Ok(Self {
            socket,
            output_dir: output_dir.into(),
            config,
            state: ReceiverState::AwaitName,
            tracker: SequenceTracker::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Run one transfer to completion.
    pub async fn run(mut self) -> Result<ReceiveReport, ReceiverError> {
        let mut segments_accepted = 0u32;
        let mut duplicates = 0u32;

        // AwaitName: the first valid seq-1 segment names the file and fixes
        // the peer.
        let (peer, file_name, path, mut out) = loop {
            let (segment, from) = self.next_segment().await?;
            if self.classify(&segment) != Verdict::Accept {
                log::debug!("[recv] ← seq={} dropped while awaiting name", segment.seq);
                continue;
            }

            let file_name = output_name(&segment.payload)?;
            let path = self.output_dir.join(&file_name);
            let file = File::create(&path)
                .await
                .map_err(|e| ReceiverError::CreateOutput {
                    name: file_name.clone(),
                    source: e,
                })?;

            self.send_ack(&segment, from).await?;
            self.tracker.advance();
            segments_accepted += 1;
            log::info!("[recv] {from} is sending {file_name:?} → {}", path.display());
            break (from, file_name, path, BufWriter::new(file));
        };

        self.enter(ReceiverState::Receiving);
        let mut bytes_written = 0u64;
        loop {
            let (segment, from) = self.next_segment().await?;
            if from != peer {
                log::debug!("[recv] ignoring datagram from {from}");
                continue;
            }

            match self.classify(&segment) {
                Verdict::Accept => {
                    self.send_ack(&segment, peer).await?;
                    self.tracker.advance();
                    segments_accepted += 1;
                    if segment.is_end_marker() {
                        log::debug!("[recv] ← end marker seq={}", segment.seq);
                        break;
                    }
                    out.write_all(&segment.payload)
                        .await
                        .map_err(ReceiverError::Write)?;
                    bytes_written += segment.payload.len() as u64;
                    log::debug!(
                        "[recv] ← DATA seq={} len={}; → ACK",
                        segment.seq,
                        segment.payload_len()
                    );
                }
                Verdict::Duplicate => {
                    self.send_ack(&segment, peer).await?;
                    duplicates += 1;
                    log::debug!("[recv] ← duplicate seq={}; → ACK again", segment.seq);
                }
                Verdict::Reject => {
                    log::debug!(
                        "[recv] ← {} seq={} len={} dropped (expected {}, valid={})",
                        segment.kind,
                        segment.seq,
                        segment.payload_len(),
                        self.tracker.expected.wrapping_add(1),
                        segment.is_valid()
                    );
                }
            }
        }

        out.flush().await.map_err(ReceiverError::Close)?;
        let file = out.into_inner();
        file.sync_all().await.map_err(ReceiverError::Close)?;
        drop(file);

        if !self.config.linger.is_zero() {
            self.enter(ReceiverState::Linger);
            duplicates += self.linger(peer).await?;
        }

        self.enter(ReceiverState::Done);
        log::info!(
            "[recv] done: {bytes_written} bytes into {}, {duplicates} duplicates",
            path.display()
        );
        Ok(ReceiveReport {
            file_name,
            path,
            bytes_written,
            segments_accepted,
            duplicates,
            peer,
        })
    }

    /// Keep re-acknowledging the end marker until the linger period expires.
    /// Returns how many duplicates were answered.
    async fn linger(&mut self, peer: SocketAddr) -> Result<u32, ReceiverError> {
        let deadline = Instant::now() + self.config.linger;
        let mut answered = 0;
        while let Ok(received) = tokio::time::timeout_at(deadline, self.next_segment()).await {
            let (segment, from) = received?;
            if from == peer && self.classify(&segment) == Verdict::Duplicate {
                self.send_ack(&segment, peer).await?;
                answered += 1;
                log::debug!("[recv] ← end marker again; → ACK");
            }
        }
        Ok(answered)
    }

    /// Like [`SequenceTracker::classify`], but a payload larger than the
    /// configured segment size is refused even when it checks out.
    fn classify(&self, segment: &Segment) -> Verdict {
        if segment.payload_len() > self.config.max_payload_size() {
            return Verdict::Reject;
        }
        self.tracker.classify(segment)
    }

    fn enter(&mut self, state: ReceiverState) {
        log::info!("[recv] {} → {}", self.state, state);
        self.state = state;
    }

    async fn send_ack(&self, segment: &Segment, peer: SocketAddr) -> Result<(), ReceiverError> {
        self.socket
            .send_to(&segment.to_ack(), peer)
            .await
            .map_err(ReceiverError::AckSend)
    }

    /// Next datagram that frames as a segment.  Runts are skipped here; the
    /// checksum is left to [`SequenceTracker::classify`].
    async fn next_segment(&self) -> Result<(Segment, SocketAddr), ReceiverError> {
        loop {
            match self.socket.recv_from().await {
                Ok(received) => return Ok(received),
                Err(SocketError::Framing(e)) => log::debug!("[recv] dropping datagram: {e}"),
                Err(SocketError::Io(e)) if is_transient(&e) => {
                    log::debug!("[recv] transient receive error: {e}");
                }
                Err(SocketError::Io(e)) => return Err(ReceiverError::Transport(e)),
            }
        }
    }
}

/// Listen on `port` and store one incoming file in `output_dir`.
pub async fn receive_file(
    port: u16,
    output_dir: &Path,
    config: TransferConfig,
) -> Result<ReceiveReport, ReceiverError> {
    config.validate()?;
    let socket = Socket::bind((Ipv4Addr::UNSPECIFIED, port).into())
        .await
        .map_err(ReceiverError::Bind)?;
    log::info!("[recv] listening on {}", socket.local_addr);
    Receiver::new(socket, output_dir, config)?.run().await
}

/// Validate the announced name: UTF-8, non-empty, and a bare file name with
/// no directory components.
fn output_name(payload: &[u8]) -> Result<String, ReceiverError> {
    let invalid = |reason: &str| ReceiverError::CreateOutput {
        name: String::from_utf8_lossy(payload).into_owned(),
        source: io::Error::new(io::ErrorKind::InvalidInput, reason.to_string()),
    };
    let name = std::str::from_utf8(payload).map_err(|_| invalid("name is not UTF-8"))?;
    if !is_plain_file_name(name) {
        return Err(invalid("name must be a plain file name"));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    fn data(seq: u32, payload: &[u8]) -> Segment {
        Segment::data(seq, payload.to_vec()).seal()
    }

    #[test]
    fn initial_state_accepts_only_seq_one() {
        let t = SequenceTracker::new();
        assert_eq!(t.expected, 0);
        assert_eq!(t.classify(&data(1, b"name")), Verdict::Accept);
        assert_eq!(t.classify(&data(0, b"name")), Verdict::Reject);
        assert_eq!(t.classify(&data(2, b"name")), Verdict::Reject);
    }

    #[test]
    fn in_order_segments_advance() {
        let mut t = SequenceTracker::new();
        for seq in 1..=4 {
            assert_eq!(t.classify(&data(seq, b"x")), Verdict::Accept);
            t.advance();
        }
        assert_eq!(t.expected, 4);
    }

    #[test]
    fn last_accepted_segment_is_a_duplicate() {
        let mut t = SequenceTracker::new();
        t.advance();
        t.advance(); // accepted 1 and 2
        assert_eq!(t.classify(&data(2, b"again")), Verdict::Duplicate);
        // Older retransmissions get no answer.
        assert_eq!(t.classify(&data(1, b"stale")), Verdict::Reject);
        // Gaps are never bridged.
        assert_eq!(t.classify(&data(4, b"future")), Verdict::Reject);
        assert_eq!(t.expected, 2);
    }

    #[test]
    fn corrupt_segments_are_rejected_regardless_of_order() {
        let t = SequenceTracker::new();
        let mut seg = data(1, b"name");
        seg.payload[0] ^= 0x01;
        assert_eq!(t.classify(&seg), Verdict::Reject);
    }

    #[test]
    fn acks_and_unknown_kinds_are_rejected() {
        let t = SequenceTracker::new();
        assert_eq!(t.classify(&data(1, b"n").to_ack()), Verdict::Reject);

        let mut odd = Segment::data(1, b"n".to_vec());
        odd.kind = crate::segment::SegmentKind::Unknown(0x0049);
        assert_eq!(t.classify(&odd.seal()), Verdict::Reject);
    }

    #[test]
    fn output_name_accepts_plain_names() {
        assert_eq!(output_name(b"report.pdf").unwrap(), "report.pdf");
    }

    #[test]
    fn output_name_rejects_paths_and_garbage() {
        let bad_names: [&[u8]; 6] = [b"", b"..", b".", b"../etc/passwd", b"dir/file", b"\xff\xfe"];
        for bad in bad_names {
            let err = output_name(bad).unwrap_err();
            assert_eq!(err.exit_code(), 2, "{bad:?} should be refused");
        }
    }

    async fn expect_ack(peer: &Socket, seq: u32) {
        let (ack, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from())
            .await
            .expect("no ACK")
            .unwrap();
        assert!(ack.is_ack() && ack.is_valid());
        assert_eq!(ack.seq, seq);
    }

    /// Drive a receiver by hand: out-of-order, corrupt and duplicate segments
    /// interleaved with the real ones.
    #[tokio::test]
    async fn writes_only_in_order_payload_and_acks_accordingly() {
        let dir = tempfile::tempdir().unwrap();
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let receiver_addr = socket.local_addr;
        let config = TransferConfig::default().with_linger(Duration::ZERO);
        let receiver = Receiver::new(socket, dir.path(), config).unwrap();
        let task = tokio::spawn(receiver.run());

        let peer = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        peer.send_to(&data(2, b"early"), receiver_addr).await.unwrap(); // dropped
        peer.send_to(&data(1, b"out.bin"), receiver_addr).await.unwrap();
        expect_ack(&peer, 1).await;

        let mut corrupt = data(2, b"hello ");
        corrupt.checksum ^= 0xff;
        peer.send_to(&corrupt, receiver_addr).await.unwrap(); // dropped
        peer.send_to(&data(2, b"hello "), receiver_addr).await.unwrap();
        expect_ack(&peer, 2).await;

        peer.send_to(&data(2, b"hello "), receiver_addr).await.unwrap(); // duplicate
        expect_ack(&peer, 2).await;

        peer.send_to(&data(3, b"world"), receiver_addr).await.unwrap();
        expect_ack(&peer, 3).await;
        peer.send_to(&Segment::end_marker(4).seal(), receiver_addr)
            .await
            .unwrap();
        expect_ack(&peer, 4).await;

        let report = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("receiver did not finish")
            .unwrap()
            .unwrap();

        assert_eq!(report.file_name, "out.bin");
        assert_eq!(report.bytes_written, 11);
        assert_eq!(report.segments_accepted, 4);
        assert_eq!(report.duplicates, 1);
        let written = std::fs::read(dir.path().join("out.bin")).unwrap();
        assert_eq!(written, b"hello world");
    }

    #[tokio::test]
    async fn oversized_payload_is_dropped_unacknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let receiver_addr = socket.local_addr;
        let config = TransferConfig::default()
            .with_max_segment_size(100)
            .with_linger(Duration::ZERO);
        let max = config.max_payload_size();
        let task = tokio::spawn(Receiver::new(socket, dir.path(), config).unwrap().run());

        let peer = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        peer.send_to(&data(1, b"small.bin"), receiver_addr).await.unwrap();
        expect_ack(&peer, 1).await;

        // Correctly sealed, but larger than this receiver's segments.
        peer.send_to(&data(2, &vec![b'x'; 5000]), receiver_addr)
            .await
            .unwrap();
        let silence = tokio::time::timeout(Duration::from_millis(100), peer.recv_from()).await;
        assert!(silence.is_err(), "oversized segment was acknowledged");

        peer.send_to(&data(2, &vec![b'y'; max]), receiver_addr)
            .await
            .unwrap();
        expect_ack(&peer, 2).await;
        peer.send_to(&Segment::end_marker(3).seal(), receiver_addr)
            .await
            .unwrap();
        expect_ack(&peer, 3).await;

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.bytes_written, max as u64);
        let written = std::fs::read(dir.path().join("small.bin")).unwrap();
        assert_eq!(written, vec![b'y'; max]);
    }

    #[tokio::test]
    async fn lingers_to_reacknowledge_a_lost_final_ack() {
        let dir = tempfile::tempdir().unwrap();
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let receiver_addr = socket.local_addr;
        let config = TransferConfig::default().with_linger(Duration::from_millis(300));
        let task = tokio::spawn(Receiver::new(socket, dir.path(), config).unwrap().run());

        let peer = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let end = Segment::end_marker(2).seal();
        peer.send_to(&data(1, b"empty.txt"), receiver_addr).await.unwrap();
        peer.recv_from().await.unwrap();
        peer.send_to(&end, receiver_addr).await.unwrap();
        peer.recv_from().await.unwrap();

        // Pretend that ACK was lost and retransmit the end marker.
        peer.send_to(&end, receiver_addr).await.unwrap();
        let (ack, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from())
            .await
            .expect("no ACK during linger")
            .unwrap();
        assert!(end.acknowledged_by(&ack));

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.bytes_written, 0);
        assert!(dir.path().join("empty.txt").exists());
    }
}
