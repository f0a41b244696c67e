//! Stop-and-wait send side.
//!
//! [`Sender`] drives one file transfer: the destination name as segment 1,
//! then the file contents one chunk per segment, then an empty end marker.
//!
//! # Stop-and-Wait contract
//! - At most **one** segment is outstanding at any moment.
//! - Each segment is sent once and a [`crate::timer::retransmit`] timer is
//!   armed for it; the timer alone resends it every retry interval.
//! - The sender advances only after an ACK whose sequence number and checksum
//!   match the outstanding segment.  Everything else inbound is ignored.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::config::TransferConfig;
use crate::error::SenderError;
use crate::segment::{is_plain_file_name, Segment};
use crate::socket::{is_transient, Socket, SocketError};
use crate::state::SenderState;
use crate::timer::{self, AckFlag};

/// Summary of a completed send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Segments acknowledged, name and end marker included.
    pub segments: u32,
    /// Timer-driven resends across the whole transfer.
    pub retransmissions: u32,
    /// File bytes delivered.
    pub bytes: u64,
}

/// Stop-and-wait send-side state for one transfer.
#[derive(Debug)]
pub struct Sender {
    socket: Arc<Socket>,
    dest: SocketAddr,
    config: TransferConfig,

    /// Sequence number of the **next** segment to send.
    ///
    /// Starts at 1 and advances by one each time an ACK is matched.
    pub next_seq: u32,

    /// Current FSM state.
    pub state: SenderState,

    report: SendReport,
}

impl Sender {
    /// Create a [`Sender`] that will talk to `dest` over `socket`.
    pub fn new(
        socket: Arc<Socket>,
        dest: SocketAddr,
        config: TransferConfig,
    ) -> Result<Self, SenderError> {
        config.validate()?;
        Ok(Self {
            socket,
            dest,
            config,
            next_seq: 1,
            state: SenderState::SendName,
            report: SendReport::default(),
        })
    }

    /// Run the whole transfer: `name`, then everything `source` yields, then
    /// the end marker.
    pub async fn transfer<R>(&mut self, name: &str, source: &mut R) -> Result<SendReport, SenderError>
    where
        R: AsyncRead + Unpin,
    {
        check_name(name, &self.config)?;
        let max_payload = self.config.max_payload_size();

        self.enter(SenderState::SendName);
        self.transmit_and_wait(Segment::data(self.next_seq, name.as_bytes().to_vec()))
            .await?;

        self.enter(SenderState::SendData);
        let mut chunk = read_chunk(source, max_payload)
            .await
            .map_err(SenderError::Read)?;
        while !chunk.is_empty() {
            let len = chunk.len() as u64;
            self.transmit_and_wait(Segment::data(self.next_seq, chunk)).await?;
            self.report.bytes += len;
            chunk = read_chunk(source, max_payload)
                .await
                .map_err(SenderError::Read)?;
        }

        self.enter(SenderState::SendFinal);
        self.transmit_and_wait(Segment::end_marker(self.next_seq)).await?;

        self.enter(SenderState::Done);
        Ok(self.report.clone())
    }

    fn enter(&mut self, state: SenderState) {
        log::info!("[send] {} → {}", self.state, state);
        self.state = state;
    }

    /// Seal and send `segment`, arm its retransmission timer, and block until
    /// the matching ACK arrives.
    async fn transmit_and_wait(&mut self, segment: Segment) -> Result<(), SenderError> {
        let segment = segment.seal();
        self.socket
            .send_to(&segment, self.dest)
            .await
            .map_err(SenderError::Transport)?;
        log::debug!(
            "[send] → DATA seq={} len={}",
            segment.seq,
            segment.payload_len()
        );

        let acked = AckFlag::new();
        let timer = timer::retransmit(
            Arc::clone(&self.socket),
            segment.clone(),
            self.dest,
            self.config.retry_interval,
            acked.clone(),
        );

        loop {
            let (inbound, from) = match self.socket.recv_from().await {
                Ok(received) => received,
                Err(SocketError::Framing(e)) => {
                    log::debug!("[send] dropping datagram: {e}");
                    continue;
                }
                Err(SocketError::Io(e)) if is_transient(&e) => {
                    log::debug!("[send] transient receive error: {e}");
                    continue;
                }
                Err(SocketError::Io(e)) => return Err(SenderError::Transport(e)),
            };

            if from != self.dest {
                log::debug!("[send] ignoring datagram from {from}");
                continue;
            }

            if segment.acknowledged_by(&inbound) {
                acked.set();
                timer.cancel();
                log::debug!("[send] ← ACK seq={}", inbound.seq);
                break;
            }

            log::debug!(
                "[send] ← {} seq={} ignored (waiting for ACK seq={}, valid={})",
                inbound.kind,
                inbound.seq,
                segment.seq,
                inbound.is_valid()
            );
        }

        self.report.segments += 1;
        self.report.retransmissions += timer.fire_count();
        self.next_seq = self.next_seq.wrapping_add(1);
        Ok(())
    }
}

/// Send the file at `source` to `host:port`, to be stored as `name`.
///
/// Name, address and socket problems are reported before the source file is
/// opened, and nothing is put on the network until all of them succeed.
pub async fn send_file(
    source: &Path,
    host: &str,
    port: u16,
    name: &str,
    config: TransferConfig,
) -> Result<SendReport, SenderError> {
    config.validate()?;
    check_name(name, &config)?;

    let dest = resolve(host, port).await?;
    let bind_addr: SocketAddr = if dest.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = Socket::bind(bind_addr).await.map_err(SenderError::socket)?;

    let mut file = tokio::fs::File::open(source)
        .await
        .map_err(|e| SenderError::SourceOpen {
            path: source.to_path_buf(),
            source: e,
        })?;

    log::info!(
        "[send] {} → {dest} as {name:?} (local {})",
        source.display(),
        socket.local_addr
    );
    let mut sender = Sender::new(Arc::new(socket), dest, config)?;
    let report = sender.transfer(name, &mut file).await?;

    // Surfaces the outcome of any operation still pending on the handle.
    file.shutdown().await.map_err(SenderError::Close)?;

    log::info!(
        "[send] done: {} bytes in {} segments, {} retransmissions",
        report.bytes,
        report.segments,
        report.retransmissions
    );
    Ok(report)
}

/// Refuse names the receiver could never create, before anything is sent.
fn check_name(name: &str, config: &TransferConfig) -> Result<(), SenderError> {
    if !is_plain_file_name(name) {
        return Err(SenderError::BadName(name.to_string()));
    }
    let max = config.max_payload_size();
    if name.len() > max {
        return Err(SenderError::NameTooLong {
            len: name.len(),
            max,
        });
    }
    Ok(())
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, SenderError> {
    let resolve_err = |source| SenderError::Resolve {
        host: host.to_string(),
        source,
    };
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(resolve_err)?
        .collect();
    // Prefer IPv4 so "localhost" reaches a receiver bound to 0.0.0.0.
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| resolve_err(io::Error::new(io::ErrorKind::NotFound, "no addresses")))
}

/// Fill a chunk of up to `max` bytes, accumulating short reads.  An empty
/// chunk means end of input.
async fn read_chunk<R>(source: &mut R, max: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; max];
    let mut filled = 0;
    while filled < max {
        match source.read(&mut chunk[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    chunk.truncate(filled);
    Ok(chunk)
}
