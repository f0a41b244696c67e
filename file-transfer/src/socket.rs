//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::segment::Segment`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O.

use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::segment::{FramingError, Segment};

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
const MAX_DATAGRAM: usize = 65_535;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    Io(std::io::Error),
    /// The received datagram is too short to hold a segment header.
    Framing(FramingError),
}

impl std::fmt::Display for SocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "socket I/O error: {e}"),
            Self::Framing(e) => write!(f, "segment framing error: {e}"),
        }
    }
}

impl std::error::Error for SocketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Framing(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for SocketError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<FramingError> for SocketError {
    fn from(e: FramingError) -> Self {
        Self::Framing(e)
    }
}

/// ICMP-driven errors some platforms report on unconnected UDP sockets
/// after a datagram bounced off a closed port.  Receive loops skip them.
pub fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
    )
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, segment-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared between the sender's
/// receive loop and its retransmission timer.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> std::io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `segment` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, segment: &Segment, dest: SocketAddr) -> std::io::Result<()> {
        let bytes = segment.encode();
        self.inner.send_to(&bytes, dest).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Segment`].
    ///
    /// Returns `(segment, sender_address)`.  Datagrams too short to frame are
    /// returned as [`SocketError::Framing`]; the caller decides whether to
    /// keep waiting.  The checksum is not checked here.
    pub async fn recv_from(&self) -> Result<(Segment, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        let segment = Segment::decode(&buf[..n])?;
        Ok((segment, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn segment_crosses_loopback_intact() {
        let a = loopback().await;
        let b = loopback().await;

        let seg = Segment::data(1, b"notes.txt".to_vec()).seal();
        a.send_to(&seg, b.local_addr).await.unwrap();

        let (got, from) = b.recv_from().await.unwrap();
        assert_eq!(got, seg);
        assert_eq!(from, a.local_addr);
    }

    #[test]
    fn bounced_datagram_errors_are_transient() {
        use std::io::{Error, ErrorKind};

        for kind in [ErrorKind::ConnectionRefused, ErrorKind::ConnectionReset, ErrorKind::Interrupted] {
            assert!(is_transient(&Error::from(kind)), "{kind:?}");
        }
        for kind in [ErrorKind::PermissionDenied, ErrorKind::AddrNotAvailable, ErrorKind::Other] {
            assert!(!is_transient(&Error::from(kind)), "{kind:?}");
        }
    }

    #[tokio::test]
    async fn runt_datagram_is_a_framing_error() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = loopback().await;

        a.send_to(&[1, 2, 3], b.local_addr).await.unwrap();

        match b.recv_from().await {
            Err(SocketError::Framing(FramingError::Truncated { len })) => assert_eq!(len, 3),
            other => panic!("expected framing error, got {other:?}"),
        }
    }
}
