//! Transfer finite-state machine (FSM) types.
//!
//! The transitions themselves live in [`crate::sender`] and
//! [`crate::receiver`]; keeping the state types here lets both ends log and
//! test their progress without touching the I/O plumbing.

/// Sender FSM.
///
/// ```text
///  SEND_NAME ──ACK(1)──▶ SEND_DATA ──read() == 0──▶ SEND_FINAL ──ACK(n)──▶ DONE
///                          │    ▲
///                          └────┘ ACK(k): next chunk
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// Transmitting the destination file name as segment 1.
    #[default]
    SendName,
    /// Transmitting file chunks, one at a time.
    SendData,
    /// Transmitting the empty end-of-transfer marker.
    SendFinal,
    /// End marker acknowledged.
    Done,
}

/// Receiver FSM.
///
/// ```text
///  AWAIT_NAME ──seq 1──▶ RECEIVING ──end marker──▶ LINGER ──deadline──▶ DONE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverState {
    /// Waiting for the file name; the peer address is not yet known.
    #[default]
    AwaitName,
    /// Output open; accepting in-order file chunks.
    Receiving,
    /// End marker acknowledged and output closed; re-acknowledging
    /// duplicates of the end marker in case the final ACK was lost.
    Linger,
    /// Transfer complete; the socket is released when the receiver drops.
    Done,
}

impl std::fmt::Display for SenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
