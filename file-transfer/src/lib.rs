//! `udp-file-transfer` — reliable stop-and-wait file transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  DATA(seq k)  ┌──────────┐
//!  │  Sender  │──────────────▶│ Receiver │──▶ output file
//!  └────┬─────┘               └─────┬────┘
//!       │ ▲      ACK(seq k)         │
//!       │ └─────────────────────────┘
//!       │
//!  ┌────▼──────────┐
//!  │ Retransmit    │  resends the outstanding segment every retry interval
//!  │ timer (task)  │  until the ACK flag is raised
//!  └────┬──────────┘
//!       │ raw UDP datagrams
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! Exactly one segment is in flight at a time.  Segment 1 carries the
//! destination file name, segments 2.. carry file chunks, and an empty
//! DATA segment marks the end of the transfer.
//!
//! Each module has a single responsibility:
//! - [`segment`]   — wire format and checksum
//! - [`config`]    — segment size, retry interval, linger
//! - [`error`]     — session errors and process exit codes
//! - [`state`]     — finite-state-machine types
//! - [`sender`]    — outbound stop-and-wait session
//! - [`receiver`]  — inbound in-order delivery to disk
//! - [`timer`]     — periodic retransmission timer
//! - [`simulator`] — lossy relay for testing
//! - [`socket`]    — async UDP socket abstraction

pub mod config;
pub mod error;
pub mod receiver;
pub mod segment;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::TransferConfig;
pub use error::{ReceiverError, SenderError};
pub use receiver::{receive_file, ReceiveReport, Receiver};
pub use segment::{Segment, SegmentKind};
pub use sender::{send_file, SendReport, Sender};
