//! Fatal transfer errors and their process exit codes.
//!
//! Corruption and loss never surface here: bad or misordered segments are
//! dropped inside the state machines and recovered by retransmission.  What
//! remains is argument, transport and local-file failure, each of which ends
//! the transfer.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Exit code for wrong arity or unparseable arguments.
pub const EXIT_USAGE: i32 = 1;

/// Errors that end a send.
#[derive(Debug, Error)]
pub enum SenderError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("file name is {len} bytes but a segment holds at most {max}")]
    NameTooLong { len: usize, max: usize },
    #[error("{0:?} is not a plain file name")]
    BadName(String),
    #[error("cannot open socket: {0}")]
    Bind(#[source] io::Error),
    #[error("not permitted to open socket: {0}")]
    Permission(#[source] io::Error),
    #[error("cannot resolve {host}: {source}")]
    Resolve { host: String, source: io::Error },
    #[error("cannot open {}: {source}", path.display())]
    SourceOpen { path: PathBuf, source: io::Error },
    #[error("failed reading source: {0}")]
    Read(#[source] io::Error),
    #[error("failed closing source: {0}")]
    Close(#[source] io::Error),
    #[error("transport failure: {0}")]
    Transport(#[source] io::Error),
}

impl SenderError {
    /// Socket setup failure, split out when the OS refused for lack of
    /// permission.
    pub fn socket(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::PermissionDenied {
            SenderError::Permission(e)
        } else {
            SenderError::Bind(e)
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            SenderError::Config(_)
            | SenderError::NameTooLong { .. }
            | SenderError::BadName(_) => EXIT_USAGE,
            SenderError::Bind(_) => 2,
            SenderError::Permission(_) => 3,
            SenderError::Resolve { .. } => 4,
            SenderError::SourceOpen { .. } => 5,
            SenderError::Read(_) => 6,
            SenderError::Close(_) => 7,
            SenderError::Transport(_) => 8,
        }
    }
}

/// Errors that end a receive.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot create output file {name:?}: {source}")]
    CreateOutput { name: String, source: io::Error },
    #[error("cannot bind socket: {0}")]
    Bind(#[source] io::Error),
    #[error("failed sending ACK: {0}")]
    AckSend(#[source] io::Error),
    #[error("failed writing output: {0}")]
    Write(#[source] io::Error),
    #[error("failed closing output: {0}")]
    Close(#[source] io::Error),
    #[error("transport failure: {0}")]
    Transport(#[source] io::Error),
}

impl ReceiverError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ReceiverError::Config(_) => EXIT_USAGE,
            ReceiverError::CreateOutput { .. } => 2,
            ReceiverError::Bind(_) => 3,
            ReceiverError::AckSend(_) => 4,
            ReceiverError::Write(_) => 5,
            ReceiverError::Close(_) => 6,
            ReceiverError::Transport(_) => 7,
        }
    }
}
