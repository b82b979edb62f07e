//! Session error taxonomy.
//!
//! Protocol-level trouble (CRC mismatches, lost datagrams, unexpected
//! headers) is recovered inside the state machines and never surfaces
//! here. These are the terminal conditions plus request-rejection causes.

use crate::session::TransferState;
use meshmodem_stream::StreamError;
use meshmodem_wire::WireError;
use thiserror::Error;

/// Terminal and request-rejection errors for a transfer session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A transfer is already running
    #[error("transfer already in progress ({0})")]
    Busy(TransferState),

    /// Malformed command, path or destination
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The path names a directory
    #[error("not a regular file: {0}")]
    IsDirectory(String),

    /// File open/read/write failure
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// No meaningful event within the configured timeout
    #[error("inactivity timeout exceeded")]
    Timeout,

    /// A protocol step went unanswered too many times
    #[error("gave up after {0} unanswered retries")]
    RetriesExhausted(u32),

    /// The peer canceled the session
    #[error("canceled by peer")]
    PeerAbort,

    /// Inconsistent configuration values
    #[error("bad configuration: {0}")]
    Config(String),

    /// Datagram shim failure
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Wire codec failure
    #[error(transparent)]
    Wire(#[from] WireError),
}
