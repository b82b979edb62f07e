//! Shim error types.

use thiserror::Error;

/// Datagram shim errors
#[derive(Error, Debug)]
pub enum StreamError {
    /// Datagram shorter than the frame header
    #[error("datagram too short: {0} bytes")]
    Truncated(usize),

    /// Frame carries another protocol's identifier byte
    #[error("foreign packet identifier {0:#04x}")]
    Identifier(u8),

    /// The mesh refused or failed to queue a packet
    #[error("send failed: {0}")]
    Send(String),

    /// Transport I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
