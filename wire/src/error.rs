//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Unknown header type byte
    #[error("unknown header type {0}")]
    Type(u8),

    /// Subpacket exceeded the decoder's size cap
    #[error("subpacket exceeds {max} bytes")]
    Overflow {
        /// Configured size cap
        max: usize,
    },

    /// Peer sent the ZDLE-CAN cancel sequence
    #[error("canceled by peer")]
    Canceled,
}
