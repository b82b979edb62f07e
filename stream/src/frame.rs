//! Datagram framing.
//!
//! Every mesh payload carrying stream bytes has the same three-byte
//! header:
//!
//! ```text
//! +----------------+---------------------+------------------+
//! | identifier (1) | sequence, BE (2)    | stream bytes (N) |
//! +----------------+---------------------+------------------+
//! ```
//!
//! The identifier byte discriminates this protocol's frames from other
//! traffic sharing the port; a frame with the wrong identifier is not
//! ours. There is no CRC at this layer — the protocol CRCs above and the
//! radio's own link CRC below cover integrity.

use crate::error::StreamError;
use bytes::{BufMut, Bytes, BytesMut};

/// Bytes of shim header per datagram.
pub const FRAME_HEADER_LEN: usize = 3;

/// Frame encoder/decoder for one identifier byte.
#[derive(Debug, Clone, Copy)]
pub struct Framer {
    identifier: u8,
}

impl Framer {
    /// Framer tagging frames with `identifier`.
    pub fn new(identifier: u8) -> Self {
        Self { identifier }
    }

    /// Wrap stream bytes into a datagram payload.
    pub fn encode(&self, seq: u16, data: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + data.len());
        out.put_u8(self.identifier);
        out.put_u16(seq);
        out.put_slice(data);
        out.freeze()
    }

    /// Unwrap a datagram payload into its sequence number and bytes.
    pub fn decode<'a>(&self, payload: &'a [u8]) -> Result<(u16, &'a [u8]), StreamError> {
        if payload.len() < FRAME_HEADER_LEN {
            return Err(StreamError::Truncated(payload.len()));
        }
        if payload[0] != self.identifier {
            return Err(StreamError::Identifier(payload[0]));
        }
        let seq = u16::from_be_bytes([payload[1], payload[2]]);
        Ok((seq, &payload[FRAME_HEADER_LEN..]))
    }
}
