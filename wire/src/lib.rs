//! ZModem wire protocol primitives for datagram mesh links.
//!
//! This crate implements the byte-level pieces of the transfer protocol,
//! independent of any transport:
//!
//! - **CRC-16**: the XMODEM polynomial used by every header and subpacket
//! - **ZDLE escaping**: control-byte escaping over the raw stream
//! - **Header codec**: HEX and BIN header serializations with CRC checking
//! - **Subpacket codec**: escaped data runs terminated by ZCRCG/ZCRCE
//!
//! All decoders follow the same contract as the rest of the workspace:
//! they consume from a [`bytes::BytesMut`], return `Ok(None)` when more
//! input is needed, and never block.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod consts;
pub mod crc;
pub mod error;
pub mod escape;
pub mod header;
pub mod subpacket;

pub use consts::HeaderType;
pub use error::WireError;
pub use header::Header;
pub use subpacket::{Subpacket, SubpacketDecoder};
