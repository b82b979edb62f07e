//! Datagram-to-stream shim for mesh radio links.
//!
//! The transfer protocol was designed for byte-streamed serial links; the
//! mesh delivers small, reordered, duplicated, droppable datagrams. This
//! crate bridges the two:
//!
//! - **Mesh abstraction**: the [`MeshTransport`] trait and [`MeshPacket`]
//!   shape consumed by everything above the radio
//! - **Framer**: wraps stream bytes as `{identifier, seq, data}` datagrams
//! - **Adapter**: [`PacketStream`] presents the framer as a byte stream
//!   with an exact-match accept policy — duplicates and gaps are dropped
//!   and left to the protocol layer's position recovery
//!
//! A sliding receive window is deliberately absent: with one file and at
//! most one outstanding chunk, exact sequence matching collapses to an
//! in-order shift register and the protocol's ZRPOS machinery covers the
//! rest.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod error;
pub mod frame;
pub mod mesh;

pub use adapter::PacketStream;
pub use error::StreamError;
pub use frame::{Framer, FRAME_HEADER_LEN};
pub use mesh::{MeshPacket, MeshTransport, NodeId, COMMAND_PORT, DATA_PORT};
