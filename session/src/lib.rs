//! Transfer sessions over a datagram mesh.
//!
//! This crate drives single-file transfers between two mesh nodes with a
//! ZModem-derived protocol, built on the codecs in `meshmodem-wire` and
//! the datagram shim in `meshmodem-stream`.
//!
//! ## Features
//!
//! - **Sender and receiver state machines**: non-blocking, driven by a
//!   `poll()` from an outer scheduler; retries, position recovery and
//!   keepalives included
//! - **Session coordinator**: lifecycle, progress reporting, abort, and
//!   the status getters a UI needs
//! - **Filesystem abstraction**: seekable file handles with std and
//!   in-memory backends
//! - **Command surface**: the `SEND:`/`RECV:` text commands peers use to
//!   start transfers
//!
//! Everything is single-threaded and cooperative: all state lives behind
//! [`TransferSession`], mutated only by [`TransferSession::poll`] and
//! [`TransferSession::push_data_packet`], both of which return in bounded
//! time.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod engine;
mod link;
mod receiver;
mod sender;

pub mod command;
pub mod config;
pub mod error;
pub mod fs;
pub mod session;

pub use command::Command;
pub use config::TransferConfig;
pub use error::SessionError;
pub use fs::{FileHandle, FileStore, MemFileStore, OpenMode, StdFileStore};
pub use session::{TransferSession, TransferState};
