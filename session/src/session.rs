//! Session coordinator.
//!
//! [`TransferSession`] owns the mesh handle, the file store, and at most
//! one active engine. The outer scheduler calls
//! [`poll`](TransferSession::poll) on its loop and forwards inbound mesh
//! packets to [`push_data_packet`](TransferSession::push_data_packet);
//! everything else is lifecycle plumbing and status surface.

use meshmodem_stream::{MeshPacket, MeshTransport, NodeId, COMMAND_PORT};
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::TransferConfig;
use crate::engine::{Engine, Status};
use crate::error::SessionError;
use crate::fs::{FileStore, OpenMode};
use crate::receiver::Receiver;
use crate::sender::Sender;

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// No transfer active
    Idle,
    /// Actively sending a file
    Sending,
    /// Waiting for or receiving a file
    Receiving,
    /// The last transfer completed successfully
    Complete,
    /// The last transfer failed or was aborted
    Error,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Idle => "idle",
            TransferState::Sending => "sending",
            TransferState::Receiving => "receiving",
            TransferState::Complete => "complete",
            TransferState::Error => "error",
        };
        f.write_str(name)
    }
}

/// One node's transfer session: at most one file in flight at a time.
pub struct TransferSession {
    config: TransferConfig,
    mesh: Box<dyn MeshTransport>,
    fs: Box<dyn FileStore>,
    engine: Option<Engine>,
    state: TransferState,
    filename: String,
    bytes_transferred: u64,
    total_size: u64,
    started: Option<Instant>,
    last_progress: Option<Instant>,
}

impl TransferSession {
    /// Set up a session over the given mesh and file store.
    pub fn new(
        config: TransferConfig,
        mesh: Box<dyn MeshTransport>,
        fs: Box<dyn FileStore>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            config,
            mesh,
            fs,
            engine: None,
            state: TransferState::Idle,
            filename: String::new(),
            bytes_transferred: 0,
            total_size: 0,
            started: None,
            last_progress: None,
        })
    }

    /// Start sending `path` to `dest`.
    pub fn start_send(&mut self, path: &str, dest: NodeId) -> Result<(), SessionError> {
        self.ensure_available()?;
        let file = self.fs.open(path, OpenMode::Read)?;
        let size = file.size();
        self.begin(path, size);
        self.engine = Some(Engine::Sender(Sender::new(
            &self.config,
            file,
            path.to_string(),
            dest,
        )));
        self.state = TransferState::Sending;
        info!("sending \"{path}\" ({size} bytes) to {dest}");
        Ok(())
    }

    /// Start receiving; incoming bytes land at `path`.
    pub fn start_receive(&mut self, path: &str) -> Result<(), SessionError> {
        self.ensure_available()?;
        let file = self.fs.open(path, OpenMode::Write)?;
        self.begin(path, 0);
        self.engine = Some(Engine::Receiver(Receiver::new(&self.config, file)));
        self.state = TransferState::Receiving;
        info!("receiving into \"{path}\", waiting for sender");
        Ok(())
    }

    /// Offer one inbound datagram from the data port.
    pub fn push_data_packet(&mut self, src: NodeId, payload: &[u8]) {
        if let Some(engine) = self.engine.as_mut() {
            engine.push_datagram(src, payload);
        }
    }

    /// Drive the transfer one tick. Returns the current state.
    pub fn poll(&mut self) -> TransferState {
        let result = match self.engine.as_mut() {
            None => return self.state,
            Some(engine) => engine.poll(self.mesh.as_mut(), &self.config),
        };
        match result {
            Ok(Status::Active) => {
                if let Some(engine) = self.engine.as_ref() {
                    self.bytes_transferred = engine.bytes_transferred();
                    if let Some(size) = engine.total_size() {
                        self.total_size = size;
                    }
                }
                self.log_progress();
            }
            Ok(Status::Finished) => self.finish(None),
            Err(err) => self.finish(Some(err)),
        }
        self.state
    }

    /// Abort the current transfer. Idempotent: the cancel sequence goes
    /// out once; afterwards the session sits in [`TransferState::Error`]
    /// until reused.
    pub fn abort(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.abort(self.mesh.as_mut());
            let _ = engine.flush_file();
            self.bytes_transferred = engine.bytes_transferred();
            warn!("transfer aborted at {} bytes", self.bytes_transferred);
        }
        self.state = TransferState::Error;
    }

    /// Current state.
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Local path of the current or last transfer.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Bytes moved so far in the current or last transfer.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Total file size, 0 while still unknown.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Send a plain-text message to a node on the command port.
    pub fn send_text(&mut self, dest: NodeId, text: &str) {
        let packet = MeshPacket::new(dest, COMMAND_PORT, text.as_bytes().to_vec());
        if let Err(err) = self.mesh.send_packet(packet) {
            warn!("failed to send reply to {dest}: {err}");
        }
    }

    fn ensure_available(&self) -> Result<(), SessionError> {
        match self.state {
            TransferState::Sending | TransferState::Receiving => {
                Err(SessionError::Busy(self.state))
            }
            _ => Ok(()),
        }
    }

    fn begin(&mut self, path: &str, size: u64) {
        self.filename = path.to_string();
        self.bytes_transferred = 0;
        self.total_size = size;
        self.started = Some(Instant::now());
        self.last_progress = Some(Instant::now());
    }

    fn finish(&mut self, failure: Option<SessionError>) {
        let Some(mut engine) = self.engine.take() else {
            return;
        };
        self.bytes_transferred = engine.bytes_transferred();
        if let Some(size) = engine.total_size() {
            self.total_size = size;
        }
        let flushed = engine.flush_file();
        match failure {
            None => {
                if let Err(err) = flushed {
                    error!("failed to flush \"{}\": {err}", self.filename);
                    self.state = TransferState::Error;
                    return;
                }
                let elapsed = self
                    .started
                    .map(|at| at.elapsed())
                    .unwrap_or_default();
                let secs = elapsed.as_secs_f64();
                let rate = if secs > 0.0 {
                    self.bytes_transferred as f64 / secs
                } else {
                    0.0
                };
                if let Some(name) = engine.remote_name() {
                    debug!("sender announced the file as \"{name}\"");
                }
                info!(
                    "transfer complete: \"{}\", {} bytes in {:.2}s ({:.0} B/s)",
                    self.filename, self.bytes_transferred, secs, rate
                );
                self.state = TransferState::Complete;
            }
            Some(err) => {
                error!("transfer failed: {err}");
                self.state = TransferState::Error;
            }
        }
    }

    fn log_progress(&mut self) {
        let Some(interval) = self.config.progress_interval() else {
            return;
        };
        let now = Instant::now();
        let due = self
            .last_progress
            .map_or(true, |at| now.duration_since(at) >= interval);
        if !due {
            return;
        }
        self.last_progress = Some(now);
        if self.total_size > 0 {
            let percent =
                (self.bytes_transferred as f64 / self.total_size as f64 * 100.0).min(100.0);
            info!(
                "Progress: {percent:.1}% ({}/{} bytes)",
                self.bytes_transferred, self.total_size
            );
        } else {
            info!("Progress: {} bytes", self.bytes_transferred);
        }
    }
}
