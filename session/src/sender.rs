//! Sender state machine.
//!
//! Phases, in wire order: announce the transfer (ZRQINIT), describe the
//! file (ZFILE plus a name/size subpacket), stream data chunks (ZDATA),
//! signal the end position (ZEOF), close the session (ZFIN, "OO").
//! Every waiting phase re-sends its announcement on the retry cadence;
//! the receiver steers the data phase with ZRPOS position requests.

use meshmodem_stream::{MeshTransport, NodeId};
use meshmodem_wire::{Header, HeaderType, WireError};
use std::time::Instant;
use tracing::{debug, trace};

use crate::config::TransferConfig;
use crate::engine::Status;
use crate::error::SessionError;
use crate::fs::FileHandle;
use crate::link::Link;

/// File bytes per data subpacket.
const DATA_CHUNK: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Announcing ZRQINIT, waiting for the receiver's ZRINIT
    Handshake,
    /// Sending the file name/size, waiting for the starting ZRPOS
    FileInfo,
    /// Streaming data chunks
    Data,
    /// Announcing the end position, waiting for ZRINIT
    Eof,
    /// Closing, waiting for the peer's ZFIN
    Fin,
}

pub(crate) struct Sender {
    link: Link,
    file: Box<dyn FileHandle>,
    filename: String,
    file_size: u64,
    bytes_sent: u64,
    phase: Phase,
    last_activity: Instant,
    last_send: Option<Instant>,
    retry_count: u32,
    finished: bool,
}

impl Sender {
    pub fn new(
        config: &TransferConfig,
        file: Box<dyn FileHandle>,
        filename: String,
        dest: NodeId,
    ) -> Self {
        let mut link = Link::new(config);
        link.stream.set_destination(dest);
        let file_size = file.size();
        Self {
            link,
            file,
            filename,
            file_size,
            bytes_sent: 0,
            phase: Phase::Handshake,
            last_activity: Instant::now(),
            last_send: None,
            retry_count: 0,
            finished: false,
        }
    }

    pub fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_sent
    }

    pub fn total_size(&self) -> u64 {
        self.file_size
    }

    pub fn file_mut(&mut self) -> &mut dyn FileHandle {
        self.file.as_mut()
    }

    pub fn push_datagram(&mut self, src: NodeId, payload: &[u8]) {
        if self.link.stream.push_datagram(src, payload) {
            self.link.pump();
        }
    }

    pub fn poll(
        &mut self,
        mesh: &mut dyn MeshTransport,
        config: &TransferConfig,
    ) -> Result<Status, SessionError> {
        let now = Instant::now();
        if now.duration_since(self.last_activity) > config.timeout() {
            return Err(SessionError::Timeout);
        }

        self.link.pump();
        match self.link.next_header() {
            Ok(Some(header)) => {
                self.last_activity = now;
                self.retry_count = 0;
                self.on_header(header)?;
            }
            Ok(None) => {}
            Err(WireError::Canceled) => return Err(SessionError::PeerAbort),
            Err(err) => return Err(err.into()),
        }

        // Finish any transmission the radio refused earlier before
        // considering new work.
        self.link.drive(mesh);
        if !self.link.idle() {
            return Ok(Status::Active);
        }
        if self.finished {
            return Ok(Status::Finished);
        }

        match self.phase {
            Phase::Handshake => {
                if self.due(now, config)? {
                    self.link.queue_hex(Header::new(HeaderType::Rqinit));
                    self.link.drive(mesh);
                }
            }
            Phase::FileInfo => {
                if self.due(now, config)? {
                    let info = self.file_info();
                    self.link.queue_bin(Header::new(HeaderType::File));
                    self.link.queue_subpacket(&info, true);
                    self.link.drive(mesh);
                }
            }
            Phase::Data => self.send_chunk(mesh, now)?,
            Phase::Eof => {
                if self.due(now, config)? {
                    self.link
                        .queue_hex(Header::with_pos(HeaderType::Eof, self.file_size as u32));
                    self.link.drive(mesh);
                }
            }
            Phase::Fin => {
                if self.due(now, config)? {
                    self.link.queue_hex(Header::new(HeaderType::Fin));
                    self.link.drive(mesh);
                }
            }
        }
        Ok(Status::Active)
    }

    fn on_header(&mut self, header: Header) -> Result<(), SessionError> {
        match (self.phase, header.typ) {
            (Phase::Handshake, HeaderType::Rinit) => {
                debug!("receiver ready, sending file info");
                self.enter(Phase::FileInfo);
            }
            (Phase::FileInfo, HeaderType::Rpos) => {
                self.rewind(header.pos() as u64)?;
                debug!("receiver requested data from {}", self.bytes_sent);
                self.enter(Phase::Data);
            }
            (Phase::Data, HeaderType::Rpos) => {
                self.rewind(header.pos() as u64)?;
                debug!("rewinding to {}", self.bytes_sent);
            }
            (Phase::Data, HeaderType::Ack) => {}
            (Phase::Eof, HeaderType::Rpos) => {
                // The receiver is short of the end position; back into the
                // data phase from its last good offset.
                self.rewind(header.pos() as u64)?;
                self.enter(Phase::Data);
            }
            (Phase::Eof, HeaderType::Rinit) => self.enter(Phase::Fin),
            (Phase::Fin, HeaderType::Fin) => {
                self.link.queue(b"OO");
                self.finished = true;
            }
            (phase, typ) => trace!("ignoring {typ:?} header in {phase:?}"),
        }
        Ok(())
    }

    fn send_chunk(
        &mut self,
        mesh: &mut dyn MeshTransport,
        now: Instant,
    ) -> Result<(), SessionError> {
        if self.bytes_sent >= self.file_size {
            self.enter(Phase::Eof);
            return Ok(());
        }
        let mut chunk = [0u8; DATA_CHUNK];
        let n = self.file.read(&mut chunk)?;
        if n == 0 {
            self.enter(Phase::Eof);
            return Ok(());
        }
        let last = self.bytes_sent + n as u64 >= self.file_size;
        self.link
            .queue_bin(Header::with_pos(HeaderType::Data, self.bytes_sent as u32));
        self.link.queue_subpacket(&chunk[..n], last);
        self.bytes_sent += n as u64;
        if self.link.drive(mesh) > 0 {
            self.last_activity = now;
        }
        if last {
            self.enter(Phase::Eof);
        }
        Ok(())
    }

    /// Whether a timed (re)send is due. The first send of a phase fires
    /// immediately; each later one counts against the retry budget.
    fn due(&mut self, now: Instant, config: &TransferConfig) -> Result<bool, SessionError> {
        match self.last_send {
            None => {
                self.last_send = Some(now);
                Ok(true)
            }
            Some(at) if now.duration_since(at) >= config.retry_interval() => {
                self.retry_count += 1;
                if self.retry_count > config.max_retries {
                    return Err(SessionError::RetriesExhausted(self.retry_count));
                }
                self.last_send = Some(now);
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.last_send = None;
        self.retry_count = 0;
    }

    fn rewind(&mut self, pos: u64) -> Result<(), SessionError> {
        self.file.seek(pos)?;
        self.bytes_sent = pos;
        Ok(())
    }

    /// NUL-terminated name followed by the NUL-terminated decimal size.
    fn file_info(&self) -> Vec<u8> {
        let mut info = Vec::with_capacity(self.filename.len() + 16);
        info.extend_from_slice(self.filename.as_bytes());
        info.push(0);
        info.extend_from_slice(self.file_size.to_string().as_bytes());
        info.push(0);
        info
    }
}
