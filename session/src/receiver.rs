//! Receiver state machine.
//!
//! The receiver is reactive: it answers the sender's headers, commits
//! data subpackets to the file only after their CRC verifies, and steers
//! the sender with ZRPOS whenever positions disagree or a subpacket
//! arrives damaged. A periodic ZRINIT keepalive pokes a sender whose
//! last header got lost.

use meshmodem_stream::{MeshTransport, NodeId};
use meshmodem_wire::{Header, HeaderType, SubpacketDecoder, WireError};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::TransferConfig;
use crate::engine::Status;
use crate::error::SessionError;
use crate::fs::FileHandle;
use crate::link::Link;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the sender's next header
    AwaitHeader,
    /// Accumulating the ZFILE name/size subpacket
    FileInfo,
    /// Accumulating one data subpacket
    Data,
}

pub(crate) struct Receiver {
    link: Link,
    file: Box<dyn FileHandle>,
    remote_name: Option<String>,
    remote_size: Option<u64>,
    bytes_written: u64,
    phase: Phase,
    decoder: SubpacketDecoder,
    finished: bool,
    last_activity: Instant,
    last_send: Option<Instant>,
    retry_count: u32,
}

impl Receiver {
    pub fn new(config: &TransferConfig, file: Box<dyn FileHandle>) -> Self {
        Self {
            link: Link::new(config),
            file,
            remote_name: None,
            remote_size: None,
            bytes_written: 0,
            phase: Phase::AwaitHeader,
            decoder: SubpacketDecoder::new(),
            finished: false,
            last_activity: Instant::now(),
            last_send: None,
            retry_count: 0,
        }
    }

    pub fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_written
    }

    pub fn total_size(&self) -> Option<u64> {
        self.remote_size
    }

    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
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
        if self.phase == Phase::AwaitHeader {
            match self.link.next_header() {
                Ok(Some(header)) => {
                    self.last_activity = now;
                    self.retry_count = 0;
                    self.on_header(header, now)?;
                }
                Ok(None) => {}
                Err(WireError::Canceled) => return Err(SessionError::PeerAbort),
                Err(err) => return Err(err.into()),
            }
        }
        if self.phase != Phase::AwaitHeader {
            self.drain_subpacket(now)?;
        }

        if !self.finished && self.keepalive_due(now, config)? {
            trace!("keepalive ZRINIT");
            self.link.queue_hex(Header::new(HeaderType::Rinit));
        }

        self.link.drive(mesh);
        if self.finished && self.link.idle() {
            return Ok(Status::Finished);
        }
        Ok(Status::Active)
    }

    fn on_header(&mut self, header: Header, now: Instant) -> Result<(), SessionError> {
        match header.typ {
            HeaderType::Rqinit => {
                self.reply(now, Header::new(HeaderType::Rinit));
            }
            HeaderType::File => {
                self.decoder.reset();
                self.phase = Phase::FileInfo;
            }
            HeaderType::Data => {
                if header.pos() as u64 == self.bytes_written {
                    self.decoder.reset();
                    self.phase = Phase::Data;
                } else {
                    debug!(
                        "data position {} disagrees with ours {}",
                        header.pos(),
                        self.bytes_written
                    );
                    self.request_position(now);
                }
            }
            HeaderType::Eof => {
                let size_matches = self
                    .remote_size
                    .map_or(true, |size| size == self.bytes_written);
                if header.pos() as u64 == self.bytes_written && size_matches {
                    self.file.flush()?;
                    debug!("end of file at {}", self.bytes_written);
                    self.reply(now, Header::new(HeaderType::Rinit));
                } else {
                    self.request_position(now);
                }
            }
            HeaderType::Fin => {
                self.reply(now, Header::new(HeaderType::Fin));
                self.finished = true;
            }
            typ => trace!("ignoring {typ:?} header"),
        }
        Ok(())
    }

    /// Decode one subpacket's worth of buffered bytes.
    fn drain_subpacket(&mut self, now: Instant) -> Result<(), SessionError> {
        let subpacket = match self.decoder.decode(&mut self.link.inbuf) {
            Ok(None) => return Ok(()),
            Ok(Some(subpacket)) => subpacket,
            Err(WireError::Canceled) => return Err(SessionError::PeerAbort),
            Err(WireError::Overflow { max }) => {
                warn!("subpacket ran past {max} bytes; requesting resend");
                self.decoder.reset();
                self.request_position(now);
                self.phase = Phase::AwaitHeader;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        match self.phase {
            Phase::FileInfo => {
                // The announcement is applied as parsed; its CRC bytes
                // are not consulted. File data below stays gated.
                self.apply_file_info(&subpacket.data);
                self.last_activity = now;
                self.request_position(now);
            }
            Phase::Data => {
                if subpacket.crc_ok {
                    self.file.write_all(&subpacket.data)?;
                    self.bytes_written += subpacket.data.len() as u64;
                    self.last_activity = now;
                } else {
                    // Do not advance; the ZRPOS names the last offset that
                    // actually reached the file.
                    warn!("data subpacket failed CRC at {}", self.bytes_written);
                    self.request_position(now);
                }
            }
            Phase::AwaitHeader => {}
        }
        self.phase = Phase::AwaitHeader;
        Ok(())
    }

    fn apply_file_info(&mut self, data: &[u8]) {
        let mut parts = data.split(|&b| b == 0);
        let name = parts
            .next()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default();
        let size = parts
            .next()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .and_then(|text| text.parse::<u64>().ok());
        info!(
            "incoming file \"{}\" ({})",
            name,
            size.map_or_else(|| "size unknown".to_string(), |s| format!("{s} bytes"))
        );
        // The announced name is informational only; bytes always land at
        // the locally configured path.
        self.remote_name = Some(name);
        self.remote_size = size;
    }

    /// Tell the sender where our file actually ends.
    fn request_position(&mut self, now: Instant) {
        self.reply(now, Header::with_pos(HeaderType::Rpos, self.bytes_written as u32));
    }

    fn reply(&mut self, now: Instant, header: Header) {
        self.link.queue_hex(header);
        self.last_send = Some(now);
    }

    fn keepalive_due(&mut self, now: Instant, config: &TransferConfig) -> Result<bool, SessionError> {
        match self.last_send {
            None => {
                self.last_send = Some(now);
                Ok(true)
            }
            Some(at) if now.duration_since(at) >= config.keepalive_interval() => {
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
}
