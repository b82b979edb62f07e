//! Shared wire glue for the two state machines.
//!
//! A [`Link`] owns the datagram shim, the inbound parse buffer, and an
//! outbound record queue. State machines queue complete wire records
//! (headers, subpackets) and let [`Link::drive`] move them through the
//! shim; a mesh send failure leaves the remaining bytes queued so the
//! exact same record resumes on the next tick.

use bytes::{BufMut, BytesMut};
use meshmodem_stream::{MeshTransport, PacketStream};
use meshmodem_wire::{header, subpacket, Header, WireError};
use std::collections::VecDeque;
use tracing::debug;

use crate::config::TransferConfig;

pub(crate) struct Link {
    pub stream: PacketStream,
    pub inbuf: BytesMut,
    outq: VecDeque<u8>,
}

impl Link {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            stream: PacketStream::new(config.packet_identifier, config.max_packet_size),
            inbuf: BytesMut::new(),
            outq: VecDeque::new(),
        }
    }

    /// Move shim receive bytes into the parse buffer.
    pub fn pump(&mut self) {
        while let Some(b) = self.stream.read_byte() {
            self.inbuf.put_u8(b);
        }
    }

    /// Queue raw bytes for transmission.
    pub fn queue(&mut self, bytes: &[u8]) {
        self.outq.extend(bytes);
    }

    pub fn queue_hex(&mut self, header: Header) {
        self.queue(&header.encode_hex());
    }

    pub fn queue_bin(&mut self, header: Header) {
        self.queue(&header.encode_bin());
    }

    pub fn queue_subpacket(&mut self, data: &[u8], end_of_frame: bool) {
        self.queue(&subpacket::encode(data, end_of_frame));
    }

    /// Push queued bytes through the shim and out the radio.
    ///
    /// Send failures are retryable by design: queued bytes stay put, the
    /// caller's retry tick tries again, and the inactivity timeout is the
    /// backstop for a radio that never recovers. Returns the number of
    /// datagrams that left the node.
    pub fn drive(&mut self, mesh: &mut dyn MeshTransport) -> usize {
        let before = self.stream.next_tx_seq();
        while let Some(&b) = self.outq.front() {
            match self.stream.write(mesh, b) {
                Ok(()) => {
                    self.outq.pop_front();
                }
                Err(err) => {
                    debug!("transmit stalled: {err}");
                    break;
                }
            }
        }
        if self.outq.is_empty() && self.stream.has_pending_tx() {
            if let Err(err) = self.stream.flush(mesh) {
                debug!("flush stalled: {err}");
            }
        }
        self.stream.next_tx_seq().wrapping_sub(before) as usize
    }

    /// Whether every queued byte has left the node.
    pub fn idle(&self) -> bool {
        self.outq.is_empty() && !self.stream.has_pending_tx()
    }

    /// Scan the parse buffer for the next complete header.
    pub fn next_header(&mut self) -> Result<Option<Header>, WireError> {
        header::decode(&mut self.inbuf)
    }
}
