//! Byte-stream adapter over framed datagrams.
//!
//! [`PacketStream`] is the seam between the stream-oriented protocol
//! engine and the packet-switched mesh. Outbound bytes accumulate in a
//! transmit buffer that is cut into framed datagrams; inbound datagrams
//! are accepted only in exact sequence order and surfaced as readable
//! bytes.
//!
//! Drop policy on receive, in order:
//! 1. frames that fail to unwrap (short, foreign identifier)
//! 2. frames arriving while the previous one is still unread
//! 3. stale sequence numbers (duplicates, late reorders)
//! 4. future sequence numbers (a gap; the frame's bytes are dropped and
//!    the expected counter resynchronizes past the gap, leaving the hole
//!    for the protocol's CRC and position recovery to repair)
//!
//! All drops are silent on the wire and logged at debug level.

use crate::error::StreamError;
use crate::frame::{Framer, FRAME_HEADER_LEN};
use crate::mesh::{MeshPacket, MeshTransport, NodeId, DATA_PORT};
use std::cmp::Ordering;
use tracing::debug;

/// Stream adapter for one transfer direction pair.
#[derive(Debug)]
pub struct PacketStream {
    framer: Framer,
    max_packet_size: usize,
    destination: NodeId,
    next_tx_seq: u16,
    expected_rx_seq: u16,
    tx_buffer: Vec<u8>,
    rx_buffer: Vec<u8>,
    rx_pos: usize,
}

impl PacketStream {
    /// Adapter framing with `identifier`, emitting datagrams of at most
    /// `max_packet_size` bytes including the frame header.
    pub fn new(identifier: u8, max_packet_size: usize) -> Self {
        Self {
            framer: Framer::new(identifier),
            max_packet_size,
            destination: NodeId::BROADCAST,
            next_tx_seq: 0,
            expected_rx_seq: 0,
            tx_buffer: Vec::with_capacity(max_packet_size),
            rx_buffer: Vec::with_capacity(max_packet_size),
            rx_pos: 0,
        }
    }

    /// Stream bytes per datagram.
    fn capacity(&self) -> usize {
        self.max_packet_size - FRAME_HEADER_LEN
    }

    /// Peer all outbound frames are addressed to.
    pub fn destination(&self) -> NodeId {
        self.destination
    }

    /// Address outbound frames to `dest`.
    pub fn set_destination(&mut self, dest: NodeId) {
        self.destination = dest;
    }

    /// Next sequence number to be emitted.
    pub fn next_tx_seq(&self) -> u16 {
        self.next_tx_seq
    }

    /// Lowest sequence number not yet consumed.
    pub fn expected_rx_seq(&self) -> u16 {
        self.expected_rx_seq
    }

    /// Whether outbound bytes are waiting for a (re)try.
    pub fn has_pending_tx(&self) -> bool {
        !self.tx_buffer.is_empty()
    }

    /// Append one byte to the outbound stream.
    ///
    /// A full buffer is flushed before and after the append; a failed
    /// opportunistic flush leaves the byte buffered for the next attempt,
    /// while a full buffer that cannot be drained fails the write.
    pub fn write(&mut self, mesh: &mut dyn MeshTransport, byte: u8) -> Result<(), StreamError> {
        if self.tx_buffer.len() >= self.capacity() {
            self.flush(mesh)?;
        }
        self.tx_buffer.push(byte);
        if self.tx_buffer.len() >= self.capacity() {
            if let Err(err) = self.flush(mesh) {
                debug!("deferred flush after full buffer: {err}");
            }
        }
        Ok(())
    }

    /// Append a run of bytes to the outbound stream.
    pub fn write_all(&mut self, mesh: &mut dyn MeshTransport, bytes: &[u8]) -> Result<(), StreamError> {
        for &b in bytes {
            self.write(mesh, b)?;
        }
        Ok(())
    }

    /// Emit the buffered bytes as one framed datagram.
    ///
    /// On a mesh send failure neither the buffer nor the sequence number
    /// advances, so the exact same frame is retried on the next attempt.
    pub fn flush(&mut self, mesh: &mut dyn MeshTransport) -> Result<(), StreamError> {
        if self.tx_buffer.is_empty() {
            return Ok(());
        }
        let payload = self.framer.encode(self.next_tx_seq, &self.tx_buffer);
        mesh.send_packet(MeshPacket::new(self.destination, DATA_PORT, payload.to_vec()))?;
        self.next_tx_seq = self.next_tx_seq.wrapping_add(1);
        self.tx_buffer.clear();
        Ok(())
    }

    /// Offer one received datagram payload to the stream.
    ///
    /// Returns whether the frame was accepted. The first accepted frame
    /// locks a still-broadcast destination onto its source, so replies
    /// travel unicast to the actual peer.
    pub fn push_datagram(&mut self, src: NodeId, payload: &[u8]) -> bool {
        let (seq, data) = match self.framer.decode(payload) {
            Ok(frame) => frame,
            Err(err) => {
                debug!("dropping datagram from {src}: {err}");
                return false;
            }
        };
        if self.rx_pos < self.rx_buffer.len() {
            debug!("dropping frame {seq} from {src}: receive buffer still unread");
            return false;
        }
        match seq.cmp(&self.expected_rx_seq) {
            Ordering::Less => {
                debug!(
                    "dropping stale frame {seq} from {src} (expecting {})",
                    self.expected_rx_seq
                );
                false
            }
            Ordering::Greater => {
                // Packet loss. Drop this frame's bytes but resynchronize
                // past the gap, so later frames still reach the protocol
                // layer; the hole surfaces there as a CRC failure or a
                // stalled subpacket and triggers a ZRPOS resend from the
                // last good file offset.
                debug!(
                    "sequence gap: got {seq} from {src}, expecting {}",
                    self.expected_rx_seq
                );
                self.expected_rx_seq = seq.wrapping_add(1);
                false
            }
            Ordering::Equal => {
                if data.len() > self.capacity() {
                    debug!("dropping oversized frame {seq} ({} bytes)", data.len());
                    return false;
                }
                self.rx_buffer.clear();
                self.rx_buffer.extend_from_slice(data);
                self.rx_pos = 0;
                self.expected_rx_seq = self.expected_rx_seq.wrapping_add(1);
                if self.destination.is_broadcast() {
                    debug!("locking stream destination onto {src}");
                    self.destination = src;
                }
                true
            }
        }
    }

    /// Unread bytes in the receive buffer. Never touches the mesh.
    pub fn available(&self) -> usize {
        self.rx_buffer.len() - self.rx_pos
    }

    /// Consume one received byte.
    pub fn read_byte(&mut self) -> Option<u8> {
        let b = *self.rx_buffer.get(self.rx_pos)?;
        self.rx_pos += 1;
        Some(b)
    }

    /// Next received byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.rx_buffer.get(self.rx_pos).copied()
    }

    /// Restore the initial state for a new transfer.
    pub fn reset(&mut self) {
        self.next_tx_seq = 0;
        self.expected_rx_seq = 0;
        self.tx_buffer.clear();
        self.rx_buffer.clear();
        self.rx_pos = 0;
        self.destination = NodeId::BROADCAST;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mesh double that records sends and can be told to fail.
    #[derive(Default)]
    struct MockMesh {
        sent: Vec<MeshPacket>,
        fail: bool,
    }

    impl MeshTransport for MockMesh {
        fn send_packet(&mut self, packet: MeshPacket) -> Result<(), StreamError> {
            if self.fail {
                return Err(StreamError::Send("radio busy".into()));
            }
            self.sent.push(packet);
            Ok(())
        }
    }

    const MAX: usize = 32;

    fn stream() -> PacketStream {
        let mut s = PacketStream::new(0xFF, MAX);
        s.set_destination(NodeId(2));
        s
    }

    #[test]
    fn fills_and_cuts_frames() {
        let mut mesh = MockMesh::default();
        let mut s = stream();
        // Two full frames plus a partial one
        let data: Vec<u8> = (0..70).collect();
        s.write_all(&mut mesh, &data).unwrap();
        assert_eq!(mesh.sent.len(), 2);
        s.flush(&mut mesh).unwrap();
        assert_eq!(mesh.sent.len(), 3);

        // Sequence numbers are gapless and the stream reassembles
        let mut seen = Vec::new();
        for (i, p) in mesh.sent.iter().enumerate() {
            let (seq, bytes) = Framer::new(0xFF).decode(&p.payload).unwrap();
            assert_eq!(seq as usize, i);
            assert_eq!(p.dest, NodeId(2));
            assert_eq!(p.port, DATA_PORT);
            seen.extend_from_slice(bytes);
        }
        assert_eq!(seen, data);
    }

    #[test]
    fn failed_send_keeps_frame_and_sequence() {
        let mut mesh = MockMesh::default();
        let mut s = stream();
        s.write_all(&mut mesh, b"hold these").unwrap();

        mesh.fail = true;
        assert!(s.flush(&mut mesh).is_err());
        assert!(s.has_pending_tx());
        assert_eq!(s.next_tx_seq(), 0);

        mesh.fail = false;
        s.flush(&mut mesh).unwrap();
        assert_eq!(s.next_tx_seq(), 1);
        let (seq, bytes) = Framer::new(0xFF).decode(&mesh.sent[0].payload).unwrap();
        assert_eq!(seq, 0);
        assert_eq!(bytes, b"hold these");
    }

    #[test]
    fn exact_match_accepts_in_order_only() {
        let framer = Framer::new(0xFF);
        let mut s = stream();
        let src = NodeId(9);

        assert!(s.push_datagram(src, &framer.encode(0, b"one")));
        assert_eq!(s.available(), 3);
        // Buffer unread: everything else is dropped
        assert!(!s.push_datagram(src, &framer.encode(1, b"two")));
        while s.read_byte().is_some() {}

        // Duplicate of an old frame
        assert!(!s.push_datagram(src, &framer.encode(0, b"one")));
        // The expected frame
        assert!(s.push_datagram(src, &framer.encode(1, b"two")));
        assert_eq!(s.expected_rx_seq(), 2);
    }

    #[test]
    fn gap_drops_frame_but_resynchronizes() {
        let framer = Framer::new(0xFF);
        let mut s = stream();
        let src = NodeId(9);

        assert!(s.push_datagram(src, &framer.encode(0, b"zero")));
        while s.read_byte().is_some() {}

        // Frame 1 was lost; frame 2 arrives as a gap and is dropped,
        // but the stream resynchronizes so frame 3 gets through.
        assert!(!s.push_datagram(src, &framer.encode(2, b"two")));
        assert_eq!(s.available(), 0);
        assert_eq!(s.expected_rx_seq(), 3);
        // The stale original of frame 1 arrives late and is dropped too
        assert!(!s.push_datagram(src, &framer.encode(1, b"one")));
        assert!(s.push_datagram(src, &framer.encode(3, b"three")));
        assert_eq!(s.available(), 5);
    }

    #[test]
    fn unframeable_datagrams_dropped() {
        let mut s = stream();
        assert!(!s.push_datagram(NodeId(9), &[0xFF]));
        assert!(!s.push_datagram(NodeId(9), &[0xAA, 0x00, 0x00, 0x01]));
        assert_eq!(s.expected_rx_seq(), 0);
    }

    #[test]
    fn broadcast_destination_locks_onto_sender() {
        let framer = Framer::new(0xFF);
        let mut s = PacketStream::new(0xFF, MAX);
        assert!(s.destination().is_broadcast());
        assert!(s.push_datagram(NodeId(0x1234), &framer.encode(0, b"hi")));
        assert_eq!(s.destination(), NodeId(0x1234));
        // A later frame from elsewhere does not steal the lock
        while s.read_byte().is_some() {}
        assert!(s.push_datagram(NodeId(0x9999), &framer.encode(1, b"yo")));
        assert_eq!(s.destination(), NodeId(0x1234));
    }

    #[test]
    fn read_and_peek() {
        let framer = Framer::new(0xFF);
        let mut s = stream();
        s.push_datagram(NodeId(9), &framer.encode(0, b"ab"));
        assert_eq!(s.peek(), Some(b'a'));
        assert_eq!(s.read_byte(), Some(b'a'));
        assert_eq!(s.read_byte(), Some(b'b'));
        assert_eq!(s.read_byte(), None);
        assert_eq!(s.available(), 0);
    }

    #[test]
    fn reset_restores_initial_state() {
        let framer = Framer::new(0xFF);
        let mut mesh = MockMesh::default();
        let mut s = stream();
        s.write_all(&mut mesh, b"x").unwrap();
        s.push_datagram(NodeId(9), &framer.encode(0, b"y"));
        s.reset();
        assert_eq!(s.next_tx_seq(), 0);
        assert_eq!(s.expected_rx_seq(), 0);
        assert!(!s.has_pending_tx());
        assert_eq!(s.available(), 0);
        assert!(s.destination().is_broadcast());
    }
}
