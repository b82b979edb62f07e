//! UDP stand-in for the mesh radio.
//!
//! Real deployments push datagrams in from a radio interface; for bench
//! testing and two-node setups this module fakes one over UDP. Each UDP
//! datagram carries a six-byte envelope in front of the mesh payload:
//!
//! ```text
//! src node id (u32 BE) | port (u16 BE) | payload
//! ```
//!
//! Broadcast sends fan out to every configured peer. Hop limits are
//! meaningless point-to-point and ignored here.

use meshmodem_stream::{MeshPacket, MeshTransport, NodeId, StreamError};
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use tracing::{debug, warn};

const ENVELOPE_LEN: usize = 6;

/// Mesh transport over a nonblocking UDP socket.
pub struct UdpMesh {
    socket: UdpSocket,
    local: NodeId,
    peers: HashMap<NodeId, SocketAddr>,
}

impl UdpMesh {
    /// Bind to `bind` and address packets per the peer table.
    pub fn bind(local: NodeId, bind: &str, peers: HashMap<NodeId, SocketAddr>) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            local,
            peers,
        })
    }

    /// A second handle on the same socket, for the receive side of the
    /// main loop while the session owns the send side.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            socket: self.socket.try_clone()?,
            local: self.local,
            peers: self.peers.clone(),
        })
    }

    /// Local socket address, useful when bound to port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Add a peer mapping.
    pub fn add_peer(&mut self, node: NodeId, addr: SocketAddr) {
        self.peers.insert(node, addr);
    }

    /// Pull the next datagram, if any. Never blocks.
    pub fn recv(&mut self) -> Option<(NodeId, u16, Vec<u8>)> {
        let mut buf = [0u8; 2048];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if n < ENVELOPE_LEN {
                        debug!("runt datagram from {from}");
                        continue;
                    }
                    let src = NodeId(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]));
                    let port = u16::from_be_bytes([buf[4], buf[5]]);
                    return Some((src, port, buf[ENVELOPE_LEN..n].to_vec()));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return None,
                Err(err) => {
                    warn!("udp receive failed: {err}");
                    return None;
                }
            }
        }
    }

    fn envelope(&self, port: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(ENVELOPE_LEN + payload.len());
        frame.extend_from_slice(&self.local.0.to_be_bytes());
        frame.extend_from_slice(&port.to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }
}

impl MeshTransport for UdpMesh {
    fn send_packet(&mut self, packet: MeshPacket) -> Result<(), StreamError> {
        let frame = self.envelope(packet.port, &packet.payload);
        if packet.dest.is_broadcast() {
            for addr in self.peers.values() {
                self.socket.send_to(&frame, addr)?;
            }
            Ok(())
        } else {
            let addr = self
                .peers
                .get(&packet.dest)
                .ok_or_else(|| StreamError::Send(format!("no route to {}", packet.dest)))?;
            self.socket.send_to(&frame, addr)?;
            Ok(())
        }
    }
}
