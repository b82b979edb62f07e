//! Role dispatch over the two state machines.

use meshmodem_stream::{MeshTransport, NodeId};
use meshmodem_wire::consts::{ZCAN, ZDLE};
use std::io;

use crate::config::TransferConfig;
use crate::error::SessionError;
use crate::receiver::Receiver;
use crate::sender::Sender;

/// Cancel sequence emitted on abort.
const CANCEL_SEQUENCE: [u8; 8] = [ZDLE, ZCAN, ZDLE, ZCAN, ZDLE, ZCAN, ZDLE, ZCAN];

/// Result of one engine tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    /// Transfer still in flight
    Active,
    /// Protocol ran to completion and all bytes left the node
    Finished,
}

pub(crate) enum Engine {
    Sender(Sender),
    Receiver(Receiver),
}

impl Engine {
    pub fn poll(
        &mut self,
        mesh: &mut dyn MeshTransport,
        config: &TransferConfig,
    ) -> Result<Status, SessionError> {
        match self {
            Engine::Sender(sender) => sender.poll(mesh, config),
            Engine::Receiver(receiver) => receiver.poll(mesh, config),
        }
    }

    pub fn push_datagram(&mut self, src: NodeId, payload: &[u8]) {
        match self {
            Engine::Sender(sender) => sender.push_datagram(src, payload),
            Engine::Receiver(receiver) => receiver.push_datagram(src, payload),
        }
    }

    pub fn bytes_transferred(&self) -> u64 {
        match self {
            Engine::Sender(sender) => sender.bytes_transferred(),
            Engine::Receiver(receiver) => receiver.bytes_transferred(),
        }
    }

    pub fn total_size(&self) -> Option<u64> {
        match self {
            Engine::Sender(sender) => Some(sender.total_size()),
            Engine::Receiver(receiver) => receiver.total_size(),
        }
    }

    pub fn remote_name(&self) -> Option<&str> {
        match self {
            Engine::Sender(_) => None,
            Engine::Receiver(receiver) => receiver.remote_name(),
        }
    }

    /// Fire the cancel sequence at the peer, best effort.
    pub fn abort(&mut self, mesh: &mut dyn MeshTransport) {
        let link = match self {
            Engine::Sender(sender) => sender.link_mut(),
            Engine::Receiver(receiver) => receiver.link_mut(),
        };
        link.queue(&CANCEL_SEQUENCE);
        link.drive(mesh);
    }

    pub fn flush_file(&mut self) -> io::Result<()> {
        match self {
            Engine::Sender(sender) => sender.file_mut().flush(),
            Engine::Receiver(receiver) => receiver.file_mut().flush(),
        }
    }
}
