//! End-to-end transfer scenarios over an in-process loopback mesh.
//!
//! Two sessions run in the same thread; the harness shuttles datagrams
//! between them, optionally duplicating, dropping or corrupting the
//! sender's data-port traffic to exercise recovery.

use meshmodem_session::{command, MemFileStore, TransferConfig, TransferSession, TransferState};
use meshmodem_stream::{MeshPacket, MeshTransport, NodeId, StreamError, COMMAND_PORT, DATA_PORT};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Mesh double that parks every packet in a shared outbox.
struct RecordingMesh {
    outbox: Rc<RefCell<Vec<MeshPacket>>>,
}

impl MeshTransport for RecordingMesh {
    fn send_packet(&mut self, packet: MeshPacket) -> Result<(), StreamError> {
        self.outbox.borrow_mut().push(packet);
        Ok(())
    }
}

struct Node {
    id: NodeId,
    session: TransferSession,
    store: MemFileStore,
    outbox: Rc<RefCell<Vec<MeshPacket>>>,
    /// Every packet this node ever emitted, for assertions.
    sent: Vec<MeshPacket>,
}

impl Node {
    fn new(id: u32, config: TransferConfig) -> Self {
        let outbox = Rc::new(RefCell::new(Vec::new()));
        let store = MemFileStore::new();
        let mesh = RecordingMesh {
            outbox: Rc::clone(&outbox),
        };
        let session =
            TransferSession::new(config, Box::new(mesh), Box::new(store.clone())).unwrap();
        Self {
            id: NodeId(id),
            session,
            store,
            outbox,
            sent: Vec::new(),
        }
    }

    fn drain(&mut self) -> Vec<MeshPacket> {
        let packets: Vec<MeshPacket> = self.outbox.borrow_mut().drain(..).collect();
        self.sent.extend(packets.iter().cloned());
        packets
    }

    fn data_datagrams(&self) -> Vec<&MeshPacket> {
        self.sent.iter().filter(|p| p.port == DATA_PORT).collect()
    }
}

/// What an impairment does with one data datagram: each returned payload
/// is delivered in order, so `vec![]` drops and two copies duplicate.
type Impairment<'a> = &'a mut dyn FnMut(usize, &MeshPacket) -> Vec<Vec<u8>>;

fn clean() -> impl FnMut(usize, &MeshPacket) -> Vec<Vec<u8>> {
    |_, p: &MeshPacket| vec![p.payload.clone()]
}

/// Run both sessions until they finish or the round budget runs out.
/// Returns whether both ended in `Complete`.
fn run_transfer(
    a: &mut Node,
    b: &mut Node,
    max_rounds: usize,
    deliver_a: Impairment<'_>,
    deliver_b: Impairment<'_>,
) -> bool {
    let mut a_index = 0;
    let mut b_index = 0;
    for _ in 0..max_rounds {
        a.session.poll();
        for packet in a.drain() {
            if packet.port != DATA_PORT {
                continue;
            }
            for payload in deliver_a(a_index, &packet) {
                b.session.push_data_packet(a.id, &payload);
            }
            a_index += 1;
        }
        b.session.poll();
        for packet in b.drain() {
            if packet.port != DATA_PORT {
                continue;
            }
            for payload in deliver_b(b_index, &packet) {
                a.session.push_data_packet(b.id, &payload);
            }
            b_index += 1;
        }
        let done = a.session.state() == TransferState::Complete
            && b.session.state() == TransferState::Complete;
        if done {
            return true;
        }
        if a.session.state() == TransferState::Error || b.session.state() == TransferState::Error {
            return false;
        }
    }
    false
}

fn start_pair(contents: &[u8]) -> (Node, Node) {
    let mut a = Node::new(0x0000_0001, TransferConfig::default());
    let mut b = Node::new(0x0000_0002, TransferConfig::default());
    a.store.insert("/a.txt", contents);
    a.session.start_send("/a.txt", b.id).unwrap();
    b.session.start_receive("/a.txt").unwrap();
    (a, b)
}

/// Sequence numbers of a node's emitted data datagrams must be 0, 1, 2, …
fn assert_gapless_sequences(node: &Node) {
    for (i, packet) in node.data_datagrams().iter().enumerate() {
        let seq = u16::from_be_bytes([packet.payload[1], packet.payload[2]]);
        assert_eq!(seq as usize, i, "datagram {i} out of sequence");
    }
}

#[test]
fn happy_path_tiny_file() {
    let (mut a, mut b) = start_pair(b"hello\n");
    assert!(run_transfer(&mut a, &mut b, 100, &mut clean(), &mut clean()));

    assert_eq!(b.store.contents("/a.txt").unwrap(), b"hello\n");
    assert_eq!(a.session.bytes_transferred(), 6);
    assert_eq!(b.session.bytes_transferred(), 6);
    assert_eq!(b.session.total_size(), 6);
    // At minimum: announce, file info, one data chunk, end-of-file
    assert!(a.data_datagrams().len() >= 4);
    assert_gapless_sequences(&a);
    assert_gapless_sequences(&b);
}

#[test]
fn empty_file() {
    let (mut a, mut b) = start_pair(b"");
    assert!(run_transfer(&mut a, &mut b, 100, &mut clean(), &mut clean()));
    assert_eq!(b.store.contents("/a.txt").unwrap(), b"");
    assert_eq!(b.session.bytes_transferred(), 0);
}

#[test]
fn duplicated_datagrams_are_harmless() {
    let (mut a, mut b) = start_pair(b"hello\n");
    let mut twice_a = |_: usize, p: &MeshPacket| vec![p.payload.clone(), p.payload.clone()];
    let mut twice_b = |_: usize, p: &MeshPacket| vec![p.payload.clone(), p.payload.clone()];
    assert!(run_transfer(&mut a, &mut b, 200, &mut twice_a, &mut twice_b));

    // No double-writes despite every datagram arriving twice
    assert_eq!(b.store.contents("/a.txt").unwrap(), b"hello\n");
    assert_eq!(b.session.bytes_transferred(), 6);
}

#[test]
fn dropped_data_datagram_recovers_by_reposition() {
    let contents: Vec<u8> = (0..1024u32).map(|i| i as u8).collect();
    let (mut a, mut b) = start_pair(&contents);

    // Datagram 0 announces, 1 carries the file info, 2.. carry chunks;
    // losing the third chunk forces a ZRPOS re-request mid-stream.
    let mut drop_one = |index: usize, p: &MeshPacket| {
        if index == 4 {
            vec![]
        } else {
            vec![p.payload.clone()]
        }
    };
    assert!(run_transfer(&mut a, &mut b, 500, &mut drop_one, &mut clean()));

    assert_eq!(b.store.contents("/a.txt").unwrap(), contents);
    assert_eq!(b.session.bytes_transferred(), 1024);
    // A clean 8-chunk run takes 13 datagrams (announce, file info, the
    // chunks, end-of-file, the two finish records); recovery retransmits
    assert!(
        a.data_datagrams().len() > 13,
        "expected the sender to retransmit after the loss"
    );
}

#[test]
fn corrupted_datagram_recovers_by_reposition() {
    let contents: Vec<u8> = (0..1024u32).map(|i| (i * 7) as u8).collect();
    let (mut a, mut b) = start_pair(&contents);

    // Mangle the tail of one mid-stream chunk; the subpacket CRC check
    // must refuse it and re-request the position.
    let mut corrupt = |index: usize, p: &MeshPacket| {
        let mut payload = p.payload.clone();
        if index == 5 {
            let last = payload.len() - 1;
            payload[last] ^= 0xFF;
        }
        vec![payload]
    };
    assert!(run_transfer(&mut a, &mut b, 500, &mut corrupt, &mut clean()));

    assert_eq!(b.store.contents("/a.txt").unwrap(), contents);
    assert_eq!(b.session.bytes_transferred(), 1024);
}

#[test]
fn corrupted_file_info_does_not_stall_handshake() {
    let (mut a, mut b) = start_pair(b"hello\n");

    // Datagram 1 carries the ZFILE announcement plus its name/size
    // subpacket; mangle the subpacket's trailing CRC byte. The
    // announcement is accepted as parsed, so the handshake proceeds
    // without waiting out the sender's retry timer.
    let mut corrupt = |index: usize, p: &MeshPacket| {
        let mut payload = p.payload.clone();
        if index == 1 {
            let last = payload.len() - 1;
            payload[last] ^= 0xFF;
        }
        vec![payload]
    };
    assert!(run_transfer(&mut a, &mut b, 200, &mut corrupt, &mut clean()));

    assert_eq!(b.store.contents("/a.txt").unwrap(), b"hello\n");
    assert_eq!(b.session.total_size(), 6);
    assert_eq!(b.session.bytes_transferred(), 6);
}

#[test]
fn sender_times_out_without_receiver() {
    let config = TransferConfig {
        timeout_ms: 100,
        ..Default::default()
    };
    let mut a = Node::new(0x0000_0001, config);
    a.store.insert("/f", b"stranded");
    a.session.start_send("/f", NodeId(0x0000_0002)).unwrap();

    let started = Instant::now();
    loop {
        let state = a.session.poll();
        a.drain();
        if state == TransferState::Error {
            break;
        }
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "sender never timed out"
        );
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(started.elapsed() >= Duration::from_millis(100));

    // The session is reusable after the failure
    assert!(a.session.start_send("/f", NodeId(0x0000_0002)).is_ok());
}

#[test]
fn abort_is_idempotent_and_cancels_peer() {
    let (mut a, mut b) = start_pair(&[0x42; 4096]);

    // Get the transfer into the data phase
    for _ in 0..4 {
        a.session.poll();
        for packet in a.drain() {
            b.session.push_data_packet(a.id, &packet.payload);
        }
        b.session.poll();
        for packet in b.drain() {
            a.session.push_data_packet(b.id, &packet.payload);
        }
    }
    assert_eq!(a.session.state(), TransferState::Sending);

    a.session.abort();
    assert_eq!(a.session.state(), TransferState::Error);

    // The cancel sequence went out on the data port
    let cancels: Vec<MeshPacket> = a.drain();
    let cancel_frame = cancels
        .iter()
        .find(|p| p.port == DATA_PORT && p.payload[3..] == [0x18, 0x10, 0x18, 0x10, 0x18, 0x10, 0x18, 0x10])
        .expect("no cancel sequence on the data port");

    // A second abort changes nothing and emits nothing
    a.session.abort();
    assert_eq!(a.session.state(), TransferState::Error);
    assert!(a.drain().is_empty());

    // The peer sees the cancel and fails its side
    b.session.push_data_packet(a.id, &cancel_frame.payload);
    b.session.poll();
    assert_eq!(b.session.state(), TransferState::Error);

    // The sender can start over afterwards
    assert!(a.session.start_send("/a.txt", b.id).is_ok());
}

#[test]
fn large_file_transfers_byte_exact() {
    let contents: Vec<u8> = (0..65536u32).map(|i| (i % 251) as u8).collect();
    let (mut a, mut b) = start_pair(&contents);
    assert!(run_transfer(&mut a, &mut b, 5000, &mut clean(), &mut clean()));

    assert_eq!(b.store.contents("/a.txt").unwrap(), contents);
    assert_eq!(a.session.bytes_transferred(), 65536);
    assert_eq!(b.session.bytes_transferred(), 65536);
    assert_gapless_sequences(&a);
    assert_gapless_sequences(&b);
}

#[test]
fn busy_session_rejects_new_transfers() {
    let (mut a, b) = start_pair(b"busy");
    assert!(a.session.start_send("/a.txt", b.id).is_err());
    assert!(a.session.start_receive("/other").is_err());
}

#[test]
fn send_of_missing_file_is_rejected() {
    let mut a = Node::new(0x0000_0001, TransferConfig::default());
    assert!(a
        .session
        .start_send("/does/not/exist", NodeId(0x0000_0002))
        .is_err());
    assert_eq!(a.session.state(), TransferState::Idle);
}

#[test]
fn command_surface_drives_session() {
    let mut a = Node::new(0x0000_0001, TransferConfig::default());
    a.store.insert("/firmware.bin", b"blob");
    let peer = NodeId(0x00C0_FFEE);

    let reply = command::handle(&mut a.session, peer, "SEND:!00c0ffee:/firmware.bin");
    assert!(reply.starts_with("OK:"), "unexpected reply {reply}");
    assert_eq!(a.session.state(), TransferState::Sending);

    // The reply went back to the requester as text on the command port
    let packets = a.drain();
    let reply_packet = packets
        .iter()
        .find(|p| p.port == COMMAND_PORT)
        .expect("no command reply sent");
    assert_eq!(reply_packet.dest, peer);
    assert_eq!(reply_packet.payload, reply.as_bytes());

    // A second command while busy is refused with the state named
    let reply = command::handle(&mut a.session, peer, "RECV:/other");
    assert!(reply.starts_with("Error:"), "unexpected reply {reply}");

    let reply = command::handle(&mut a.session, peer, "FORMAT:/c");
    assert!(reply.starts_with("Error:"));
}
