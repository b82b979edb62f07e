//! Mesh file-transfer node binary.
//!
//! Runs one transfer session over a UDP stand-in for the mesh radio.
//! With `--send-file`/`--recv-file` the node performs a single transfer
//! and exits; otherwise it idles and obeys `SEND:`/`RECV:` text commands
//! arriving on the command port.

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use meshmodem_session::{command, StdFileStore, TransferSession, TransferState};
use meshmodem_stream::{NodeId, COMMAND_PORT, DATA_PORT};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;
mod udp;

use config::NodeConfig;
use udp::UdpMesh;

/// Mesh file-transfer node
#[derive(Parser, Debug)]
#[command(name = "meshmodem", version, about = "ZModem file transfer over a datagram mesh")]
struct Args {
    /// Node id, eight hex digits with optional leading '!'
    #[arg(long)]
    node_id: Option<String>,

    /// UDP bind address for the mesh stand-in, e.g. 0.0.0.0:4403
    #[arg(long)]
    bind: Option<String>,

    /// Static peer route, repeatable: <nodeid>=<host:port>
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Send this file to --dest and exit
    #[arg(long, requires = "dest")]
    send_file: Option<String>,

    /// Destination node for --send-file
    #[arg(long)]
    dest: Option<String>,

    /// Save the next incoming file at this path and exit
    #[arg(long, conflicts_with = "send_file")]
    recv_file: Option<String>,

    /// Main loop cadence, e.g. 10ms
    #[arg(long, default_value = "10ms")]
    poll_interval: humantime::Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "meshmodem.yaml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("meshmodem={}", args.log_level).parse()?)
        .add_directive(format!("meshmodem_session={}", args.log_level).parse()?)
        .add_directive(format!("meshmodem_stream={}", args.log_level).parse()?)
        .add_directive(format!("meshmodem_wire={}", args.log_level).parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!("starting meshmodem v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::load(&args.config)?;
    let node_id = parse_node(args.node_id.as_deref().unwrap_or(&config.node_id))?;
    let bind = args.bind.as_deref().unwrap_or(&config.bind);

    let mut peers: HashMap<NodeId, SocketAddr> = HashMap::new();
    for entry in &config.peers {
        peers.insert(parse_node(&entry.node)?, parse_addr(&entry.addr)?);
    }
    for spec in &args.peers {
        let (node, addr) = spec
            .split_once('=')
            .ok_or_else(|| anyhow!("peer \"{spec}\" must look like <nodeid>=<host:port>"))?;
        peers.insert(parse_node(node)?, parse_addr(addr)?);
    }

    let mesh = UdpMesh::bind(node_id, bind, peers)
        .with_context(|| format!("binding mesh socket on {bind}"))?;
    let mut radio = mesh.try_clone()?;
    info!("node {node_id} on {}", mesh.local_addr()?);

    let mut session = TransferSession::new(
        config.transfer.clone(),
        Box::new(mesh),
        Box::new(StdFileStore),
    )?;

    if let Some(path) = &args.send_file {
        let dest = parse_node(
            args.dest
                .as_deref()
                .ok_or_else(|| anyhow!("--dest is required with --send-file"))?,
        )?;
        session.start_send(path, dest)?;
    } else if let Some(path) = &args.recv_file {
        session.start_receive(path)?;
    } else {
        info!("idle; listening for SEND/RECV commands");
    }
    let one_shot = args.send_file.is_some() || args.recv_file.is_some();

    loop {
        while let Some((src, port, payload)) = radio.recv() {
            match port {
                DATA_PORT => session.push_data_packet(src, &payload),
                COMMAND_PORT => {
                    let text = String::from_utf8_lossy(&payload).into_owned();
                    if text.starts_with("OK:") || text.starts_with("Error:") {
                        info!("reply from {src}: {text}");
                    } else {
                        command::handle(&mut session, src, &text);
                    }
                }
                other => debug!("ignoring packet on port {other}"),
            }
        }

        let state = session.poll();
        if one_shot {
            match state {
                TransferState::Complete => {
                    info!(
                        "done: {} ({} bytes)",
                        session.filename(),
                        session.bytes_transferred()
                    );
                    return Ok(());
                }
                TransferState::Error => bail!("transfer failed"),
                _ => {}
            }
        }
        std::thread::sleep(Duration::from(args.poll_interval));
    }
}

fn parse_node(text: &str) -> anyhow::Result<NodeId> {
    command::parse_node_id(text)
        .ok_or_else(|| anyhow!("node id \"{text}\" must be eight hex digits"))
}

fn parse_addr(text: &str) -> anyhow::Result<SocketAddr> {
    text.parse()
        .with_context(|| format!("bad socket address \"{text}\""))
}
