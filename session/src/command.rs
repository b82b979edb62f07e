//! Text command surface.
//!
//! Peers start transfers by sending plain-text commands on the command
//! port:
//!
//! ```text
//! SEND:!a1b2c3d4:/path/on/this/node     start sending that file to a1b2c3d4
//! RECV:/path/on/this/node               save the next incoming file there
//! ```
//!
//! Node ids are eight hex digits with an optional leading `!`; paths must
//! be absolute. Every command gets a plain-text `OK:` or `Error:` reply
//! back to the requesting node.

use meshmodem_stream::NodeId;
use tracing::info;

use crate::error::SessionError;
use crate::session::TransferSession;

/// A parsed text command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a local file to a peer
    Send {
        /// Destination node
        dest: NodeId,
        /// Absolute path of the file to send
        path: String,
    },
    /// Save the next incoming file locally
    Recv {
        /// Absolute path to write
        path: String,
    },
}

/// Parse one command line.
pub fn parse(text: &str) -> Result<Command, SessionError> {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("SEND:") {
        let (node, path) = rest
            .split_once(':')
            .ok_or_else(|| invalid("SEND needs a destination and a path"))?;
        let dest = parse_node_id(node)
            .ok_or_else(|| invalid(&format!("bad destination \"{node}\"")))?;
        Ok(Command::Send {
            dest,
            path: check_path(path)?,
        })
    } else if let Some(path) = text.strip_prefix("RECV:") {
        Ok(Command::Recv {
            path: check_path(path)?,
        })
    } else {
        Err(invalid(&format!("unknown command \"{text}\"")))
    }
}

/// Parse an eight-hex-digit node id with an optional leading `!`.
pub fn parse_node_id(text: &str) -> Option<NodeId> {
    let digits = text.strip_prefix('!').unwrap_or(text);
    if digits.len() != 8 {
        return None;
    }
    u32::from_str_radix(digits, 16).ok().map(NodeId)
}

/// Handle a command received from `from`: parse, dispatch, reply.
/// Returns the reply text for callers that want it.
pub fn handle(session: &mut TransferSession, from: NodeId, text: &str) -> String {
    info!("command from {from}: {text:?}");
    let reply = match parse(text) {
        Ok(Command::Send { dest, path }) => match session.start_send(&path, dest) {
            Ok(()) => format!("OK: sending {path} to {dest}"),
            Err(err) => format!("Error: {err}"),
        },
        Ok(Command::Recv { path }) => match session.start_receive(&path) {
            Ok(()) => format!("OK: receiving into {path}, waiting for sender"),
            Err(err) => format!("Error: {err}"),
        },
        Err(err) => format!("Error: {err}"),
    };
    session.send_text(from, &reply);
    reply
}

fn check_path(path: &str) -> Result<String, SessionError> {
    if path.starts_with('/') {
        Ok(path.to_string())
    } else {
        Err(invalid(&format!("path \"{path}\" must start with '/'")))
    }
}

fn invalid(reason: &str) -> SessionError {
    SessionError::InvalidRequest(reason.to_string())
}
