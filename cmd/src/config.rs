//! Node configuration loading.
//!
//! Defaults, overlaid by an optional YAML file, overlaid by environment
//! variables. Transfer tunables nest under `transfer:` and map straight
//! onto [`TransferConfig`].

use anyhow::Result;
use meshmodem_session::TransferConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Static peer table entry mapping a node id to a UDP address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Node id, eight hex digits with optional leading `!`
    pub node: String,
    /// UDP address, `host:port`
    pub addr: String,
}

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's id, eight hex digits with optional leading `!`
    pub node_id: String,
    /// UDP bind address for the mesh stand-in
    pub bind: String,
    /// Known peers
    pub peers: Vec<PeerEntry>,
    /// Transfer protocol tunables
    pub transfer: TransferConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "!00000001".to_string(),
            bind: "0.0.0.0:4403".to_string(),
            peers: Vec::new(),
            transfer: TransferConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from `path`, falling back to defaults when the
    /// file is missing or unparsable, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::default();
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_yaml::from_str::<NodeConfig>(&content) {
                Ok(loaded) => {
                    config = loaded;
                    info!("loaded configuration from {:?}", path.as_ref());
                }
                Err(err) => {
                    warn!(
                        "failed to parse {:?} ({err}), using defaults",
                        path.as_ref()
                    );
                }
            },
            Err(_) => {
                info!("no config file at {:?}, using defaults", path.as_ref());
            }
        }
        config.apply_environment_overrides();
        Ok(config)
    }

    fn apply_environment_overrides(&mut self) {
        if let Ok(node_id) = std::env::var("MESHMODEM_NODE_ID") {
            info!("node id overridden by environment: {node_id}");
            self.node_id = node_id;
        }
        if let Ok(bind) = std::env::var("MESHMODEM_BIND") {
            info!("bind address overridden by environment: {bind}");
            self.bind = bind;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.node_id, "!00000001");
        assert_eq!(config.bind, "0.0.0.0:4403");
        assert!(config.peers.is_empty());
        assert_eq!(config.transfer.max_packet_size, 230);
    }

    #[test]
    fn load_from_file() {
        let yaml = r#"
node_id: "!00c0ffee"
bind: "127.0.0.1:9999"
peers:
  - node: "!0000beef"
    addr: "10.0.0.2:4403"
transfer:
  timeout_ms: 45000
  max_packet_size: 200
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.node_id, "!00c0ffee");
        assert_eq!(config.bind, "127.0.0.1:9999");
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.transfer.timeout_ms, 45_000);
        assert_eq!(config.transfer.max_packet_size, 200);
        // Unlisted tunables keep their defaults
        assert_eq!(config.transfer.packet_identifier, 0xFF);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = NodeConfig::load("/definitely/not/here.yaml").unwrap();
        assert_eq!(config.bind, "0.0.0.0:4403");
    }
}
