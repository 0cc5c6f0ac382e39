use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use anyhow::Result;

use crate::callout::CalloutConfig;
use crate::protocol::BINKP_PORT;

pub const DEFAULT_CONFIG_FILE: &str = "binkpd.toml";

/// Subdirectory of a network directory holding partially received files.
pub const RECEIVE_DIR: &str = "receive";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinkConfig {
    pub system_name: String,
    pub sysop_name: String,
    pub listen_address: String,
    pub data_directory: PathBuf,
    pub auto_create_directories: bool,
    /// Offer and accept CRC-32 file checks
    pub crc: bool,
    /// Offer and accept CRAM-MD5 password exchange
    pub cram_md5: bool,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    /// This system's node number on the network
    pub node: u16,
    /// Spool directory: outbound `s<node>.net` packets, inbound packets, contact.json
    pub directory: PathBuf,
    #[serde(default)]
    pub callouts: Vec<CalloutConfig>,
}

impl NetworkConfig {
    pub fn receive_dir(&self) -> PathBuf {
        self.directory.join(RECEIVE_DIR)
    }

    pub fn contact_path(&self) -> PathBuf {
        self.directory.join("contact.json")
    }

    pub fn callout_for(&self, node: u16) -> Option<&CalloutConfig> {
        self.callouts.iter().find(|c| c.node == node)
    }
}

impl Default for BinkConfig {
    fn default() -> Self {
        Self {
            system_name: "Unnamed BBS".to_string(),
            sysop_name: "Unknown Sysop".to_string(),
            listen_address: format!("0.0.0.0:{}", BINKP_PORT),
            data_directory: PathBuf::from("./data"),
            auto_create_directories: true,
            crc: true,
            cram_md5: true,
            networks: vec![NetworkConfig {
                name: "wwivnet".to_string(),
                node: 1,
                directory: PathBuf::from("./data/wwivnet"),
                callouts: Vec::new(),
            }],
        }
    }
}

impl BinkConfig {
    pub fn load_or_create(config_path: Option<&str>) -> Result<Self> {
        let config_file = config_path.unwrap_or(DEFAULT_CONFIG_FILE);

        if Path::new(config_file).exists() {
            let content = std::fs::read_to_string(config_file)?;
            let config: BinkConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(config_file)?;
            tracing::info!("Wrote default configuration to {}", config_file);
            Ok(config)
        }
    }

    pub fn save(&self, config_path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        if self.auto_create_directories {
            if !self.data_directory.exists() {
                std::fs::create_dir_all(&self.data_directory)?;
                tracing::info!("Created data directory: {:?}", self.data_directory);
            }

            for net in &self.networks {
                let receive = net.receive_dir();
                if !receive.exists() {
                    std::fs::create_dir_all(&receive)?;
                    tracing::info!("Created network directory: {:?}", net.directory);
                }
            }
        }
        Ok(())
    }

    /// Network names compare case-insensitively.
    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.name.eq_ignore_ascii_case(name))
    }

    pub fn callout_for(&self, network: &str, node: u16) -> Option<&CalloutConfig> {
        self.network(network).and_then(|n| n.callout_for(node))
    }

    pub fn net_log_path(&self) -> PathBuf {
        self.data_directory.join("net.log")
    }
}
