//! Address Book Configuration
//!
//! Parameters for bootstrapping an address book from seed peers.
//! Loaded from TOML, with CLI overrides applied through the builder methods.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::Network;

/// Bootstrap configuration for an address book
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressBookConfig {
    /// Network the crawler is pointed at
    pub network: Network,

    /// Initial peers, as `host:port` text
    pub seed_peers: Vec<String>,

    /// Peers that must be known before bootstrap is considered done
    pub min_peers: usize,

    /// How long to wait for `min_peers` before giving up (seconds)
    pub bootstrap_timeout_secs: u64,

    /// Maximum addresses to hand out from one shuffled listing
    pub max_addresses_per_listing: usize,
}

impl Default for AddressBookConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            seed_peers: vec![],
            min_peers: 1,
            bootstrap_timeout_secs: 30,
            max_addresses_per_listing: 25,
        }
    }
}

impl AddressBookConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // Builder-style methods for CLI overrides

    pub fn with_seed_peers(mut self, peers: Vec<String>) -> Self {
        if !peers.is_empty() {
            self.seed_peers = peers;
        }
        self
    }

    pub fn with_min_peers(mut self, min_peers: Option<usize>) -> Self {
        if let Some(n) = min_peers {
            self.min_peers = n;
        }
        self
    }

    pub fn with_bootstrap_timeout(mut self, secs: Option<u64>) -> Self {
        if let Some(secs) = secs {
            self.bootstrap_timeout_secs = secs;
        }
        self
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bootstrap_timeout_secs == 0 {
            anyhow::bail!("bootstrap_timeout_secs must be greater than zero");
        }

        if self.min_peers > self.seed_peers.len() && !self.seed_peers.is_empty() {
            anyhow::bail!(
                "min_peers ({}) exceeds the number of seed peers ({})",
                self.min_peers,
                self.seed_peers.len()
            );
        }

        if self.max_addresses_per_listing == 0 {
            anyhow::bail!("max_addresses_per_listing must be greater than zero");
        }

        Ok(())
    }
}
