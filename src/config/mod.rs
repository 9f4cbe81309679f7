use anyhow::{Context, Result};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AllocError;

mod netconf;

pub use netconf::{
    AttachmentTemplate, ChainDocument, ChainTemplate, PluginDescriptor, PluginTemplate,
    MULTI_NIC_IPAM_TYPE,
};

/// Configuration for the multi-NIC daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DaemonConfig {
    /// Address the RPC server listens on
    pub listen: String,
    /// JSON inventory snapshot maintained by the controller
    pub inventory_path: PathBuf,
    /// Static NUMA topology description
    pub topology_path: Option<PathBuf>,
    /// Inventory reload period
    pub refresh_interval_secs: u64,
    /// Deadline applied when a request carries none
    pub request_timeout_ms: u64,
    /// Resource name of the accelerators used for NUMA-aware selection
    pub accelerator_resource: String,
    /// Address pools, one per address space
    pub pools: Vec<PoolConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:11000".to_string(),
            inventory_path: PathBuf::from("/var/lib/multi-nic/inventory.json"),
            topology_path: None,
            refresh_interval_secs: 600,
            request_timeout_ms: 10_000,
            accelerator_resource: "nvidia.com/gpu".to_string(),
            pools: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&bytes)
    }

    /// Parse configuration from bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let config: DaemonConfig =
            serde_json::from_slice(bytes).context("Failed to parse daemon configuration")?;

        if config.refresh_interval_secs == 0 {
            anyhow::bail!("refreshIntervalSecs must be greater than zero");
        }
        for pool in &config.pools {
            pool.network()?;
        }

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Address pool of one address space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Address space identifier (host network CIDR)
    pub address_space: String,
    /// Pod address CIDR
    pub subnet: String,
    /// Bits reserved per host
    pub host_block: u8,
    /// Bits reserved per interface within a host block
    pub interface_block: u8,
    /// CIDRs never handed out
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,
}

impl PoolConfig {
    /// Parsed subnet, checked to leave room for the host and interface blocks
    pub fn network(&self) -> Result<Ipv4Network, AllocError> {
        let invalid = |reason: String| AllocError::InvalidPool {
            address_space: self.address_space.clone(),
            reason,
        };

        let network: Ipv4Network = self
            .subnet
            .parse()
            .map_err(|e| invalid(format!("subnet {}: {}", self.subnet, e)))?;

        let prefix = u32::from(network.prefix())
            + u32::from(self.host_block)
            + u32::from(self.interface_block);
        if prefix >= 32 {
            return Err(invalid(format!(
                "/{} with {} host and {} interface bits leaves no addresses",
                network.prefix(),
                self.host_block,
                self.interface_block
            )));
        }

        Ok(network)
    }

    pub fn exclude_networks(&self) -> Result<Vec<Ipv4Network>, AllocError> {
        self.excludes
            .iter()
            .map(|cidr| {
                cidr.parse().map_err(|e| AllocError::InvalidPool {
                    address_space: self.address_space.clone(),
                    reason: format!("exclude {}: {}", cidr, e),
                })
            })
            .collect()
    }
}
