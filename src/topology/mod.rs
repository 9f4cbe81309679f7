//! Static NUMA topology of accelerators and network interfaces.
//!
//! Loaded once at startup. Bus identifiers are compared without their PCI
//! domain and case-insensitively, so `00000000:3B:00.0` and `3b:00.0` name the
//! same device.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    /// Accelerator bus id to NUMA node
    #[serde(default)]
    accelerators: HashMap<String, u32>,
    /// Network interface bus id to NUMA node
    #[serde(default)]
    nics: HashMap<String, u32>,
    /// Node distance matrix, as reported by `numactl -H`
    #[serde(default)]
    distances: Vec<Vec<u32>>,
}

/// Strip the PCI domain and lowercase a bus identifier
pub fn normalize_bus_id(bus_id: &str) -> String {
    let parts: Vec<&str> = bus_id.trim().split(':').collect();
    let tail = if parts.len() > 2 {
        parts[parts.len() - 2..].join(":")
    } else {
        parts.join(":")
    };
    tail.to_ascii_lowercase()
}

impl Topology {
    pub fn new(
        accelerators: HashMap<String, u32>,
        nics: HashMap<String, u32>,
        distances: Vec<Vec<u32>>,
    ) -> Self {
        let normalize = |map: HashMap<String, u32>| {
            map.into_iter()
                .map(|(bus, node)| (normalize_bus_id(&bus), node))
                .collect()
        };
        Self {
            accelerators: normalize(accelerators),
            nics: normalize(nics),
            distances,
        }
    }

    /// Load topology from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read topology file {}", path.display()))?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: Topology =
            serde_json::from_slice(bytes).context("Failed to parse NUMA topology")?;
        Ok(Self::new(raw.accelerators, raw.nics, raw.distances))
    }

    pub fn is_empty(&self) -> bool {
        self.accelerators.is_empty() && self.nics.is_empty()
    }

    pub fn accelerator_node(&self, bus_id: &str) -> Option<u32> {
        self.accelerators.get(&normalize_bus_id(bus_id)).copied()
    }

    pub fn nic_node(&self, bus_id: &str) -> Option<u32> {
        self.nics.get(&normalize_bus_id(bus_id)).copied()
    }

    /// Distance between two nodes; without a matrix, 0 on the same node and 1 otherwise
    pub fn distance(&self, from: u32, to: u32) -> u32 {
        self.distances
            .get(from as usize)
            .and_then(|row| row.get(to as usize))
            .copied()
            .unwrap_or(if from == to { 0 } else { 1 })
    }

    /// Smallest distance from `node` to any of `targets`
    pub fn nearest(&self, node: u32, targets: &[u32]) -> Option<u32> {
        targets.iter().map(|target| self.distance(node, *target)).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_ids_compare_without_domain() {
        assert_eq!(normalize_bus_id("00000000:3B:00.0"), "3b:00.0");
        assert_eq!(normalize_bus_id("0000:3b:00.0"), "3b:00.0");
        assert_eq!(normalize_bus_id("3B:00.0"), "3b:00.0");
    }

    #[test]
    fn distance_falls_back_without_matrix() {
        let topology = Topology::default();
        assert_eq!(topology.distance(1, 1), 0);
        assert_eq!(topology.distance(0, 1), 1);

        let topology = Topology::new(HashMap::new(), HashMap::new(), vec![vec![10, 21], vec![21, 10]]);
        assert_eq!(topology.distance(0, 1), 21);
        assert_eq!(topology.nearest(1, &[0, 1]), Some(10));
        assert_eq!(topology.nearest(1, &[]), None);
    }
}
