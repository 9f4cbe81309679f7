use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

use crate::inventory::{DeviceClass, HostInterface, Snapshot};
use crate::topology::Topology;
use crate::types::InterfaceCandidate;

/// Selection policy of a network attachment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Address-space order
    #[default]
    #[serde(alias = "none", alias = "")]
    None,
    /// Cheapest interfaces first
    #[serde(alias = "costOpt")]
    CostOpt,
    /// Highest bandwidth first
    #[serde(alias = "perfOpt")]
    PerfOpt,
    /// Only interfaces of a device class
    #[serde(alias = "devClass")]
    DevClass,
    /// Nearest NUMA node to the pod's accelerators first
    #[serde(alias = "topology")]
    Topology,
}

/// Inputs shared by every strategy
pub struct RankContext<'a> {
    pub snapshot: &'a Snapshot,
    pub topology: &'a Topology,
    pub host: &'a str,
    /// Device class for [`Strategy::DevClass`]
    pub dev_class: Option<&'a DeviceClass>,
    /// NUMA nodes of the accelerators already assigned to the pod
    pub accelerator_nodes: &'a [u32],
}

impl RankContext<'_> {
    fn interface(&self, candidate: &InterfaceCandidate) -> Option<&HostInterface> {
        self.snapshot.interface_by_name(self.host, &candidate.interface)
    }

    fn numa_distance(&self, candidate: &InterfaceCandidate) -> u32 {
        candidate
            .numa_node
            .and_then(|node| self.topology.nearest(node, self.accelerator_nodes))
            .unwrap_or(u32::MAX)
    }
}

impl Strategy {
    /// Rank candidates and keep the best `count`
    pub fn rank_and_pick(
        self,
        candidates: Vec<InterfaceCandidate>,
        count: usize,
        ctx: &RankContext<'_>,
    ) -> Vec<InterfaceCandidate> {
        let ranked: Vec<InterfaceCandidate> = match self {
            Strategy::None => by_address_space(candidates),
            Strategy::CostOpt => candidates
                .into_iter()
                .sorted_by_key(|c| {
                    let cost = ctx.interface(c).and_then(|iface| iface.cost);
                    (cost.unwrap_or(u32::MAX), c.address_space.clone())
                })
                .collect(),
            Strategy::PerfOpt => candidates
                .into_iter()
                .sorted_by_key(|c| {
                    let bandwidth = ctx.interface(c).and_then(|iface| iface.bandwidth_mbps);
                    (Reverse(bandwidth.unwrap_or(0)), c.address_space.clone())
                })
                .collect(),
            Strategy::DevClass => {
                let filtered = candidates
                    .into_iter()
                    .filter(|c| match (ctx.dev_class, ctx.interface(c)) {
                        (Some(class), Some(iface)) => class.matches(iface),
                        _ => false,
                    })
                    .collect();
                by_address_space(filtered)
            }
            Strategy::Topology => candidates
                .into_iter()
                .sorted_by_key(|c| (ctx.numa_distance(c), c.address_space.clone()))
                .collect(),
        };

        ranked.into_iter().take(count).collect()
    }
}

fn by_address_space(candidates: Vec<InterfaceCandidate>) -> Vec<InterfaceCandidate> {
    candidates
        .into_iter()
        .sorted_by(|a, b| a.address_space.cmp(&b.address_space))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(space: &str, iface: &str) -> InterfaceCandidate {
        InterfaceCandidate {
            address_space: space.to_string(),
            interface: iface.to_string(),
            handle: None,
            numa_node: None,
        }
    }

    #[test]
    fn strategy_names_accept_both_spellings() {
        let strategy: Strategy = serde_json::from_str("\"CostOpt\"").unwrap();
        assert_eq!(strategy, Strategy::CostOpt);
        let strategy: Strategy = serde_json::from_str("\"topology\"").unwrap();
        assert_eq!(strategy, Strategy::Topology);
    }

    #[test]
    fn default_orders_by_address_space() {
        let snapshot = Snapshot::default();
        let topology = Topology::default();
        let ctx = RankContext {
            snapshot: &snapshot,
            topology: &topology,
            host: "node-1",
            dev_class: None,
            accelerator_nodes: &[],
        };
        let picked = Strategy::None.rank_and_pick(
            vec![candidate("10.0.2.0/24", "eth2"), candidate("10.0.1.0/24", "eth1")],
            1,
            &ctx,
        );
        assert_eq!(picked, vec![candidate("10.0.1.0/24", "eth1")]);
    }
}
