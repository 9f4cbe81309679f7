//! Host interface selection for a placement request.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::inventory::Snapshot;
use crate::topology::Topology;
use crate::types::{Binding, InterfaceCandidate, PlacementRequest, PlacementResult, SelectedNic};

mod strategy;

pub use strategy::{RankContext, Strategy};

/// Selects host interfaces against one inventory snapshot
pub struct NicSelector<'a> {
    snapshot: &'a Snapshot,
    topology: &'a Topology,
    accelerator_resource: &'a str,
}

impl<'a> NicSelector<'a> {
    pub fn new(snapshot: &'a Snapshot, topology: &'a Topology, accelerator_resource: &'a str) -> Self {
        Self {
            snapshot,
            topology,
            accelerator_resource,
        }
    }

    /// Pick interfaces for `req`. A short or empty result means the request
    /// could only be partly satisfied.
    pub fn select(&self, req: &PlacementRequest) -> PlacementResult {
        let host = req.pod.host.as_str();
        let pod = req.pod.key();
        let policy = self.snapshot.policy(&req.attachment);

        let pod_handles: &[String] = match policy.resource_name.as_deref() {
            Some(resource) => self.snapshot.pod_devices(&pod, resource),
            None => &[],
        };
        let device_map = self.snapshot.device_map(host, pod_handles);
        debug!("device map of {}: {:?}", pod, device_map);

        let candidates = self.candidates(req, &device_map);
        let count = match req.args.num_of_interfaces {
            0 => candidates.len(),
            n => n,
        };

        let dev_class_name = req.args.dev_class.as_deref().or(policy.target.as_deref());
        let dev_class = dev_class_name.and_then(|name| self.snapshot.device_class(name));
        let accelerator_nodes = self.accelerator_nodes(req);
        let ctx = RankContext {
            snapshot: self.snapshot,
            topology: self.topology,
            host,
            dev_class,
            accelerator_nodes: &accelerator_nodes,
        };

        let picked = policy.strategy.rank_and_pick(candidates, count, &ctx);

        let matched = picked.iter().any(|candidate| {
            candidate
                .handle
                .as_ref()
                .is_some_and(|handle| pod_handles.contains(handle))
        });
        if !pod_handles.is_empty() && !matched {
            info!(
                "devices {:?} of {} not visible on {}, deferring interface binding",
                pod_handles, pod, host
            );
            return PlacementResult::deferred(pod_handles);
        }

        let result = PlacementResult::new(
            picked
                .into_iter()
                .map(|candidate| SelectedNic {
                    binding: Binding::Bound(candidate.interface),
                    handle: candidate.handle,
                })
                .collect(),
        );
        info!(
            "selected {:?} for {} on {} ({:?}, {} requested)",
            result.names(),
            pod,
            host,
            policy.strategy,
            count
        );
        result
    }

    /// Interfaces on the pod's host that serve the requested address spaces,
    /// limited to the spaces holding the pod's devices when it has any
    fn candidates(
        &self,
        req: &PlacementRequest,
        device_map: &HashMap<String, String>,
    ) -> Vec<InterfaceCandidate> {
        let host = req.pod.host.as_str();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for space in &req.address_spaces {
            if !seen.insert(space.as_str()) {
                continue;
            }
            if !device_map.is_empty() && !device_map.contains_key(space) {
                continue;
            }
            let Some(iface) = self.snapshot.interface_in_space(host, space) else {
                continue;
            };
            if !req.args.interface_names.is_empty()
                && !req.args.interface_names.contains(&iface.name)
            {
                continue;
            }

            let handle = device_map
                .get(space)
                .cloned()
                .or_else(|| iface.pci_address.clone());
            let numa_node = iface
                .pci_address
                .as_deref()
                .and_then(|pci| self.topology.nic_node(pci));

            candidates.push(InterfaceCandidate {
                address_space: space.clone(),
                interface: iface.name.clone(),
                handle,
                numa_node,
            });
        }

        candidates
    }

    fn accelerator_nodes(&self, req: &PlacementRequest) -> Vec<u32> {
        self.snapshot
            .pod_devices(&req.pod.key(), self.accelerator_resource)
            .iter()
            .filter_map(|device| {
                let bus_id = self.snapshot.bus_id(device);
                self.topology.accelerator_node(&bus_id)
            })
            .collect()
    }
}
