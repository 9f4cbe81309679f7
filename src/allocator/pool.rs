use ipnetwork::Ipv4Network;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use crate::config::PoolConfig;
use crate::error::AllocError;
use crate::types::{AddressLease, PodIdentity, PodKey};

type LeaseKey = (PodKey, String);

/// Address pool of one address space.
///
/// The subnet `S/p` is cut into `2^hostBlock` host partitions of prefix
/// `p + hostBlock`; each host partition is cut into `2^interfaceBlock`
/// interface blocks. Host and interface slots are handed out first-come and
/// never move, leases are single addresses of an interface block.
#[derive(Debug)]
pub struct Pool {
    address_space: String,
    network: Ipv4Network,
    host_block: u8,
    interface_block: u8,
    excludes: Vec<Ipv4Network>,
    hosts: HashMap<String, u32>,
    interfaces: HashMap<(String, String), u32>,
    leases: HashMap<LeaseKey, AddressLease>,
    used: HashSet<Ipv4Addr>,
}

impl Pool {
    pub fn new(config: &PoolConfig) -> Result<Self, AllocError> {
        Ok(Self {
            address_space: config.address_space.clone(),
            network: config.network()?,
            host_block: config.host_block,
            interface_block: config.interface_block,
            excludes: config.exclude_networks()?,
            hosts: HashMap::new(),
            interfaces: HashMap::new(),
            leases: HashMap::new(),
            used: HashSet::new(),
        })
    }

    pub fn address_space(&self) -> &str {
        &self.address_space
    }

    /// Prefix announced with every lease
    pub fn block_size(&self) -> u8 {
        self.network.prefix()
    }

    fn host_prefix(&self) -> u8 {
        self.network.prefix() + self.host_block
    }

    fn interface_prefix(&self) -> u8 {
        self.host_prefix() + self.interface_block
    }

    fn exhausted(&self, reason: String) -> AllocError {
        AllocError::Exhausted {
            address_space: self.address_space.clone(),
            reason,
        }
    }

    /// Host partition of host slot `slot`
    pub fn host_partition(&self, slot: u32) -> Option<Ipv4Network> {
        subdivide(self.network, self.host_prefix(), slot)
    }

    /// Interface block `interface_slot` of host slot `host_slot`
    pub fn interface_block(&self, host_slot: u32, interface_slot: u32) -> Option<Ipv4Network> {
        let partition = self.host_partition(host_slot)?;
        subdivide(partition, self.interface_prefix(), interface_slot)
    }

    pub fn host_slot_of(&self, host: &str) -> Option<u32> {
        self.hosts.get(host).copied()
    }

    fn host_slot(&mut self, host: &str) -> Result<u32, AllocError> {
        if let Some(slot) = self.hosts.get(host) {
            return Ok(*slot);
        }
        let taken: HashSet<u32> = self.hosts.values().copied().collect();
        let slot = (0..slot_count(self.host_block))
            .find(|slot| !taken.contains(slot))
            .ok_or_else(|| self.exhausted(format!("no free host block for {}", host)))?;
        self.hosts.insert(host.to_string(), slot);
        Ok(slot)
    }

    fn interface_slot(&mut self, host: &str, interface: &str) -> Result<u32, AllocError> {
        let key = (host.to_string(), interface.to_string());
        if let Some(slot) = self.interfaces.get(&key) {
            return Ok(*slot);
        }
        let taken: HashSet<u32> = self
            .interfaces
            .iter()
            .filter(|((h, _), _)| h == host)
            .map(|(_, slot)| *slot)
            .collect();
        let slot = (0..slot_count(self.interface_block))
            .find(|slot| !taken.contains(slot))
            .ok_or_else(|| {
                self.exhausted(format!("no free interface block for {} on {}", interface, host))
            })?;
        self.interfaces.insert(key, slot);
        Ok(slot)
    }

    pub fn lease(&self, pod: &PodKey, interface: &str) -> Option<&AddressLease> {
        self.leases.get(&(pod.clone(), interface.to_string()))
    }

    /// Reserve an address for the pod on `interface`. Returns the existing
    /// lease when there is one; the flag tells whether the lease is new.
    pub fn allocate(
        &mut self,
        pod: &PodIdentity,
        interface: &str,
    ) -> Result<(AddressLease, bool), AllocError> {
        let key = (pod.key(), interface.to_string());
        if let Some(lease) = self.leases.get(&key) {
            return Ok((lease.clone(), false));
        }

        let host_slot = self.host_slot(&pod.host)?;
        let interface_slot = self.interface_slot(&pod.host, interface)?;
        let block = self
            .interface_block(host_slot, interface_slot)
            .ok_or_else(|| self.exhausted("interface block out of range".to_string()))?;

        let address = usable_addresses(block)
            .find(|addr| {
                !self.used.contains(addr) && !self.excludes.iter().any(|ex| ex.contains(*addr))
            })
            .ok_or_else(|| {
                self.exhausted(format!(
                    "interface block {} of {} on {} is full",
                    block, interface, pod.host
                ))
            })?;

        let lease = AddressLease {
            interface: interface.to_string(),
            address,
            block_size: self.block_size(),
        };
        self.used.insert(address);
        self.leases.insert(key, lease.clone());
        Ok((lease, true))
    }

    /// Drop a lease, `None` when the pod held none
    pub fn release(&mut self, pod: &PodKey, interface: &str) -> Option<AddressLease> {
        let lease = self.leases.remove(&(pod.clone(), interface.to_string()))?;
        self.used.remove(&lease.address);
        Some(lease)
    }

    /// Drop every lease the pod holds in this pool
    pub fn release_pod(&mut self, pod: &PodKey) -> Vec<AddressLease> {
        let keys: Vec<LeaseKey> = self
            .leases
            .keys()
            .filter(|(owner, _)| owner == pod)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|(owner, interface)| self.release(&owner, &interface))
            .collect()
    }

    /// All leases, ordered by pod and interface
    pub fn leases(&self) -> Vec<(PodKey, AddressLease)> {
        let mut leases: Vec<_> = self
            .leases
            .iter()
            .map(|((pod, _), lease)| (pod.clone(), lease.clone()))
            .collect();
        leases.sort_by(|a, b| (&a.0, &a.1.interface).cmp(&(&b.0, &b.1.interface)));
        leases
    }
}

fn slot_count(bits: u8) -> u32 {
    1u32 << bits
}

/// `index`-th sub-network of prefix `prefix` inside `network`
fn subdivide(network: Ipv4Network, prefix: u8, index: u32) -> Option<Ipv4Network> {
    let extra = prefix.checked_sub(network.prefix())?;
    if prefix > 32 || u64::from(index) >= 1u64 << extra {
        return None;
    }
    let step = 1u64 << (32 - u32::from(prefix));
    let base = u64::from(u32::from(network.network())) + u64::from(index) * step;
    let base = u32::try_from(base).ok()?;
    Ipv4Network::new(Ipv4Addr::from(base), prefix).ok()
}

/// Addresses of a block, without the first and last when it has more than two
fn usable_addresses(block: Ipv4Network) -> impl Iterator<Item = Ipv4Addr> {
    let base = u64::from(u32::from(block.network()));
    let size = 1u64 << (32 - u32::from(block.prefix()));
    let (first, last) = if size > 2 { (1, size - 1) } else { (0, size) };
    (first..last).filter_map(move |offset| u32::try_from(base + offset).ok().map(Ipv4Addr::from))
}
