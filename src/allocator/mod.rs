//! Per-interface address leasing.
//!
//! Every address space has its own pool behind its own lock. Calls against
//! the same address space are serialized, calls against different spaces run
//! side by side.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::AllocError;
use crate::inventory::SnapshotProvider;
use crate::types::{AddressLease, AddressLeaseRequest, PodIdentity, PodKey};

mod pool;

pub use pool::Pool;

pub struct Allocator {
    pools: HashMap<String, Arc<Mutex<Pool>>>,
    inventory: Arc<SnapshotProvider>,
}

impl Allocator {
    pub fn new(configs: &[PoolConfig], inventory: Arc<SnapshotProvider>) -> Result<Self, AllocError> {
        let mut pools = HashMap::new();
        for config in configs {
            let pool = Pool::new(config)?;
            pools.insert(config.address_space.clone(), Arc::new(Mutex::new(pool)));
        }
        Ok(Self { pools, inventory })
    }

    pub fn address_spaces(&self) -> Vec<String> {
        let mut spaces: Vec<String> = self.pools.keys().cloned().collect();
        spaces.sort();
        spaces
    }

    fn pool(&self, address_space: &str) -> Result<&Arc<Mutex<Pool>>, AllocError> {
        self.pools
            .get(address_space)
            .ok_or_else(|| AllocError::UnknownAddressSpace(address_space.to_string()))
    }

    fn address_space_of(&self, pod: &PodIdentity, interface: &str) -> Result<String, AllocError> {
        self.inventory
            .load()
            .address_space_of(&pod.host, interface)
            .map(str::to_string)
            .ok_or_else(|| AllocError::UnknownInterface {
                host: pod.host.clone(),
                interface: interface.to_string(),
            })
    }

    /// Lease one address per requested interface. Existing leases are
    /// returned as they are; on any failure the leases minted by this call
    /// are released before the error is returned.
    pub async fn allocate(
        &self,
        req: &AddressLeaseRequest,
    ) -> Result<HashMap<String, AddressLease>, AllocError> {
        self.allocate_until(req, None).await
    }

    /// [`Allocator::allocate`] bounded by `deadline`
    pub async fn allocate_until(
        &self,
        req: &AddressLeaseRequest,
        deadline: Option<Instant>,
    ) -> Result<HashMap<String, AddressLease>, AllocError> {
        let mut minted = Vec::new();
        let outcome = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.allocate_all(req, &mut minted))
                .await
                .unwrap_or(Err(AllocError::DeadlineExceeded)),
            None => self.allocate_all(req, &mut minted).await,
        };

        if let Err(e) = &outcome {
            warn!(
                "allocation for {} failed ({}), releasing {} new leases",
                req.pod.key(),
                e,
                minted.len()
            );
            self.rollback(&req.pod.key(), &minted).await;
        }
        outcome
    }

    async fn allocate_all(
        &self,
        req: &AddressLeaseRequest,
        minted: &mut Vec<(String, String)>,
    ) -> Result<HashMap<String, AddressLease>, AllocError> {
        let mut leases = HashMap::new();
        for interface in &req.interfaces {
            let address_space = self.address_space_of(&req.pod, interface)?;
            let pool = self.pool(&address_space)?;
            let (lease, new) = pool.lock().await.allocate(&req.pod, interface)?;
            if new {
                minted.push((address_space, interface.clone()));
                info!("leased {} on {} to {}", lease.cidr(), interface, req.pod.key());
            } else {
                debug!("reusing lease {} on {} for {}", lease.cidr(), interface, req.pod.key());
            }
            leases.insert(interface.clone(), lease);
        }
        Ok(leases)
    }

    async fn rollback(&self, pod: &PodKey, minted: &[(String, String)]) {
        for (address_space, interface) in minted {
            if let Some(pool) = self.pools.get(address_space) {
                pool.lock().await.release(pod, interface);
            }
        }
    }

    /// Release the pod's leases on the requested interfaces. Interfaces
    /// without a lease are skipped; the map holds what was released.
    pub async fn deallocate(&self, req: &AddressLeaseRequest) -> HashMap<String, AddressLease> {
        let pod = req.pod.key();
        let mut released = HashMap::new();

        for interface in &req.interfaces {
            let lease = match self.address_space_of(&req.pod, interface) {
                Ok(address_space) => match self.pool(&address_space) {
                    Ok(pool) => pool.lock().await.release(&pod, interface),
                    Err(e) => {
                        warn!("cannot release {} for {}: {}", interface, pod, e);
                        None
                    }
                },
                Err(e) => {
                    debug!("{}, searching every pool", e);
                    self.release_anywhere(&pod, interface).await
                }
            };

            match lease {
                Some(lease) => {
                    info!("released {} on {} from {}", lease.cidr(), interface, pod);
                    released.insert(interface.clone(), lease);
                }
                None => debug!("no lease on {} for {}", interface, pod),
            }
        }

        released
    }

    async fn release_anywhere(&self, pod: &PodKey, interface: &str) -> Option<AddressLease> {
        for pool in self.pools.values() {
            if let Some(lease) = pool.lock().await.release(pod, interface) {
                return Some(lease);
            }
        }
        None
    }

    /// Release every lease of the pod in every pool, for teardown when its
    /// interfaces can no longer be resolved
    pub async fn release_pod(&self, pod: &PodKey) -> HashMap<String, AddressLease> {
        let mut released = HashMap::new();
        for pool in self.pools.values() {
            for lease in pool.lock().await.release_pod(pod) {
                info!("released {} on {} from {}", lease.cidr(), lease.interface, pod);
                released.insert(lease.interface.clone(), lease);
            }
        }
        released
    }

    /// Current leases of one address space
    pub async fn leases(&self, address_space: &str) -> Result<Vec<(PodKey, AddressLease)>, AllocError> {
        Ok(self.pool(address_space)?.lock().await.leases())
    }

    /// Current lease of the pod on `interface`, if any
    pub async fn lease(&self, pod: &PodIdentity, interface: &str) -> Option<AddressLease> {
        let address_space = self.address_space_of(pod, interface).ok()?;
        let pool = self.pool(&address_space).ok()?;
        let lease = pool.lock().await.lease(&pod.key(), interface).cloned();
        lease
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{HostInterface, Snapshot};
    use std::time::Duration;

    fn interface(name: &str, address_space: &str) -> HostInterface {
        HostInterface {
            name: name.to_string(),
            address_space: address_space.to_string(),
            ..HostInterface::default()
        }
    }

    fn allocator() -> Allocator {
        let mut snapshot = Snapshot::default();
        snapshot.hosts.insert(
            "node-1".to_string(),
            vec![interface("eth1", "10.0.1.0/24"), interface("eth2", "10.0.2.0/24")],
        );
        let pools = [
            PoolConfig {
                address_space: "10.0.1.0/24".to_string(),
                subnet: "192.168.0.0/16".to_string(),
                host_block: 8,
                interface_block: 2,
                excludes: Vec::new(),
            },
            PoolConfig {
                address_space: "10.0.2.0/24".to_string(),
                subnet: "192.169.0.0/16".to_string(),
                host_block: 8,
                interface_block: 2,
                excludes: Vec::new(),
            },
        ];
        Allocator::new(&pools, Arc::new(SnapshotProvider::new(snapshot))).unwrap()
    }

    fn request(interfaces: &[&str]) -> AddressLeaseRequest {
        AddressLeaseRequest {
            pod: PodIdentity::new("pod-a", "default", "node-1"),
            interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn deadline_releases_partial_leases() {
        let allocator = allocator();
        let held = allocator.pools["10.0.2.0/24"].clone();
        let guard = held.lock().await;

        let deadline = Instant::now() + Duration::from_millis(50);
        let err = allocator
            .allocate_until(&request(&["eth1", "eth2"]), Some(deadline))
            .await
            .unwrap_err();
        assert!(matches!(err, AllocError::DeadlineExceeded));
        drop(guard);

        assert!(allocator.leases("10.0.1.0/24").await.unwrap().is_empty());
        assert!(allocator.leases("10.0.2.0/24").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn spaces_are_locked_independently() {
        let allocator = allocator();
        let held = allocator.pools["10.0.2.0/24"].clone();
        let _guard = held.lock().await;

        let deadline = Instant::now() + Duration::from_secs(5);
        let leases = allocator
            .allocate_until(&request(&["eth1"]), Some(deadline))
            .await
            .unwrap();
        assert_eq!(leases["eth1"].cidr(), "192.168.0.1/16");
    }
}
