//! Host interface inventory and the pod resource map.
//!
//! Readers take an immutable [`Snapshot`] from the [`SnapshotProvider`]; a
//! refresh builds a whole new snapshot and swaps it in, so a reader never sees
//! a half-updated inventory and never waits on a reload.

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::selector::Strategy;
use crate::topology::normalize_bus_id;
use crate::types::PodKey;

/// One network interface of a host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInterface {
    pub name: String,
    /// Address space (host network CIDR) the interface belongs to
    pub address_space: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pci_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Relative cost of using the interface, lower is cheaper
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_mbps: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceId {
    pub vendor: String,
    #[serde(default)]
    pub products: Vec<String>,
}

/// Named set of vendor/product pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceClass {
    pub name: String,
    pub ids: Vec<DeviceId>,
}

impl DeviceClass {
    /// An id with no products matches every product of its vendor
    pub fn matches(&self, iface: &HostInterface) -> bool {
        let (Some(vendor), product) = (iface.vendor.as_deref(), iface.product.as_deref()) else {
            return false;
        };
        self.ids.iter().any(|id| {
            id.vendor.eq_ignore_ascii_case(vendor)
                && (id.products.is_empty()
                    || product.is_some_and(|product| {
                        id.products.iter().any(|p| p.eq_ignore_ascii_case(product))
                    }))
        })
    }
}

/// Selection policy of one network attachment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachPolicy {
    #[serde(default)]
    pub strategy: Strategy,
    /// Device class for the DevClass strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Extended resource whose devices are pre-allocated to pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
}

/// Immutable view of hosts, pod resources and attachment policies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Host name to its interfaces
    #[serde(default)]
    pub hosts: HashMap<String, Vec<HostInterface>>,
    /// `namespace/name` to resource name to device handles
    #[serde(default)]
    pub pod_resources: HashMap<String, HashMap<String, Vec<String>>>,
    /// Device handle to host bus id
    #[serde(default)]
    pub device_bus: HashMap<String, String>,
    #[serde(default)]
    pub device_classes: Vec<DeviceClass>,
    /// Attachment name to policy
    #[serde(default)]
    pub policies: HashMap<String, AttachPolicy>,
}

impl Snapshot {
    pub fn interfaces(&self, host: &str) -> &[HostInterface] {
        self.hosts.get(host).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn interface_in_space(&self, host: &str, address_space: &str) -> Option<&HostInterface> {
        self.interfaces(host)
            .iter()
            .find(|iface| iface.address_space == address_space)
    }

    pub fn interface_by_name(&self, host: &str, name: &str) -> Option<&HostInterface> {
        self.interfaces(host).iter().find(|iface| iface.name == name)
    }

    pub fn address_space_of(&self, host: &str, name: &str) -> Option<&str> {
        self.interface_by_name(host, name)
            .map(|iface| iface.address_space.as_str())
    }

    /// Device handles of `resource` allocated to a pod
    pub fn pod_devices(&self, pod: &PodKey, resource: &str) -> &[String] {
        self.pod_resources
            .get(&pod.to_string())
            .and_then(|resources| resources.get(resource))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn device_class(&self, name: &str) -> Option<&DeviceClass> {
        self.device_classes.iter().find(|class| class.name == name)
    }

    /// Policy of an attachment, Default strategy when none is recorded
    pub fn policy(&self, attachment: &str) -> AttachPolicy {
        self.policies.get(attachment).cloned().unwrap_or_default()
    }

    /// Bus id of a device handle; SR-IOV handles are bus ids themselves
    pub fn bus_id(&self, handle: &str) -> String {
        normalize_bus_id(self.device_bus.get(handle).map_or(handle, String::as_str))
    }

    /// Address space to device handle for the handles visible on `host`
    pub fn device_map(&self, host: &str, handles: &[String]) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for handle in handles {
            let bus_id = self.bus_id(handle);
            let found = self.interfaces(host).iter().find(|iface| {
                iface
                    .pci_address
                    .as_deref()
                    .is_some_and(|pci| normalize_bus_id(pci) == bus_id)
            });
            match found {
                Some(iface) => {
                    map.insert(iface.address_space.clone(), handle.clone());
                }
                None => debug!("device {} not visible on host {}", handle, host),
            }
        }
        map
    }
}

/// Where snapshots come from
pub trait InventorySource: Send + Sync {
    fn fetch(&self) -> Result<Snapshot>;
}

/// Snapshot kept in a JSON file by the controller
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl InventorySource for FileSource {
    fn fetch(&self) -> Result<Snapshot> {
        let bytes = fs::read(&self.path)
            .with_context(|| format!("Failed to read inventory {}", self.path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse inventory {}", self.path.display()))
    }
}

/// Shortest period between timed inventory reloads
pub const MIN_REFRESH_PERIOD: Duration = Duration::from_secs(1);

/// Holder of the current snapshot
pub struct SnapshotProvider {
    current: ArcSwap<Snapshot>,
    refresh: Notify,
}

impl SnapshotProvider {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            refresh: Notify::new(),
        }
    }

    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn store(&self, snapshot: Snapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Reload from `source`, keeping the current snapshot on failure
    pub fn refresh_from(&self, source: &dyn InventorySource) -> Result<()> {
        let snapshot = source.fetch()?;
        info!("inventory refreshed: {} hosts", snapshot.hosts.len());
        self.store(snapshot);
        Ok(())
    }

    /// Wake the refresh task ahead of its interval
    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    /// Reload on every `period` tick or refresh request. A zero period is
    /// raised to [`MIN_REFRESH_PERIOD`].
    pub fn spawn_refresh(
        self: Arc<Self>,
        source: Arc<dyn InventorySource>,
        period: Duration,
    ) -> JoinHandle<()> {
        let period = if period.is_zero() {
            warn!("zero inventory refresh period, using {:?}", MIN_REFRESH_PERIOD);
            MIN_REFRESH_PERIOD
        } else {
            period
        };
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = self.refresh.notified() => {}
                }

                let provider = self.clone();
                let source = source.clone();
                let outcome =
                    tokio::task::spawn_blocking(move || provider.refresh_from(source.as_ref()))
                        .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("inventory refresh failed, keeping previous: {:#}", e),
                    Err(e) => warn!("inventory refresh task failed: {}", e),
                }
            }
        })
    }
}
