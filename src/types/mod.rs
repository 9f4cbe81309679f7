use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

/// Namespaced pod name, the key for leases and resource lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
}

impl PodKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Pod being attached and the host it runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodIdentity {
    pub name: String,
    pub namespace: String,
    pub host: String,
}

impl PodIdentity {
    pub fn new(name: &str, namespace: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            host: host.to_string(),
        }
    }

    pub fn key(&self) -> PodKey {
        PodKey::new(&self.namespace, &self.name)
    }
}

/// Selection arguments carried in the template's `args.cni` block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NicArgs {
    /// Desired interface count, zero means every candidate
    #[serde(rename = "nics", default)]
    pub num_of_interfaces: usize,
    /// Explicit interface-name allow-list
    #[serde(rename = "masters", default, skip_serializing_if = "Vec::is_empty")]
    pub interface_names: Vec<String>,
    /// Target resource class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Device class
    #[serde(rename = "class", default, skip_serializing_if = "Option::is_none")]
    pub dev_class: Option<String>,
}

/// Placement request for one pod network attachment
#[derive(Debug, Clone)]
pub struct PlacementRequest {
    pub pod: PodIdentity,
    /// Network attachment name
    pub attachment: String,
    /// Candidate address spaces, one per host network segment
    pub address_spaces: Vec<String>,
    pub args: NicArgs,
}

/// One host interface that may serve a placement request
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceCandidate {
    pub address_space: String,
    pub interface: String,
    /// Device handle bound to the pod by the device scheduler
    pub handle: Option<String>,
    /// NUMA node of the interface's PCI device
    pub numa_node: Option<u32>,
}

/// Interface binding of a selected NIC
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Bound to a host interface name
    Bound(String),
    /// Handle known, interface name resolved by the plugin at execution time
    Deferred,
}

impl Binding {
    pub fn interface(&self) -> Option<&str> {
        match self {
            Binding::Bound(name) => Some(name),
            Binding::Deferred => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedNic {
    pub binding: Binding,
    pub handle: Option<String>,
}

/// Ordered selection, each entry pairs an interface binding with its handle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementResult {
    nics: Vec<SelectedNic>,
}

impl PlacementResult {
    pub fn new(nics: Vec<SelectedNic>) -> Self {
        Self { nics }
    }

    /// Placeholder result with one deferred entry per pre-allocated handle
    pub fn deferred(handles: &[String]) -> Self {
        Self {
            nics: handles
                .iter()
                .map(|handle| SelectedNic {
                    binding: Binding::Deferred,
                    handle: Some(handle.clone()),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.nics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nics.is_empty()
    }

    pub fn is_deferred(&self) -> bool {
        !self.nics.is_empty()
            && self
                .nics
                .iter()
                .all(|nic| nic.binding == Binding::Deferred)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SelectedNic> {
        self.nics.iter()
    }

    /// Interface names, empty for deferred entries
    pub fn names(&self) -> Vec<String> {
        self.nics
            .iter()
            .map(|nic| nic.binding.interface().unwrap_or_default().to_string())
            .collect()
    }

    /// Resource handles, empty when none is known
    pub fn handles(&self) -> Vec<String> {
        self.nics
            .iter()
            .map(|nic| nic.handle.clone().unwrap_or_default())
            .collect()
    }

    /// Names of the entries bound to a host interface
    pub fn bound_interfaces(&self) -> Vec<String> {
        self.nics
            .iter()
            .filter_map(|nic| nic.binding.interface().map(str::to_string))
            .collect()
    }
}

/// Lease request for the selected interfaces of one pod
#[derive(Debug, Clone)]
pub struct AddressLeaseRequest {
    pub pod: PodIdentity,
    pub interfaces: Vec<String>,
}

/// One reserved address within an interface block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressLease {
    pub interface: String,
    pub address: Ipv4Addr,
    /// Subnet bit count announced with the address
    pub block_size: u8,
}

impl AddressLease {
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.address, self.block_size)
    }
}

/// CNI command arguments
#[derive(Debug, Clone)]
pub struct CmdArgs {
    /// Container ID
    pub container_id: String,
    /// Network namespace path
    pub netns: String,
    /// Interface name
    pub ifname: String,
    /// Arguments
    pub args: HashMap<String, String>,
    /// Path
    pub path: String,
}

impl CmdArgs {
    /// Render `args` the way CNI_ARGS expects them
    pub fn args_string(&self) -> String {
        let mut pairs: Vec<_> = self.args.iter().collect();
        pairs.sort();
        pairs
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Current result format (CNI 1.0.0)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Result {
    /// CNI specification version
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    /// Interfaces created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<Vec<Interface>>,
    /// IP configurations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ips: Option<Vec<IPConfig>>,
    /// DNS configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DNS>,
    /// Routes to configure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<Route>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IPConfig {
    /// Interface index this IP is assigned to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
    /// IP address with prefix length
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DNS {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nameservers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Destination CIDR
    pub dst: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<String>,
}

impl Result {
    /// Create a new empty result
    pub fn new(cni_version: &str) -> Self {
        Self {
            cni_version: cni_version.to_string(),
            interfaces: None,
            ips: None,
            dns: None,
            routes: None,
        }
    }

    /// Merge the interfaces and addresses of another plugin's result,
    /// shifting interface indices past the ones already present
    pub fn merge(&mut self, other: Result) {
        let offset = self.interfaces.as_ref().map_or(0, Vec::len);

        if let Some(interfaces) = other.interfaces {
            self.interfaces.get_or_insert_with(Vec::new).extend(interfaces);
        }

        if let Some(ips) = other.ips {
            let shifted = ips.into_iter().map(|mut ip| {
                ip.interface = ip.interface.map(|index| index + offset);
                ip
            });
            self.ips.get_or_insert_with(Vec::new).extend(shifted);
        }

        if let Some(routes) = other.routes {
            self.routes.get_or_insert_with(Vec::new).extend(routes);
        }

        if self.dns.is_none() {
            self.dns = other.dns;
        }
    }
}
