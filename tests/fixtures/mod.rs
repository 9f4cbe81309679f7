// Shared inventory, pool and template builders for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;

use multinic::config::PoolConfig;
use multinic::inventory::{AttachPolicy, DeviceClass, DeviceId, HostInterface, Snapshot};
use multinic::selector::Strategy;
use multinic::types::PodIdentity;

pub const HOST: &str = "node-1";
pub const SPACE_1: &str = "10.0.1.0/24";
pub const SPACE_2: &str = "10.0.2.0/24";
pub const SPACE_3: &str = "10.0.3.0/24";

fn interface(
    name: &str,
    space: &str,
    pci: &str,
    vendor: &str,
    product: &str,
    cost: Option<u32>,
    bandwidth_mbps: u64,
) -> HostInterface {
    HostInterface {
        name: name.to_string(),
        address_space: space.to_string(),
        pci_address: Some(pci.to_string()),
        vendor: Some(vendor.to_string()),
        product: Some(product.to_string()),
        cost,
        bandwidth_mbps: Some(bandwidth_mbps),
    }
}

/// node-1 with eth1..eth3, one per address space
pub fn snapshot() -> Snapshot {
    let mut hosts = HashMap::new();
    hosts.insert(
        HOST.to_string(),
        vec![
            interface("eth1", SPACE_1, "0000:3b:00.0", "15b3", "1017", Some(10), 100_000),
            interface("eth2", SPACE_2, "0000:86:00.0", "8086", "1592", Some(5), 25_000),
            interface("eth3", SPACE_3, "0000:af:00.0", "15b3", "101d", None, 200_000),
        ],
    );

    Snapshot {
        hosts,
        device_classes: vec![DeviceClass {
            name: "mellanox".to_string(),
            ids: vec![DeviceId {
                vendor: "15b3".to_string(),
                products: Vec::new(),
            }],
        }],
        ..Snapshot::default()
    }
}

pub fn with_policy(mut snapshot: Snapshot, attachment: &str, strategy: Strategy) -> Snapshot {
    snapshot.policies.insert(
        attachment.to_string(),
        AttachPolicy {
            strategy,
            ..AttachPolicy::default()
        },
    );
    snapshot
}

/// Assign `handles` of `resource` to `namespace/name`
pub fn with_devices(mut snapshot: Snapshot, pod: &str, resource: &str, handles: &[&str]) -> Snapshot {
    snapshot
        .pod_resources
        .entry(pod.to_string())
        .or_default()
        .insert(
            resource.to_string(),
            handles.iter().map(|h| h.to_string()).collect(),
        );
    snapshot
}

pub fn pod(name: &str) -> PodIdentity {
    PodIdentity::new(name, "default", HOST)
}

pub fn pool(address_space: &str, subnet: &str, host_block: u8, interface_block: u8) -> PoolConfig {
    PoolConfig {
        address_space: address_space.to_string(),
        subnet: subnet.to_string(),
        host_block,
        interface_block,
        excludes: Vec::new(),
    }
}

/// Roomy pools for every address space of [`snapshot`]
pub fn pools() -> Vec<PoolConfig> {
    vec![
        pool(SPACE_1, "192.168.0.0/16", 8, 2),
        pool(SPACE_2, "192.169.0.0/16", 8, 2),
        pool(SPACE_3, "192.170.0.0/16", 8, 2),
    ]
}

/// Pool whose single interface block holds two addresses
pub fn tiny_pool(address_space: &str) -> PoolConfig {
    pool(address_space, "172.16.0.0/28", 1, 1)
}

/// Simple-plugin template over the given address spaces
pub fn simple_template(name: &str, spaces: &[&str], multi_nic_ipam: bool) -> String {
    let ipam = if multi_nic_ipam {
        r#"{"type": "multi-nic-ipam", "hostBlock": 8, "interfaceBlock": 2}"#
    } else {
        r#"{"type": "host-local", "subnet": "10.244.0.0/16"}"#
    };
    format!(
        r#"{{
            "cniVersion": "0.3.0",
            "name": "{}",
            "type": "multi-nic",
            "plugin": {{"cniVersion": "0.3.0", "type": "ipvlan", "mode": "l2"}},
            "subnet": "192.168.0.0/16",
            "masterNets": {},
            "multiNICIPAM": {},
            "ipam": {},
            "daemonIP": "",
            "daemonPort": 11000
        }}"#,
        name,
        serde_json::json!(spaces),
        multi_nic_ipam,
        ipam
    )
}

/// Second element of [`chain_template`], exactly as written
pub const TUNING_ELEMENT: &str = r#"{"type":   "tuning", "sysctl": {"net.core.somaxconn": "500"}}"#;

pub fn chain_template(name: &str, spaces: &[&str]) -> String {
    format!(
        r#"{{
            "cniVersion": "0.3.0",
            "name": "{}",
            "type": "multi-nic",
            "plugin": {{
                "cniVersion": "0.3.0",
                "name": "{}-chain",
                "plugins": [{{"type": "ipvlan", "mode": "l3"}}, {}]
            }},
            "masterNets": {},
            "ipam": {{"type": "whereabouts", "range": "10.10.0.0/16"}}
        }}"#,
        name,
        name,
        TUNING_ELEMENT,
        serde_json::json!(spaces)
    )
}
