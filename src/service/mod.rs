//! Generate/cleanup pipeline: select, lease, synthesize.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::allocator::Allocator;
use crate::config::{AttachmentTemplate, DaemonConfig, MULTI_NIC_IPAM_TYPE};
use crate::error::{AllocError, GenerateError};
use crate::generator::{self, Outcome};
use crate::inventory::SnapshotProvider;
use crate::selector::NicSelector;
use crate::topology::Topology;
use crate::types::{AddressLeaseRequest, PlacementRequest, PlacementResult, PodIdentity};

pub mod http;

/// Generate or cleanup request for one pod network attachment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRequest {
    pub pod_name: String,
    pub pod_namespace: String,
    pub host_name: String,
    /// Raw attachment template
    pub data: String,
    /// Request deadline, the daemon default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ConfigRequest {
    pub fn pod(&self) -> PodIdentity {
        PodIdentity::new(&self.pod_name, &self.pod_namespace, &self.host_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub success: bool,
    pub conf_list: Vec<String>,
    pub message: String,
}

impl From<Outcome> for ConfigResponse {
    fn from(outcome: Outcome) -> Self {
        Self {
            success: outcome.success,
            conf_list: outcome
                .documents
                .iter()
                .map(|document| String::from_utf8_lossy(document).into_owned())
                .collect(),
            message: outcome.message,
        }
    }
}

pub struct Pipeline {
    inventory: Arc<SnapshotProvider>,
    topology: Arc<Topology>,
    allocator: Arc<Allocator>,
    accelerator_resource: String,
    default_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        inventory: Arc<SnapshotProvider>,
        topology: Arc<Topology>,
        allocator: Arc<Allocator>,
        accelerator_resource: &str,
        default_timeout: Duration,
    ) -> Self {
        Self {
            inventory,
            topology,
            allocator,
            accelerator_resource: accelerator_resource.to_string(),
            default_timeout,
        }
    }

    pub fn from_config(
        config: &DaemonConfig,
        inventory: Arc<SnapshotProvider>,
        topology: Arc<Topology>,
    ) -> Result<Self, AllocError> {
        let allocator = Arc::new(Allocator::new(&config.pools, inventory.clone())?);
        Ok(Self::new(
            inventory,
            topology,
            allocator,
            &config.accelerator_resource,
            config.request_timeout(),
        ))
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    pub fn inventory(&self) -> &Arc<SnapshotProvider> {
        &self.inventory
    }

    /// Run the selector against the current snapshot
    pub fn place(&self, pod: &PodIdentity, template: &AttachmentTemplate) -> PlacementResult {
        let request = PlacementRequest {
            pod: pod.clone(),
            attachment: template.name.clone(),
            address_spaces: template.master_nets.clone(),
            args: template.args.clone(),
        };
        let snapshot = self.inventory.load();
        NicSelector::new(&snapshot, &self.topology, &self.accelerator_resource).select(&request)
    }

    /// Select interfaces, lease their addresses and render one config per interface
    pub async fn generate(&self, req: &ConfigRequest) -> Outcome {
        let template = match parse_template(req) {
            Ok(template) => template,
            Err(outcome) => return outcome,
        };
        let pod = req.pod();
        let deadline = Instant::now() + req.timeout_ms.map_or(self.default_timeout, Duration::from_millis);

        let placement = self.place(&pod, &template);
        if placement.is_empty() {
            warn!("no interface selected for {} ({})", pod.key(), template.name);
            return Outcome::from_result(Err(GenerateError::NoInterface));
        }

        let lease_request = AddressLeaseRequest {
            pod: pod.clone(),
            interfaces: placement.bound_interfaces(),
        };
        let leases = if template.multi_nic_ipam {
            match self.allocator.allocate_until(&lease_request, Some(deadline)).await {
                Ok(leases) => leases,
                Err(e) => return Outcome::failed(e.to_string()),
            }
        } else {
            HashMap::new()
        };

        let outcome = generator::generate(&template, &placement, &leases);
        if !outcome.success && template.multi_nic_ipam {
            warn!("generate for {} failed ({}), releasing leases", pod.key(), outcome.message);
            self.allocator.deallocate(&lease_request).await;
        }
        if outcome.success {
            info!("generated {} configs for {}", outcome.documents.len(), pod.key());
        }
        outcome
    }

    /// Release the pod's leases and render the matching teardown configs
    pub async fn cleanup(&self, req: &ConfigRequest) -> Outcome {
        let template = match parse_template(req) {
            Ok(template) => template,
            Err(outcome) => return outcome,
        };
        let pod = req.pod();

        let placement = self.place(&pod, &template);

        let leases = if template.multi_nic_ipam {
            let lease_request = AddressLeaseRequest {
                pod: pod.clone(),
                interfaces: placement.bound_interfaces(),
            };
            let mut released = self.allocator.deallocate(&lease_request).await;
            // Interfaces gone from the inventory still hold their leases
            if placement.is_empty() || placement.is_deferred() {
                released.extend(self.allocator.release_pod(&pod.key()).await);
            }
            released
        } else {
            HashMap::new()
        };

        if placement.is_empty() {
            warn!(
                "no interface selected for cleanup of {} ({}), released {} leases",
                pod.key(),
                template.name,
                leases.len()
            );
            return Outcome::from_result(Err(GenerateError::NoInterface));
        }

        generator::cleanup(&template, &placement, &leases)
    }
}

fn parse_template(req: &ConfigRequest) -> Result<AttachmentTemplate, Outcome> {
    let template = AttachmentTemplate::parse(req.data.as_bytes()).map_err(|e| {
        warn!("invalid template from {}/{}: {}", req.pod_namespace, req.pod_name, e);
        Outcome::failed(e.to_string())
    })?;
    if template.multi_nic_ipam && template.ipam_type() != Some(MULTI_NIC_IPAM_TYPE) {
        warn!(
            "{} enables multi-NIC IPAM with ipam type {:?}",
            template.name,
            template.ipam_type()
        );
    }
    Ok(template)
}
