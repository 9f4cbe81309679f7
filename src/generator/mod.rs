//! Per-interface CNI config synthesis.
//!
//! Every selected interface gets its own copy of the template's main plugin
//! with `master`, `deviceID` and `ipam` filled in. Chain templates keep their
//! header and every element after the first exactly as written.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::{AttachmentTemplate, PluginDescriptor, PluginTemplate};
use crate::error::GenerateError;
use crate::types::{AddressLease, PlacementResult, SelectedNic};

/// IPAM type installed on each interface in multi-NIC IPAM mode
pub const STATIC_IPAM_TYPE: &str = "static";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Attach,
    Detach,
}

#[derive(Serialize)]
struct StaticIpam {
    #[serde(rename = "type")]
    ipam_type: &'static str,
    addresses: Vec<StaticAddress>,
}

#[derive(Serialize)]
struct StaticAddress {
    address: String,
}

/// Result of a generate or cleanup call as reported to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    /// Rendered documents; a failed teardown still carries the ones that rendered
    pub documents: Vec<Vec<u8>>,
    pub message: String,
}

impl Outcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            documents: Vec::new(),
            message: message.into(),
        }
    }

    pub fn from_result(result: Result<Vec<Vec<u8>>, GenerateError>) -> Self {
        match result {
            Ok(documents) => Self {
                success: true,
                documents,
                message: "succeeded".to_string(),
            },
            Err(e) => Self::failed(e.to_string()),
        }
    }

    /// Teardown outcome from per-interface results. Documents that rendered
    /// are kept even when others failed, so they can still be torn down.
    pub fn from_teardown(results: Vec<Result<Vec<u8>, GenerateError>>) -> Self {
        if results.is_empty() {
            return Self::failed(GenerateError::NoInterface.to_string());
        }

        let mut documents = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(document) => documents.push(document),
                Err(e) => {
                    warn!("cleanup config for interface index {} failed: {}", index, e);
                    failures.push(format!("interface index {}: {}", index, e));
                }
            }
        }

        if failures.is_empty() {
            return Self::from_result(Ok(documents));
        }
        Self {
            success: false,
            documents,
            message: failures.join("; "),
        }
    }
}

/// Render the attach documents for a placement
pub fn generate(
    template: &AttachmentTemplate,
    placement: &PlacementResult,
    leases: &HashMap<String, AddressLease>,
) -> Outcome {
    Outcome::from_result(Synthesizer::new(template).render(placement, leases, Mode::Attach))
}

/// Render the teardown documents for a placement, shaped like [`generate`]'s
pub fn cleanup(
    template: &AttachmentTemplate,
    placement: &PlacementResult,
    leases: &HashMap<String, AddressLease>,
) -> Outcome {
    Outcome::from_teardown(Synthesizer::new(template).render_each(placement, leases, Mode::Detach))
}

pub struct Synthesizer<'a> {
    template: &'a AttachmentTemplate,
}

impl<'a> Synthesizer<'a> {
    pub fn new(template: &'a AttachmentTemplate) -> Self {
        Self { template }
    }

    /// One document per selected interface, index-aligned with `placement`.
    /// Fails on the first interface that cannot be rendered.
    pub fn render(
        &self,
        placement: &PlacementResult,
        leases: &HashMap<String, AddressLease>,
        mode: Mode,
    ) -> Result<Vec<Vec<u8>>, GenerateError> {
        if placement.is_empty() {
            return Err(GenerateError::NoInterface);
        }
        self.render_each(placement, leases, mode).into_iter().collect()
    }

    /// Render every interface independently, one result per entry of `placement`
    pub fn render_each(
        &self,
        placement: &PlacementResult,
        leases: &HashMap<String, AddressLease>,
        mode: Mode,
    ) -> Vec<Result<Vec<u8>, GenerateError>> {
        placement
            .iter()
            .enumerate()
            .map(|(index, nic)| self.document(index, nic, leases, mode))
            .collect()
    }

    fn document(
        &self,
        index: usize,
        nic: &SelectedNic,
        leases: &HashMap<String, AddressLease>,
        mode: Mode,
    ) -> Result<Vec<u8>, GenerateError> {
        let descriptor = self.descriptor(index, nic, leases, mode)?;
        let serialized = match &self.template.plugin {
            PluginTemplate::Simple(_) => serde_json::to_vec(&descriptor),
            PluginTemplate::Chain(chain) => serde_json::to_vec(&chain.document(&descriptor)),
        };
        let bytes = serialized.map_err(|source| GenerateError::Serialize { index, source })?;
        debug!("config {}: {}", index, String::from_utf8_lossy(&bytes));
        Ok(bytes)
    }

    /// Copy of the main plugin bound to one interface
    fn descriptor(
        &self,
        index: usize,
        nic: &SelectedNic,
        leases: &HashMap<String, AddressLease>,
        mode: Mode,
    ) -> Result<PluginDescriptor, GenerateError> {
        let mut descriptor = self.template.plugin.main().clone();
        descriptor.master = nic.binding.interface().map(str::to_string);
        descriptor.device_id = nic.handle.clone();

        descriptor.ipam = if self.template.multi_nic_ipam {
            let lease = nic
                .binding
                .interface()
                .and_then(|interface| leases.get(interface));
            let addresses = match (lease, mode) {
                (Some(lease), _) => vec![StaticAddress {
                    address: lease.cidr(),
                }],
                (None, Mode::Detach) => Vec::new(),
                (None, Mode::Attach) => {
                    let name = nic
                        .binding
                        .interface()
                        .or(nic.handle.as_deref())
                        .unwrap_or_default();
                    return Err(GenerateError::MissingLease(name.to_string()));
                }
            };
            let ipam = StaticIpam {
                ipam_type: STATIC_IPAM_TYPE,
                addresses,
            };
            let value = serde_json::to_value(ipam)
                .map_err(|source| GenerateError::Serialize { index, source })?;
            Some(value)
        } else {
            self.template.ipam.clone()
        };

        Ok(descriptor)
    }
}
