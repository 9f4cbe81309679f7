//! Multi-NIC CNI config daemon
//!
//! Attaches several host interfaces to a pod through one network attachment:
//! - Selects the host interfaces that serve the attachment
//! - Leases one address per selected interface
//! - Renders one CNI config per interface from the attachment template
//! - Runs the rendered configs with rollback on partial failure

pub mod allocator;
pub mod config;
pub mod error;
pub mod generator;
pub mod inventory;
pub mod plugin;
pub mod selector;
pub mod service;
pub mod topology;
pub mod types;

// Re-export commonly used items
pub use allocator::Allocator;
pub use config::{AttachmentTemplate, DaemonConfig};
pub use inventory::{Snapshot, SnapshotProvider};
pub use selector::NicSelector;
pub use service::{ConfigRequest, ConfigResponse, Pipeline};
