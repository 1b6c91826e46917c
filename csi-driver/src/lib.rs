//! Fibre Channel CSI Node Plugin Library
//!
//! Kubernetes CSI node plugin that attaches Fibre Channel volumes exported
//! by a storage array to the local host.
//!
//! This library provides:
//! - CSI Identity and Node service implementations
//! - FC device discovery, attach/detach and mount lifecycle (`fc`)
//! - Initiator port registration against the array management API
//! - Linux mount and command execution collaborators

/// CSI proto generated types
pub mod csi {
    tonic::include_proto!("csi.v1");
}

pub mod error;
pub mod fc;
pub mod identity;
pub mod management;
pub mod metrics;
pub mod node;
pub mod platform;
pub mod ports;
pub mod types;

pub use error::{FcError, Result};
pub use fc::FcDiskManager;
pub use identity::IdentityService;
pub use management::{ApiConfig, ManagementApi, RestClient};
pub use node::NodeService;
