//! Storage array management API.
//!
//! The node plugin needs three calls: register an initiator port on a host
//! object, read it back, and list the array's FC target ports. They are
//! exposed through [`ManagementApi`] so the node service can run against a
//! fake in tests; [`RestClient`] is the HTTP implementation.

mod client;
mod error;

#[cfg(test)]
pub mod fake;

use serde::{Deserialize, Serialize};

use crate::types::HostId;

pub use client::{ApiConfig, ApiResponse, ErrorBody, RestClient, decode_response};
pub use error::ApiError;

/// Port type tag for FC initiator ports.
pub const PORT_TYPE_FC: &str = "FC";

/// A port registered on an array host object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPort {
    #[serde(rename = "type")]
    pub port_type: String,
    pub address: String,
    #[serde(default)]
    pub host_id: u64,
}

/// An array node and its FC target ports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FcNode {
    #[serde(default)]
    pub fc_ports: Vec<FcPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FcPort {
    #[serde(default)]
    pub wwpn: String,
}

#[tonic::async_trait]
pub trait ManagementApi: Send + Sync {
    /// Register `address` as a port of `port_type` on host `host_id`.
    async fn add_host_port(
        &self,
        host_id: HostId,
        port_type: &str,
        address: &str,
    ) -> Result<HostPort, ApiError>;

    /// Fetch a registered FC port of host `host_id`.
    async fn get_host_port(&self, host_id: HostId, address: &str) -> Result<HostPort, ApiError>;

    /// FC target ports of every array node.
    async fn list_fc_ports(&self) -> Result<Vec<FcNode>, ApiError>;
}
