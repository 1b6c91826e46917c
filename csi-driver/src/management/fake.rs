//! In-memory [`ManagementApi`] for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{ApiError, FcNode, FcPort, HostPort, ManagementApi};
use crate::types::HostId;

#[derive(Default)]
struct State {
    host_ports: HashMap<u64, Vec<String>>,
    fc_nodes: Vec<FcNode>,
    add_failure: Option<ApiError>,
    get_failure: Option<ApiError>,
    list_failure: Option<ApiError>,
    added: Vec<(u64, String)>,
    list_calls: usize,
}

#[derive(Default)]
pub struct FakeApi {
    state: Mutex<State>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// One array node exposing `wwpns`.
    pub fn with_fc_ports(self, wwpns: &[&str]) -> Self {
        self.state.lock().unwrap().fc_nodes.push(FcNode {
            fc_ports: wwpns
                .iter()
                .map(|w| FcPort { wwpn: w.to_string() })
                .collect(),
        });
        self
    }

    pub fn fail_add(self, error: ApiError) -> Self {
        self.state.lock().unwrap().add_failure = Some(error);
        self
    }

    pub fn fail_get(self, error: ApiError) -> Self {
        self.state.lock().unwrap().get_failure = Some(error);
        self
    }

    pub fn fail_list(self, error: ApiError) -> Self {
        self.state.lock().unwrap().list_failure = Some(error);
        self
    }

    /// Ports registered through `add_host_port`, in order.
    pub fn added(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().added.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }
}

#[tonic::async_trait]
impl ManagementApi for FakeApi {
    async fn add_host_port(
        &self,
        host_id: HostId,
        port_type: &str,
        address: &str,
    ) -> Result<HostPort, ApiError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = &state.add_failure {
            return Err(error.clone());
        }
        state.added.push((host_id.get(), address.to_string()));
        state
            .host_ports
            .entry(host_id.get())
            .or_default()
            .push(address.to_string());
        Ok(HostPort {
            port_type: port_type.to_string(),
            address: address.to_string(),
            host_id: host_id.get(),
        })
    }

    async fn get_host_port(&self, host_id: HostId, address: &str) -> Result<HostPort, ApiError> {
        let state = self.state.lock().unwrap();
        if let Some(error) = &state.get_failure {
            return Err(error.clone());
        }
        let registered = state
            .host_ports
            .get(&host_id.get())
            .is_some_and(|ports| ports.iter().any(|p| p == address));
        if !registered {
            return Err(ApiError::Api {
                code: "PORT_NOT_FOUND".into(),
                message: format!("port {} not found", address),
            });
        }
        Ok(HostPort {
            port_type: super::PORT_TYPE_FC.to_string(),
            address: address.to_string(),
            host_id: host_id.get(),
        })
    }

    async fn list_fc_ports(&self) -> Result<Vec<FcNode>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if let Some(error) = &state.list_failure {
            return Err(error.clone());
        }
        Ok(state.fc_nodes.clone())
    }
}
