//! Initiator port registration.
//!
//! Before a volume can be mapped to this node, the array-side host object
//! must list every local FC initiator port. Stage compares the local ports
//! against the host's registered ports and registers the missing ones.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{FcError, Result};
use crate::fc::IoHandler;
use crate::management::{ManagementApi, PORT_TYPE_FC};
use crate::metrics;
use crate::types::{HostId, HostPaths, normalize_wwn};

/// WWPNs of the local FC host adapters, from
/// `/sys/class/fc_host/host*/port_name`, without the `0x` prefix.
///
/// A node without any FC port cannot attach FC volumes, so an empty result
/// is an error.
pub fn local_port_names(io: &dyn IoHandler, paths: &HostPaths) -> Result<Vec<String>> {
    let dir = paths.fc_host_dir();
    let hosts = match io.read_dir(&dir) {
        Ok(hosts) => hosts,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to list FC hosts");
            Vec::new()
        }
    };

    let mut ports = Vec::new();
    for host in hosts.iter().filter(|h| h.starts_with("host")) {
        let port_file = dir.join(host).join("port_name");
        match io.read_to_string(&port_file) {
            Ok(raw) => {
                let port = normalize_wwn(&raw);
                if !port.is_empty() {
                    ports.push(port);
                }
            }
            Err(e) => warn!(path = %port_file.display(), error = %e, "Failed to read FC port name"),
        }
    }

    if ports.is_empty() {
        return Err(FcError::NotFound("FC port name".into()));
    }
    debug!(ports = ?ports, "Local FC ports");
    Ok(ports)
}

/// Whether `port` (normalized) appears anywhere in the host's raw port list,
/// matched as text after lower-casing and dropping `:`.
fn is_registered(registered: &str, port: &str) -> bool {
    registered.to_lowercase().replace(':', "").contains(port)
}

/// Register every local port that the raw `registered` list does not
/// already mention.
///
/// The sysfs scan runs on the blocking pool. Each registration is read
/// back; any failure aborts. Returns the number of ports registered.
pub async fn register_missing_ports(
    api: &dyn ManagementApi,
    io: Arc<dyn IoHandler>,
    paths: &HostPaths,
    host_id: HostId,
    registered: &str,
) -> Result<usize> {
    let task_paths = paths.clone();
    let local = tokio::task::spawn_blocking(move || local_port_names(io.as_ref(), &task_paths))
        .await
        .map_err(|e| FcError::Device(format!("FC port scan task failed: {}", e)))??;

    let mut added = 0;
    for port in local.iter().filter(|p| !is_registered(registered, p)) {
        info!(host_id = %host_id, port = %port, "Registering FC port");
        api.add_host_port(host_id, PORT_TYPE_FC, port).await?;
        let confirmed = api.get_host_port(host_id, port).await?;
        debug!(host_id = %host_id, port = %confirmed.address, "FC port registration confirmed");
        metrics::record_port_registered();
        added += 1;
    }

    if added == 0 {
        debug!(host_id = %host_id, "All local FC ports already registered");
    }
    Ok(added)
}
