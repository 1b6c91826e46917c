//! SCSI host rescan.

use tracing::{debug, info, warn};

use super::io::IoHandler;
use crate::metrics;
use crate::types::HostPaths;

/// Channel, target and LUN wildcards: scan everything the adapter can see.
const SCAN_ALL: &str = "- - -";

/// Ask every SCSI host adapter to re-enumerate its devices.
///
/// Best-effort: individual write failures are logged and skipped. Returns the
/// number of adapters that accepted the request.
pub fn rescan_all_hosts(io: &dyn IoHandler, paths: &HostPaths) -> usize {
    let dir = paths.scsi_host_dir();
    let hosts = match io.read_dir(&dir) {
        Ok(hosts) => hosts,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to list SCSI hosts, skipping rescan");
            metrics::record_rescan(false);
            return 0;
        }
    };

    let mut scanned = 0;
    for host in &hosts {
        let scan = dir.join(host).join("scan");
        match io.write_file(&scan, SCAN_ALL.as_bytes()) {
            Ok(()) => {
                debug!(host = %host, "Rescan requested");
                scanned += 1;
            }
            Err(e) => warn!(path = %scan.display(), error = %e, "Failed to rescan SCSI host"),
        }
    }

    info!(scanned, total = hosts.len(), "Rescanned SCSI hosts");
    metrics::record_rescan(scanned > 0);
    scanned
}
