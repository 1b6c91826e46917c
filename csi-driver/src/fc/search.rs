//! Disk search across the identifiers of a connector.
//!
//! One probing pass visits every identifier. If the pass finds nothing at
//! all, the SCSI hosts are rescanned once and a second pass runs. There is
//! no further retry: worst case is two passes and one rescan.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::io::IoHandler;
use super::locator::{self, LocatedDisk};
use super::rescan;
use crate::error::{FcError, Result};
use crate::metrics;
use crate::types::{Connector, DiskIds, HostPaths};

/// Best result of one pass, plus the last probing error seen.
#[derive(Debug, Default)]
struct PassResult {
    found: LocatedDisk,
    last_error: Option<FcError>,
}

fn probe_pass(io: &dyn IoHandler, paths: &HostPaths, connector: &Connector) -> PassResult {
    let mut result = PassResult::default();

    let ids = connector.disk_ids();
    let candidates = match ids {
        DiskIds::Wwns(wwns) => wwns,
        DiskIds::Wwids(wwids) => wwids,
    };
    for id in candidates {
        let located = match ids {
            DiskIds::Wwns(_) => locator::locate_by_wwn(io, paths, id, &connector.lun),
            DiskIds::Wwids(_) => locator::locate_by_wwid(io, paths, id),
        };
        let located = match located {
            Ok(located) => located,
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to probe FC identifier");
                result.last_error = Some(e);
                continue;
            }
        };

        if result.found.raw.is_none() {
            result.found.raw = located.raw;
        }
        if located.multipath.is_some() {
            result.found.multipath = located.multipath;
            break;
        }
    }
    result
}

/// Find the device for `connector`, preferring the multipath device.
///
/// The returned path may carry the host root prefix when it is a raw disk.
pub fn search_disk(io: &dyn IoHandler, paths: &HostPaths, connector: &Connector) -> Result<String> {
    if connector.disk_ids().is_empty() {
        return Err(FcError::InvalidArgument(format!(
            "volume {} has no target WWNs or WWIDs",
            connector.volume_name
        )));
    }

    let start = Instant::now();
    let mut pass = probe_pass(io, paths, connector);
    if pass.found.is_empty() {
        info!(volume = %connector.volume_name, "FC disk not visible, rescanning SCSI hosts");
        rescan::rescan_all_hosts(io, paths);
        pass = probe_pass(io, paths, connector);
    }
    metrics::record_disk_search(!pass.found.is_empty(), start.elapsed().as_secs_f64());

    let PassResult { found, last_error } = pass;
    match found.multipath.or(found.raw) {
        Some(device) => {
            debug!(volume = %connector.volume_name, device = %device, "FC disk found");
            Ok(device)
        }
        None => Err(last_error.unwrap_or_else(|| {
            FcError::NotFound(format!("FC disk for volume {}", connector.volume_name))
        })),
    }
}
