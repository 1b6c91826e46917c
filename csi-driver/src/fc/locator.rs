//! Raw device lookup for FC volumes.
//!
//! A volume shows up under `/dev/disk/by-path` as
//! `...-fc-0x<wwn>-lun-<lun>` (one entry per fabric path) and under
//! `/dev/disk/by-id` as `scsi-<wwid>`. Both are symlinks to a SCSI disk
//! node such as `/dev/sdb`. When dm-multipath has claimed the disk, some
//! `/sys/block/dm-N/slaves/` directory lists it, and `/dev/dm-N` is the
//! device to use instead.

use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, warn};

use super::io::IoHandler;
use crate::error::{FcError, Result};
use crate::types::HostPaths;

/// Outcome of probing one identifier. Both empty means "not visible yet".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatedDisk {
    /// Raw SCSI disk, as resolved (may carry the host root prefix).
    pub raw: Option<String>,
    /// Device-mapper parent, e.g. `/dev/dm-3`.
    pub multipath: Option<String>,
}

impl LocatedDisk {
    pub fn is_empty(&self) -> bool {
        self.raw.is_none() && self.multipath.is_none()
    }
}

/// List a discovery directory, treating a missing directory as empty.
/// udev only creates `/dev/disk/by-path` once the first disk appears.
fn list_discovery_dir(io: &dyn IoHandler, dir: &Path) -> Result<Vec<String>> {
    match io.read_dir(dir) {
        Ok(names) => Ok(names),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Discovery directory does not exist yet");
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Find the disk for `wwn` + `lun` through `/dev/disk/by-path`.
pub fn locate_by_wwn(
    io: &dyn IoHandler,
    paths: &HostPaths,
    wwn: &str,
    lun: &str,
) -> Result<LocatedDisk> {
    let suffix = format!("-fc-0x{}-lun-{}", wwn, lun);
    let dir = paths.by_path_dir();

    for name in list_discovery_dir(io, &dir)? {
        // ends_with rather than contains: skips "-lun-2-part1" and "-lun-21"
        if !name.ends_with(&suffix) {
            continue;
        }
        match resolve_entry(io, paths, &dir.join(&name))? {
            Some(found) => return Ok(found),
            None => continue,
        }
    }

    debug!(wwn = %wwn, lun = %lun, "No by-path entry for FC target");
    Ok(LocatedDisk::default())
}

/// Find the disk for `wwid` through `/dev/disk/by-id`.
pub fn locate_by_wwid(io: &dyn IoHandler, paths: &HostPaths, wwid: &str) -> Result<LocatedDisk> {
    let wanted = format!("scsi-{}", wwid);
    let dir = paths.by_id_dir();

    for name in list_discovery_dir(io, &dir)? {
        if name != wanted {
            continue;
        }
        if let Some(found) = resolve_entry(io, paths, &dir.join(&name))? {
            return Ok(found);
        }
    }

    debug!(wwid = %wwid, "No by-id entry for WWID");
    Ok(LocatedDisk::default())
}

/// Resolve one discovery symlink to its disk and multipath parent.
///
/// A dangling link yields `None` (udev is still settling); a link that
/// resolves outside `/dev` is an error.
fn resolve_entry(io: &dyn IoHandler, paths: &HostPaths, link: &Path) -> Result<Option<LocatedDisk>> {
    let disk = match io.eval_symlinks(link) {
        Ok(disk) => disk,
        Err(e) => {
            warn!(link = %link.display(), error = %e, "Could not resolve discovery symlink");
            return Ok(None);
        }
    };
    let disk = disk.to_string_lossy().into_owned();
    let name = device_name(paths, &disk)?;
    let multipath = find_multipath_parent(io, paths, &name)?;

    debug!(link = %link.display(), disk = %disk, multipath = ?multipath, "Resolved FC disk");
    Ok(Some(LocatedDisk {
        raw: Some(disk),
        multipath,
    }))
}

/// Kernel name of a device node: `/dev/sdb` or `<host_root>/dev/sdb` -> `sdb`.
pub fn device_name(paths: &HostPaths, device: &str) -> Result<String> {
    let stripped = paths.strip_host(device);
    let parts: Vec<&str> = stripped.split('/').collect();
    match parts.as_slice() {
        ["", "dev", name] if !name.is_empty() => Ok((*name).to_string()),
        _ => Err(FcError::Device(format!("illegal path for device {}", device))),
    }
}

/// The device-mapper node holding `disk` as a slave, if any.
pub fn find_multipath_parent(
    io: &dyn IoHandler,
    paths: &HostPaths,
    disk: &str,
) -> Result<Option<String>> {
    let sys_block = paths.sys_block();
    let entries = io.read_dir(&sys_block).map_err(|e| {
        warn!(dir = %sys_block.display(), error = %e, "Failed to list block devices");
        FcError::Io(e)
    })?;

    for name in entries.iter().filter(|n| n.starts_with("dm-")) {
        let slave = sys_block.join(name).join("slaves").join(disk);
        if io.lstat(&slave).is_ok() {
            return Ok(Some(format!("/dev/{}", name)));
        }
    }

    debug!(disk = %disk, "Multipath not configured for disk");
    Ok(None)
}

/// Slave devices (`/dev/sdX`) of a device-mapper node such as `/dev/dm-3`.
pub fn multipath_slaves(io: &dyn IoHandler, paths: &HostPaths, dm_device: &str) -> Result<Vec<String>> {
    let name = device_name(paths, dm_device)?;
    let dir = paths.sys_block().join(&name).join("slaves");
    match io.read_dir(&dir) {
        Ok(slaves) => Ok(slaves.into_iter().map(|s| format!("/dev/{}", s)).collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}
