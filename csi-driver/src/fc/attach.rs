//! Attach/detach of FC disks and their mounts.
//!
//! [`FcDiskManager`] owns the injected capabilities (filesystem probing,
//! mount primitives, command execution) and sequences them for the node
//! service:
//!
//! - [`attach`](FcDiskManager::attach) resolves a connector to a kernel
//!   device path (multipath preferred).
//! - [`mount`](FcDiskManager::mount) formats and mounts, or bind-mounts a raw
//!   block device, and records the multipath device for unstage.
//! - [`detach`](FcDiskManager::detach) unmounts a publish target and removes
//!   it.
//! - [`unstage_detach`](FcDiskManager::unstage_detach) removes the SCSI
//!   paths, flushes the multipath map and cleans the staging directory.
//!
//! Every operation is safe to repeat after a partial failure.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::disk_info::{self, DiskInfo};
use super::io::IoHandler;
use super::locator;
use super::search;
use crate::error::{FcError, Result};
use crate::metrics;
use crate::platform::{CommandRunner, Mounter};
use crate::types::{Connector, HostPaths, MountSpec};

/// Default bound on `multipath -f`.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(4000);

const DM_PREFIX: &str = "/dev/dm-";

pub struct FcDiskManager {
    io: Arc<dyn IoHandler>,
    mounter: Arc<dyn Mounter>,
    runner: Arc<dyn CommandRunner>,
    paths: HostPaths,
    flush_timeout: Duration,
}

impl FcDiskManager {
    pub fn new(
        io: Arc<dyn IoHandler>,
        mounter: Arc<dyn Mounter>,
        runner: Arc<dyn CommandRunner>,
        paths: HostPaths,
    ) -> Self {
        Self {
            io,
            mounter,
            runner,
            paths,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn paths(&self) -> &HostPaths {
        &self.paths
    }

    pub fn io(&self) -> Arc<dyn IoHandler> {
        Arc::clone(&self.io)
    }

    /// Resolve `connector` to the kernel device path of its disk.
    ///
    /// Probing blocks on sysfs and may trigger a rescan, so it runs on the
    /// blocking pool.
    pub async fn attach(&self, connector: &Connector) -> Result<String> {
        connector.validate()?;
        info!(volume = %connector.volume_name, lun = %connector.lun, "Attaching FC volume");

        let io = Arc::clone(&self.io);
        let paths = self.paths.clone();
        let task_connector = connector.clone();
        let device = tokio::task::spawn_blocking(move || {
            search::search_disk(io.as_ref(), &paths, &task_connector)
        })
        .await
        .map_err(|e| FcError::Device(format!("disk search task failed: {}", e)))??;

        let device = self.paths.strip_host(&device);
        info!(volume = %connector.volume_name, device = %device, "FC volume attached");
        Ok(device)
    }

    /// Mount `device` according to `spec`.
    ///
    /// Block volumes are bind-mounted onto a file; filesystem volumes are
    /// formatted if blank and mounted onto a directory. An existing mount at
    /// the target is left alone. When `device` is a device-mapper node the
    /// disk record is written to the staging directory.
    pub async fn mount(&self, spec: &MountSpec, device: &str) -> Result<()> {
        let volume = &spec.connector.volume_name;
        if spec.mode.is_block() && spec.read_only {
            return Err(FcError::InvalidArgument(
                "read-only is not supported for block volumes".into(),
            ));
        }

        if self.mounter.is_mount_point(&spec.target_path).await? {
            info!(volume = %volume, target = %spec.target_path, "Target already mounted, skipping mount");
        } else if spec.mode.is_block() {
            let host_target = self.paths.on_host(&spec.target_path);
            if let Some(parent) = host_target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&host_target)
                .await?;

            let options = vec!["bind".to_string(), "rw".to_string()];
            self.mounter
                .mount(device, &spec.target_path, "", &options)
                .await?;
            info!(volume = %volume, device = %device, target = %spec.target_path, "Block volume mounted");
        } else {
            tokio::fs::create_dir_all(self.paths.on_host(&spec.target_path)).await?;

            let mut options = vec![if spec.read_only { "ro" } else { "rw" }.to_string()];
            options.extend(spec.mount_options.iter().cloned());
            self.mounter
                .format_and_mount(device, &spec.target_path, &spec.fs_type, &options)
                .await
                .map_err(|e| {
                    error!(volume = %volume, device = %device, fs_type = %spec.fs_type, error = %e, "Format and mount failed");
                    e
                })?;
            info!(volume = %volume, device = %device, target = %spec.target_path, "Filesystem volume mounted");
        }

        if device.starts_with(DM_PREFIX) {
            let info = DiskInfo {
                mpath_device: device.to_string(),
                is_block: spec.mode.is_block(),
                vol_name: volume.clone(),
            };
            disk_info::save(&self.paths, &info, &spec.staging_path).await?;
        }
        Ok(())
    }

    /// Unmount a publish target and remove it.
    ///
    /// A target that no longer exists is already detached.
    pub async fn detach(&self, target_path: &str) -> Result<()> {
        info!(target = %target_path, "Detaching FC volume");

        let Some(existing) = self.existing_path(target_path).await? else {
            warn!(target = %target_path, "Unmount skipped because path does not exist");
            return Ok(());
        };

        match self.mounter.unmount(target_path).await {
            Ok(()) => debug!(target = %target_path, "Unmounted"),
            Err(FcError::NotMounted(_)) => {
                debug!(target = %target_path, "Volume not mounted, removing target");
            }
            Err(e) => {
                error!(target = %target_path, error = %e, "Failed to unmount");
                return Err(e);
            }
        }

        remove_target(&existing).await
    }

    /// Tear down the devices of a staged volume and remove the staging
    /// directory.
    ///
    /// Without a disk record the volume never had a multipath device, so
    /// only the directory is removed. When the record names a multipath
    /// device, every slave path is deleted first; if any of them fails the
    /// map is left in place and the last failure is returned.
    pub async fn unstage_detach(&self, staging_path: &str, volume_name: &str) -> Result<()> {
        info!(volume = %volume_name, staging = %staging_path, "Unstaging FC volume");

        let info = match disk_info::load(&self.paths, volume_name, staging_path).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => {
                debug!(volume = %volume_name, "No disk record, nothing to flush");
                return self.remove_staging(staging_path).await;
            }
            Err(e) => {
                error!(volume = %volume_name, error = %e, "Failed to read disk record");
                return Err(e);
            }
        };

        let device = self.paths.strip_host(&info.mpath_device);
        if !device.is_empty() {
            let multipath = device.starts_with(DM_PREFIX);

            // sysfs deletes block until the kernel drops the SCSI device
            let io = Arc::clone(&self.io);
            let paths = self.paths.clone();
            let task_device = device.clone();
            tokio::task::spawn_blocking(move || {
                delete_disks(io.as_ref(), &paths, &task_device, multipath)
            })
            .await
            .map_err(|e| FcError::Device(format!("disk delete task failed: {}", e)))??;

            if multipath {
                self.flush_multipath(&device).await?;
            }
        }

        self.remove_staging(staging_path).await
    }

    /// Remove one SCSI disk from the kernel through sysfs.
    ///
    /// A disk that is already gone counts as detached.
    pub fn detach_disk(&self, device: &str) -> Result<()> {
        delete_disk(self.io.as_ref(), &self.paths, device)
    }

    /// Flush a multipath map. A map that disappeared meanwhile counts as
    /// flushed even when the command failed or timed out.
    pub async fn flush_multipath(&self, device: &str) -> Result<()> {
        debug!(device = %device, timeout_ms = self.flush_timeout.as_millis() as u64, "Flushing multipath device");

        match self
            .runner
            .run("multipath", &["-f", device], Some(self.flush_timeout))
            .await
        {
            Ok(_) => {
                metrics::record_flush("success");
                info!(device = %device, "Multipath device flushed");
                Ok(())
            }
            Err(e) => {
                let host_device = self.paths.on_host(device);
                if !tokio::fs::try_exists(&host_device).await.unwrap_or(true) {
                    metrics::record_flush("gone");
                    debug!(device = %device, "Multipath device already deleted");
                    Ok(())
                } else {
                    metrics::record_flush("failure");
                    error!(device = %device, error = %e, "multipath -f failed");
                    Err(e)
                }
            }
        }
    }

    async fn remove_staging(&self, staging_path: &str) -> Result<()> {
        let host_staging = self.paths.on_host(staging_path);
        match tokio::fs::remove_dir_all(&host_staging).await {
            Ok(()) => {
                debug!(path = %host_staging.display(), "Removed staging path");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!(path = %host_staging.display(), error = %e, "Failed to remove staging path");
                Err(e.into())
            }
        }
    }

    /// The host-side or direct form of `path`, whichever exists.
    async fn existing_path(&self, path: &str) -> Result<Option<PathBuf>> {
        let host_path = self.paths.on_host(path);
        for candidate in [host_path, PathBuf::from(path)] {
            if tokio::fs::try_exists(&candidate).await? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

/// Delete the disks behind `device`: every slave of a multipath map, or the
/// disk itself. All of them are attempted; the last failure is returned.
fn delete_disks(io: &dyn IoHandler, paths: &HostPaths, device: &str, multipath: bool) -> Result<()> {
    let disks = if multipath {
        locator::multipath_slaves(io, paths, device)?
    } else {
        vec![device.to_string()]
    };

    let mut last_error = None;
    for disk in &disks {
        if let Err(e) = delete_disk(io, paths, disk) {
            error!(device = %disk, error = %e, "Failed to detach disk");
            last_error = Some(e);
        }
    }
    match last_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn delete_disk(io: &dyn IoHandler, paths: &HostPaths, device: &str) -> Result<()> {
    let name = locator::device_name(paths, device)?;
    let disk_dir = paths.sys_block().join(&name);
    if io.lstat(&disk_dir).is_err() {
        debug!(device = %device, "Disk already removed");
        return Ok(());
    }

    let delete = disk_dir.join("device").join("delete");
    io.write_file(&delete, b"1")
        .map_err(|e| FcError::Device(format!("failed to delete {}: {}", device, e)))?;
    debug!(device = %device, "Disk deleted");
    Ok(())
}

/// Remove an unmounted publish target: a directory for filesystem volumes,
/// a file for block volumes. Directories must be empty.
async fn remove_target(path: &Path) -> Result<()> {
    let removed = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match removed {
        Ok(()) => {
            debug!(path = %path.display(), "Removed target path");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to remove target path");
            Err(e.into())
        }
    }
}
