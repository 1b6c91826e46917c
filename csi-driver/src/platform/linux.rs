//! Linux platform implementation for CSI Node operations
//!
//! Uses Linux-specific tools:
//! - mount/umount for mounts and bind mounts
//! - blkid to detect an existing filesystem
//! - mkfs.ext4/mkfs.xfs for filesystem formatting

use std::process::Output;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{CommandRunner, Mounter};
use crate::error::{FcError, Result};

/// Default filesystem type for Linux
pub const DEFAULT_FS_TYPE: &str = "ext4";

const PROC_MOUNTS: &str = "/proc/mounts";

/// Join stdout and stderr the way a shell user would see them.
fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (true, _) => stderr.trim().to_string(),
        (false, true) => stdout.trim().to_string(),
        (false, false) => format!("{}\n{}", stdout.trim(), stderr.trim()),
    }
}

/// [`CommandRunner`] that spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsCommandRunner;

#[tonic::async_trait]
impl CommandRunner for OsCommandRunner {
    async fn run(&self, program: &str, args: &[&str], timeout: Option<Duration>) -> Result<String> {
        let command_line = format!("{} {}", program, args.join(" "));
        debug!(command = %command_line, timeout_ms = ?timeout.map(|t| t.as_millis()), "Executing command");

        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, command.output())
                .await
                .map_err(|_| {
                    warn!(command = %command_line, "Command timed out");
                    FcError::CommandTimeout {
                        command: command_line.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    }
                })??,
            None => command.output().await?,
        };

        let combined = combined_output(&output);
        if !output.status.success() {
            error!(command = %command_line, status = ?output.status.code(), output = %combined, "Command failed");
            return Err(FcError::Device(format!(
                "{} failed ({}): {}",
                command_line, output.status, combined
            )));
        }
        Ok(combined)
    }
}

/// [`Mounter`] using mount(8), umount(8), blkid(8) and mkfs.
#[derive(Debug, Clone, Default)]
pub struct LinuxMounter {
    runner: OsCommandRunner,
}

impl LinuxMounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a device needs formatting (has no valid filesystem).
    async fn needs_formatting(&self, device: &str) -> Result<bool> {
        // blkid exits non-zero when it finds nothing to report
        match self.runner.run("blkid", &["-p", device], None).await {
            Ok(stdout) => Ok(!stdout.contains("TYPE=")),
            Err(FcError::Device(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Format a device with the specified filesystem type.
    async fn format_device(&self, device: &str, fs_type: &str) -> Result<()> {
        info!(device = %device, fs_type = %fs_type, "Formatting device");

        let (binary, force) = match fs_type {
            "ext4" => ("mkfs.ext4", "-F"),
            "ext3" => ("mkfs.ext3", "-F"),
            "xfs" => ("mkfs.xfs", "-f"),
            other => {
                return Err(FcError::InvalidArgument(format!(
                    "Unsupported filesystem type on Linux: {}. Supported: ext3, ext4, xfs",
                    other
                )));
            }
        };
        self.runner.run(binary, &[force, device], None).await?;
        Ok(())
    }
}

#[tonic::async_trait]
impl Mounter for LinuxMounter {
    async fn is_mount_point(&self, target: &str) -> Result<bool> {
        let mounts = tokio::fs::read_to_string(PROC_MOUNTS).await?;
        let target = target.trim_end_matches('/');
        Ok(mounts
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(target)))
    }

    async fn mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        options: &[String],
    ) -> Result<()> {
        info!(source = %source, target = %target, fs_type = %fs_type, options = ?options, "Mounting");

        let joined = options.join(",");
        let mut args: Vec<&str> = Vec::new();
        if !fs_type.is_empty() {
            args.extend(["-t", fs_type]);
        }
        if !joined.is_empty() {
            args.extend(["-o", joined.as_str()]);
        }
        args.extend([source, target]);

        self.runner.run("mount", &args, None).await?;
        Ok(())
    }

    async fn unmount(&self, target: &str) -> Result<()> {
        info!(target = %target, "Unmounting");

        match self.runner.run("umount", &[target], None).await {
            Ok(_) => Ok(()),
            Err(FcError::Device(msg))
                if msg.contains("not mounted") || msg.contains("no mount point") =>
            {
                debug!(target = %target, "Path was not mounted");
                Err(FcError::NotMounted(target.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn format_and_mount(
        &self,
        device: &str,
        target: &str,
        fs_type: &str,
        options: &[String],
    ) -> Result<()> {
        let fs_type = validate_fs_type(fs_type)?;
        let read_only = options.iter().any(|o| o == "ro");

        if self.needs_formatting(device).await? {
            if read_only {
                return Err(FcError::Device(format!(
                    "device {} has no filesystem and cannot be formatted for a read-only mount",
                    device
                )));
            }
            self.format_device(device, fs_type).await?;
        }

        self.mount(device, target, fs_type, options).await
    }
}

/// Validate filesystem type for Linux.
pub fn validate_fs_type(fs_type: &str) -> Result<&'static str> {
    match fs_type.to_lowercase().as_str() {
        "" => Ok(DEFAULT_FS_TYPE),
        "ext4" => Ok("ext4"),
        "ext3" => Ok("ext3"),
        "xfs" => Ok("xfs"),
        _ => Err(FcError::InvalidArgument(format!(
            "Unsupported filesystem on Linux: {}. Supported: ext3, ext4, xfs",
            fs_type
        ))),
    }
}
