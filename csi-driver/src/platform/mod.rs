//! OS collaborators for the node service
//!
//! The attach/detach engine never shells out directly. Mounting goes through
//! [`Mounter`] and every other external command through [`CommandRunner`],
//! both injected so the engine can be driven by test doubles.
//!
//! # Usage
//!
//! ```ignore
//! use crate::platform::{CommandRunner, LinuxMounter, Mounter, OsCommandRunner};
//!
//! let mounter = LinuxMounter::default();
//! mounter.format_and_mount("/dev/dm-3", "/mnt/vol1", "ext4", &["rw".into()]).await?;
//! OsCommandRunner.run("multipath", &["-f", "/dev/dm-3"], Some(Duration::from_secs(4))).await?;
//! ```

mod linux;

use std::time::Duration;

use crate::error::Result;

pub use linux::{DEFAULT_FS_TYPE, LinuxMounter, OsCommandRunner, validate_fs_type};

/// Mount primitives used by the mount manager.
#[tonic::async_trait]
pub trait Mounter: Send + Sync {
    async fn is_mount_point(&self, target: &str) -> Result<bool>;

    /// Mount `source` on `target`. An empty `fs_type` lets mount(8) decide.
    async fn mount(&self, source: &str, target: &str, fs_type: &str, options: &[String])
    -> Result<()>;

    /// Unmount `target`, returning [`FcError::NotMounted`] when nothing is
    /// mounted there.
    ///
    /// [`FcError::NotMounted`]: crate::error::FcError::NotMounted
    async fn unmount(&self, target: &str) -> Result<()>;

    /// Create a filesystem on `device` if it has none, then mount it.
    async fn format_and_mount(
        &self,
        device: &str,
        target: &str,
        fs_type: &str,
        options: &[String],
    ) -> Result<()>;
}

/// External command execution.
#[tonic::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` and return its combined stdout/stderr.
    ///
    /// A non-zero exit is an [`FcError::Device`] carrying the output; an
    /// expired `timeout` is an [`FcError::CommandTimeout`].
    ///
    /// [`FcError::Device`]: crate::error::FcError::Device
    /// [`FcError::CommandTimeout`]: crate::error::FcError::CommandTimeout
    async fn run(&self, program: &str, args: &[&str], timeout: Option<Duration>)
    -> Result<String>;
}
