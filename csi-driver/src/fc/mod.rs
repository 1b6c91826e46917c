//! FC device discovery and attach/detach engine.
//!
//! Leaf first:
//! - [`io`]: filesystem probing capability
//! - [`locator`]: by-path / by-id lookup and multipath parent resolution
//! - [`rescan`]: SCSI host rescan
//! - [`search`]: bounded probe, rescan, probe-again search
//! - [`disk_info`]: per-volume record kept in the staging directory
//! - [`attach`]: attach, mount, detach and unstage sequencing

pub mod attach;
pub mod disk_info;
pub mod io;
pub mod locator;
pub mod rescan;
pub mod search;

#[cfg(test)]
pub mod fake;

pub use attach::{DEFAULT_FLUSH_TIMEOUT, FcDiskManager};
pub use disk_info::DiskInfo;
pub use io::{FileKind, IoHandler, OsIoHandler};
