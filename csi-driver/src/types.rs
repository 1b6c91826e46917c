//! Type-safe wrappers for CSI request parameters.
//!
//! Request maps (publish context, volume context) and composite identifiers
//! arrive as loose strings. Everything is parsed here once, at the API
//! boundary, so the attach/detach engine only ever sees validated values.

use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::FcError;

/// Publish-context key holding the array-side host id.
pub const HOST_ID_KEY: &str = "hostID";
/// Publish-context key holding the ports already registered for the host.
pub const HOST_PORTS_KEY: &str = "hostPorts";
/// Publish-context key holding the LUN of the mapped volume.
pub const LUN_KEY: &str = "lun";
/// Volume-context key holding comma-joined WWIDs.
pub const WWIDS_KEY: &str = "WWIDs";
/// Volume-context key holding the filesystem type.
pub const FS_TYPE_KEY: &str = "fstype";

/// Separator between the volume name and the protocol tag in a volume id.
pub const VOLUME_ID_SEPARATOR: &str = "$$";

// ============================================================================
// VolumeId
// ============================================================================

/// Composite CSI volume id: `<name>$$<protocol>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeId {
    /// Logical volume name; keys the persisted disk record.
    pub name: String,
    /// Protocol tag (e.g. `fc`), if present.
    pub protocol: Option<String>,
}

impl Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.protocol {
            Some(protocol) => write!(f, "{}{}{}", self.name, VOLUME_ID_SEPARATOR, protocol),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for VolumeId {
    type Err = FcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, protocol) = match s.split_once(VOLUME_ID_SEPARATOR) {
            Some((name, protocol)) => (name, Some(protocol.to_string())),
            None => (s, None),
        };
        if name.is_empty() {
            return Err(FcError::InvalidArgument(format!(
                "volume id '{}' has no volume name",
                s
            )));
        }
        Ok(VolumeId {
            name: name.to_string(),
            protocol,
        })
    }
}

// ============================================================================
// HostId
// ============================================================================

/// Array-side host object id. Always a positive integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId(u64);

impl HostId {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HostId {
    type Err = FcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<u64>() {
            Ok(id) if id >= 1 => Ok(HostId(id)),
            _ => Err(FcError::InvalidArgument(format!(
                "'{}' is not a valid host id",
                s
            ))),
        }
    }
}

impl TryFrom<u64> for HostId {
    type Error = FcError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            return Err(FcError::InvalidArgument("host id must be positive".into()));
        }
        Ok(HostId(value))
    }
}

// ============================================================================
// WWN helpers
// ============================================================================

/// Normalize a port name to the bare lower-case hex form used in
/// `/dev/disk/by-path` entries: no `0x` prefix, no colons.
pub fn normalize_wwn(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    trimmed.replace(':', "").to_lowercase()
}

/// Split a comma-joined list, dropping empty items.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Connector
// ============================================================================

/// Everything needed to find the FC disk of one volume on this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connector {
    pub volume_name: String,
    /// Target port WWNs, normalized.
    pub target_wwns: Vec<String>,
    pub wwids: Vec<String>,
    pub lun: String,
}

/// Identifier set chosen for a disk search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskIds<'a> {
    /// Target WWNs, combined with the connector's LUN.
    Wwns(&'a [String]),
    Wwids(&'a [String]),
}

impl DiskIds<'_> {
    pub fn len(&self) -> usize {
        match self {
            DiskIds::Wwns(ids) | DiskIds::Wwids(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Connector {
    /// Build a connector, rejecting it unless a LUN and at least one
    /// identifier are present.
    pub fn new(
        volume_name: impl Into<String>,
        target_wwns: Vec<String>,
        wwids: Vec<String>,
        lun: impl Into<String>,
    ) -> Result<Self, FcError> {
        let connector = Connector {
            volume_name: volume_name.into(),
            target_wwns,
            wwids,
            lun: lun.into(),
        };
        connector.validate()?;
        Ok(connector)
    }

    pub fn validate(&self) -> Result<(), FcError> {
        if self.lun.trim().is_empty() {
            return Err(FcError::InvalidArgument(
                "FC target information is missing: lun is required".into(),
            ));
        }
        if self.target_wwns.is_empty() && self.wwids.is_empty() {
            return Err(FcError::InvalidArgument(
                "FC target information is missing: no target WWNs or WWIDs".into(),
            ));
        }
        Ok(())
    }

    /// WWNs take precedence over WWIDs.
    pub fn disk_ids(&self) -> DiskIds<'_> {
        if self.target_wwns.is_empty() {
            DiskIds::Wwids(&self.wwids)
        } else {
            DiskIds::Wwns(&self.target_wwns)
        }
    }
}

// ============================================================================
// VolumeMode / MountSpec
// ============================================================================

/// How a volume is handed to the workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeMode {
    /// Formatted and mounted as a directory (default)
    #[default]
    Filesystem,
    /// Raw device bind-mounted onto a file
    Block,
}

impl VolumeMode {
    pub const fn is_block(self) -> bool {
        matches!(self, VolumeMode::Block)
    }
}

impl Display for VolumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeMode::Filesystem => write!(f, "filesystem"),
            VolumeMode::Block => write!(f, "block"),
        }
    }
}

/// Per-publish mount request.
#[derive(Debug, Clone)]
pub struct MountSpec {
    pub read_only: bool,
    pub fs_type: String,
    pub mount_options: Vec<String>,
    pub target_path: String,
    pub staging_path: String,
    pub mode: VolumeMode,
    pub connector: Connector,
}

// ============================================================================
// HostPaths
// ============================================================================

/// Host filesystem layout as seen from inside the plugin container.
///
/// Host paths are reachable under `host_root`; kernel paths handed to
/// mount(8) and multipath(8) are the unprefixed ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub host_root: PathBuf,
    pub sys_root: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self::new("/host", "/sys")
    }
}

impl HostPaths {
    pub fn new(host_root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            host_root: host_root.into(),
            sys_root: sys_root.into(),
        }
    }

    /// Map an absolute host path to its location under `host_root`.
    pub fn on_host(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        let relative = path.strip_prefix("/").unwrap_or(path);
        self.host_root.join(relative)
    }

    /// Inverse of [`HostPaths::on_host`]. Strips the host root once, if present.
    pub fn strip_host(&self, path: &str) -> String {
        let root = self.host_root.to_string_lossy();
        let root = root.trim_end_matches('/');
        if root.is_empty() {
            return path.to_string();
        }
        match path.strip_prefix(root) {
            Some(rest) if rest.is_empty() => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => path.to_string(),
        }
    }

    pub fn by_path_dir(&self) -> PathBuf {
        self.on_host("/dev/disk/by-path")
    }

    pub fn by_id_dir(&self) -> PathBuf {
        self.on_host("/dev/disk/by-id")
    }

    pub fn sys_block(&self) -> PathBuf {
        self.sys_root.join("block")
    }

    pub fn scsi_host_dir(&self) -> PathBuf {
        self.sys_root.join("class/scsi_host")
    }

    pub fn fc_host_dir(&self) -> PathBuf {
        self.sys_root.join("class/fc_host")
    }
}
