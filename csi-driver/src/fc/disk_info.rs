//! Per-volume disk record kept in the staging directory between publish and
//! unstage.
//!
//! The record lives at `<staging>/<volume>.json`. Field names are PascalCase
//! (`MpathDevice`, `IsBlock`, `VolName`) so records left by earlier plugin
//! versions on a node still load after an upgrade.

use std::io::ErrorKind;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{FcError, Result};
use crate::types::HostPaths;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiskInfo {
    /// Device-mapper node such as `/dev/dm-3`; empty when no multipath
    /// parent was found.
    #[serde(default)]
    pub mpath_device: String,
    #[serde(default)]
    pub is_block: bool,
    pub vol_name: String,
}

/// Host-side location of the record for `volume_name`.
pub fn record_path(paths: &HostPaths, staging_path: &str, volume_name: &str) -> PathBuf {
    paths
        .on_host(staging_path)
        .join(format!("{}.json", volume_name))
}

/// Write `info` under `staging_path`, replacing any previous record.
///
/// Written to `<volume>.json.new` first and renamed over the record, so a
/// crash never leaves a half-written file behind.
pub async fn save(paths: &HostPaths, info: &DiskInfo, staging_path: &str) -> Result<()> {
    let path = record_path(paths, staging_path, &info.vol_name);
    let new_path = path.with_extension("json.new");

    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }

    let content = serde_json::to_vec(info)?;
    let mut file = tokio::fs::File::create(&new_path).await?;
    file.write_all(&content).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&new_path, &path).await?;

    debug!(path = %path.display(), mpath = %info.mpath_device, "Saved disk info");
    Ok(())
}

/// Read the record for `volume_name`.
///
/// A missing file is [`FcError::NotFound`]; an unreadable or corrupt one is
/// an IO or JSON error.
pub async fn load(paths: &HostPaths, volume_name: &str, staging_path: &str) -> Result<DiskInfo> {
    let path = record_path(paths, staging_path, volume_name);
    let content = match tokio::fs::read(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(FcError::NotFound(format!(
                "disk info {}",
                path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn host(dir: &TempDir) -> HostPaths {
        HostPaths::new(dir.path(), "/sys")
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let paths = host(&dir);
        let staging = "/var/lib/kubelet/plugins/staging/vol1";

        let info = DiskInfo {
            mpath_device: "/dev/dm-3".into(),
            is_block: false,
            vol_name: "vol1".into(),
        };
        save(&paths, &info, staging).await.unwrap();

        let file = dir.path().join("var/lib/kubelet/plugins/staging/vol1/vol1.json");
        assert!(file.exists());
        assert!(!file.with_extension("json.new").exists());

        assert_eq!(load(&paths, "vol1", staging).await.unwrap(), info);
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let paths = host(&dir);

        let mut info = DiskInfo {
            mpath_device: "/dev/dm-1".into(),
            is_block: false,
            vol_name: "vol2".into(),
        };
        save(&paths, &info, "/stage").await.unwrap();
        info.mpath_device = "/dev/dm-7".into();
        info.is_block = true;
        save(&paths, &info, "/stage").await.unwrap();

        assert_eq!(load(&paths, "vol2", "/stage").await.unwrap(), info);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = load(&host(&dir), "vol1", "/stage").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_load_corrupt_is_json_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("stage")).unwrap();
        std::fs::write(dir.path().join("stage/vol1.json"), b"{not json").unwrap();

        let err = load(&host(&dir), "vol1", "/stage").await.unwrap_err();
        assert!(matches!(err, FcError::Json(_)));
    }

    #[test]
    fn test_wire_field_names() {
        let info: DiskInfo = serde_json::from_str(
            r#"{"MpathDevice":"/dev/dm-3","IsBlock":true,"VolName":"vol1"}"#,
        )
        .unwrap();
        assert_eq!(info.mpath_device, "/dev/dm-3");
        assert!(info.is_block);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["VolName"], "vol1");
    }
}
