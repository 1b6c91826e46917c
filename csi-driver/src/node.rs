//! CSI Node Service Implementation
//!
//! Sequences the FC engine for the four volume lifecycle calls:
//!
//! - Stage: make sure the array host object lists every local FC port
//! - Publish: find the disk (rescanning once if needed) and mount it
//! - Unpublish: unmount the target and remove it
//! - Unstage: delete the SCSI paths, flush the multipath map, clean staging
//!
//! The container orchestrator drives the order (stage, publish, unpublish,
//! unstage); nothing here tracks it. Each call is safe to repeat after a
//! failure.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{error, info};

use crate::csi;
use crate::error::{FcError, Result};
use crate::fc::FcDiskManager;
use crate::management::ManagementApi;
use crate::metrics::OperationTimer;
use crate::platform;
use crate::ports;
use crate::types::{
    Connector, FS_TYPE_KEY, HOST_ID_KEY, HOST_PORTS_KEY, HostId, LUN_KEY, MountSpec, VolumeId,
    VolumeMode, WWIDS_KEY, normalize_wwn, split_list,
};

/// CSI Node Service
pub struct NodeService {
    /// The node identifier for this CSI node
    node_id: String,
    disks: FcDiskManager,
    api: Arc<dyn ManagementApi>,
}

/// Close `timer` according to `result` and convert the error for the caller.
fn finish<T>(operation: &str, timer: OperationTimer, result: Result<T>) -> std::result::Result<T, Status> {
    match result {
        Ok(value) => {
            timer.success();
            Ok(value)
        }
        Err(e) => {
            error!(operation = operation, error = %e, "Operation failed");
            let status: Status = e.into();
            timer.failure(&format!("{:?}", status.code()));
            Err(status)
        }
    }
}

impl NodeService {
    pub fn new(node_id: String, disks: FcDiskManager, api: Arc<dyn ManagementApi>) -> Self {
        Self {
            node_id,
            disks,
            api,
        }
    }

    /// Validate that a path is safe to hand to mount(8) and friends.
    /// Returns an error if the path contains dangerous characters.
    fn validate_path(path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(FcError::InvalidArgument("Path cannot be empty".into()));
        }

        // Check for absolute path
        if !path.starts_with('/') {
            return Err(FcError::InvalidArgument("Path must be absolute".into()));
        }

        // Disallow dangerous characters that could enable shell injection
        let dangerous_chars = [
            ';', '|', '&', '$', '`', '(', ')', '{', '}', '<', '>', '\n', '\r',
        ];
        for c in dangerous_chars {
            if path.contains(c) {
                return Err(FcError::InvalidArgument(format!(
                    "Path contains dangerous character: '{}'",
                    c
                )));
            }
        }

        // Disallow path traversal
        if path.contains("..") {
            return Err(FcError::InvalidArgument(
                "Path cannot contain '..' (path traversal)".into(),
            ));
        }

        Ok(())
    }

    fn required<'a>(value: &'a str, what: &str) -> Result<&'a str> {
        if value.is_empty() {
            return Err(FcError::InvalidArgument(format!("{} is required", what)));
        }
        Ok(value)
    }

    async fn stage(&self, req: csi::NodeStageVolumeRequest) -> Result<()> {
        let volume_id: VolumeId = Self::required(&req.volume_id, "Volume ID")?.parse()?;
        let staging_target_path = Self::required(&req.staging_target_path, "Staging target path")?;
        Self::validate_path(staging_target_path)?;

        let host_id: HostId = req
            .publish_context
            .get(HOST_ID_KEY)
            .ok_or_else(|| FcError::InvalidArgument(format!("{} is required in publish context", HOST_ID_KEY)))?
            .parse()?;
        let registered = req
            .publish_context
            .get(HOST_PORTS_KEY)
            .map(String::as_str)
            .unwrap_or_default();

        info!(
            volume = %volume_id.name,
            host_id = %host_id,
            registered_ports = %registered,
            "NodeStageVolume request"
        );

        let added = ports::register_missing_ports(
            self.api.as_ref(),
            self.disks.io(),
            self.disks.paths(),
            host_id,
            registered,
        )
        .await?;

        info!(volume = %volume_id.name, ports_added = added, "Volume staged successfully");
        Ok(())
    }

    async fn unstage(&self, req: csi::NodeUnstageVolumeRequest) -> Result<()> {
        let volume_id: VolumeId = Self::required(&req.volume_id, "Volume ID")?.parse()?;
        let staging_target_path = Self::required(&req.staging_target_path, "Staging target path")?;
        Self::validate_path(staging_target_path)?;

        info!(
            volume = %volume_id.name,
            staging_target_path = %staging_target_path,
            "NodeUnstageVolume request"
        );

        self.disks
            .unstage_detach(staging_target_path, &volume_id.name)
            .await?;

        info!(volume = %volume_id.name, "Volume unstaged successfully");
        Ok(())
    }

    /// Array target ports, normalized, for the by-path lookup.
    async fn target_wwns(&self) -> Result<Vec<String>> {
        let nodes = self.api.list_fc_ports().await?;
        Ok(nodes
            .iter()
            .flat_map(|node| &node.fc_ports)
            .filter(|port| !port.wwpn.is_empty())
            .map(|port| normalize_wwn(&port.wwpn))
            .collect())
    }

    async fn publish(&self, req: csi::NodePublishVolumeRequest) -> Result<()> {
        let volume_id: VolumeId = Self::required(&req.volume_id, "Volume ID")?.parse()?;
        let target_path = Self::required(&req.target_path, "Target path")?;
        Self::validate_path(target_path)?;
        let staging_target_path = Self::required(
            &req.staging_target_path,
            "Staging target path (STAGE_UNSTAGE_VOLUME capability is enabled)",
        )?;
        Self::validate_path(staging_target_path)?;

        let capability = req
            .volume_capability
            .as_ref()
            .ok_or_else(|| FcError::InvalidArgument("Volume capability not provided".into()))?;
        let (mode, mount_flags, capability_fs_type) = match &capability.access_type {
            Some(csi::volume_capability::AccessType::Block(_)) => (VolumeMode::Block, Vec::new(), ""),
            Some(csi::volume_capability::AccessType::Mount(mount)) => (
                VolumeMode::Filesystem,
                mount.mount_flags.clone(),
                mount.fs_type.as_str(),
            ),
            None => (VolumeMode::Filesystem, Vec::new(), ""),
        };
        if mode.is_block() && req.readonly {
            return Err(FcError::InvalidArgument(
                "read-only is not supported for block volumes".into(),
            ));
        }
        let fs_type = match req.volume_context.get(FS_TYPE_KEY) {
            Some(fs_type) if !fs_type.is_empty() => fs_type.as_str(),
            _ => capability_fs_type,
        };
        let fs_type = if mode.is_block() {
            String::new()
        } else {
            platform::validate_fs_type(fs_type)?.to_string()
        };

        let lun = req
            .publish_context
            .get(LUN_KEY)
            .filter(|lun| !lun.trim().is_empty())
            .ok_or_else(|| FcError::InvalidArgument("FC target information is missing: lun is required".into()))?;
        let wwids = req
            .volume_context
            .get(WWIDS_KEY)
            .map(|wwids| split_list(wwids))
            .unwrap_or_default();

        info!(
            volume = %volume_id.name,
            target_path = %target_path,
            lun = %lun,
            mode = %mode,
            readonly = req.readonly,
            "NodePublishVolume request"
        );

        let target_wwns = self.target_wwns().await?;
        let connector = Connector::new(volume_id.name.clone(), target_wwns, wwids, lun.clone())?;

        let device = self.disks.attach(&connector).await?;
        let spec = MountSpec {
            read_only: req.readonly,
            fs_type,
            mount_options: mount_flags,
            target_path: target_path.to_string(),
            staging_path: staging_target_path.to_string(),
            mode,
            connector,
        };
        self.disks.mount(&spec, &device).await?;

        info!(
            volume = %volume_id.name,
            target_path = %target_path,
            device = %device,
            "Volume published successfully"
        );
        Ok(())
    }

    async fn unpublish(&self, req: csi::NodeUnpublishVolumeRequest) -> Result<()> {
        Self::required(&req.volume_id, "Volume ID")?;
        let target_path = Self::required(&req.target_path, "Target path")?;
        Self::validate_path(target_path)?;

        info!(
            volume_id = %req.volume_id,
            target_path = %target_path,
            "NodeUnpublishVolume request"
        );

        self.disks.detach(target_path).await?;

        info!(volume_id = %req.volume_id, target_path = %target_path, "Volume unpublished successfully");
        Ok(())
    }
}

#[tonic::async_trait]
impl csi::node_server::Node for NodeService {
    /// Register this node's FC ports with the array host object.
    async fn node_stage_volume(
        &self,
        request: Request<csi::NodeStageVolumeRequest>,
    ) -> std::result::Result<Response<csi::NodeStageVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_stage_volume");
        let result = self.stage(request.into_inner()).await;
        finish("node_stage_volume", timer, result)?;
        Ok(Response::new(csi::NodeStageVolumeResponse {}))
    }

    async fn node_unstage_volume(
        &self,
        request: Request<csi::NodeUnstageVolumeRequest>,
    ) -> std::result::Result<Response<csi::NodeUnstageVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_unstage_volume");
        let result = self.unstage(request.into_inner()).await;
        finish("node_unstage_volume", timer, result)?;
        Ok(Response::new(csi::NodeUnstageVolumeResponse {}))
    }

    /// Attach the FC disk and mount it at the target path.
    async fn node_publish_volume(
        &self,
        request: Request<csi::NodePublishVolumeRequest>,
    ) -> std::result::Result<Response<csi::NodePublishVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_publish_volume");
        let result = self.publish(request.into_inner()).await;
        finish("node_publish_volume", timer, result)?;
        Ok(Response::new(csi::NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<csi::NodeUnpublishVolumeRequest>,
    ) -> std::result::Result<Response<csi::NodeUnpublishVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_unpublish_volume");
        let result = self.unpublish(request.into_inner()).await;
        finish("node_unpublish_volume", timer, result)?;
        Ok(Response::new(csi::NodeUnpublishVolumeResponse {}))
    }

    /// Get information about this node.
    async fn node_get_info(
        &self,
        _request: Request<csi::NodeGetInfoRequest>,
    ) -> std::result::Result<Response<csi::NodeGetInfoResponse>, Status> {
        info!(node_id = %self.node_id, "NodeGetInfo request");

        Ok(Response::new(csi::NodeGetInfoResponse {
            node_id: self.node_id.clone(),
            max_volumes_per_node: 0, // No limit
            accessible_topology: None,
        }))
    }

    /// Report node capabilities.
    async fn node_get_capabilities(
        &self,
        _request: Request<csi::NodeGetCapabilitiesRequest>,
    ) -> std::result::Result<Response<csi::NodeGetCapabilitiesResponse>, Status> {
        let capabilities = vec![csi::NodeServiceCapability {
            r#type: Some(csi::node_service_capability::Type::Rpc(
                csi::node_service_capability::Rpc {
                    r#type: csi::node_service_capability::rpc::Type::StageUnstageVolume as i32,
                },
            )),
        }];

        Ok(Response::new(csi::NodeGetCapabilitiesResponse {
            capabilities,
        }))
    }

    async fn node_expand_volume(
        &self,
        _request: Request<csi::NodeExpandVolumeRequest>,
    ) -> std::result::Result<Response<csi::NodeExpandVolumeResponse>, Status> {
        Err(Status::unimplemented("NodeExpandVolume is not supported"))
    }

    /// Get volume statistics (not implemented).
    async fn node_get_volume_stats(
        &self,
        _request: Request<csi::NodeGetVolumeStatsRequest>,
    ) -> std::result::Result<Response<csi::NodeGetVolumeStatsResponse>, Status> {
        Err(Status::unimplemented("NodeGetVolumeStats is not supported"))
    }
}
