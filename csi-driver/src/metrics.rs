//! Prometheus metrics for the FC node plugin
//!
//! Covers CSI operation outcomes plus the device-level work behind them:
//! SCSI rescans, multipath flushes and initiator port registration.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Metric names
pub mod names {
    /// Counter: Total number of CSI operations by type and status
    pub const CSI_OPERATIONS_TOTAL: &str = "csi_operations_total";
    /// Histogram: Duration of CSI operations in seconds
    pub const CSI_OPERATION_DURATION_SECONDS: &str = "csi_operation_duration_seconds";
    /// Counter: SCSI host rescans issued, by outcome
    pub const FC_SCSI_RESCANS_TOTAL: &str = "fc_scsi_rescans_total";
    /// Counter: Multipath map flushes, by outcome
    pub const FC_MULTIPATH_FLUSHES_TOTAL: &str = "fc_multipath_flushes_total";
    /// Counter: Initiator ports registered with the storage array
    pub const FC_PORTS_REGISTERED_TOTAL: &str = "fc_ports_registered_total";
    /// Histogram: Time spent searching for a disk, in seconds
    pub const FC_DISK_SEARCH_DURATION_SECONDS: &str = "fc_disk_search_duration_seconds";
    /// Counter: Number of retried management API calls
    pub const CSI_RETRIES_TOTAL: &str = "csi_retries_total";
}

/// Initialize the Prometheus metrics exporter
///
/// Starts an HTTP server on the specified address that serves metrics
/// at the `/metrics` endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on http://{}/metrics", addr);
    Ok(())
}

/// Record a CSI operation with its result
pub fn record_operation(operation: &str, status: &str, duration_secs: f64) {
    counter!(names::CSI_OPERATIONS_TOTAL, "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::CSI_OPERATION_DURATION_SECONDS, "operation" => operation.to_string())
        .record(duration_secs);
}

/// Record one SCSI host rescan
pub fn record_rescan(success: bool) {
    counter!(names::FC_SCSI_RESCANS_TOTAL, "success" => success.to_string()).increment(1);
}

/// Record a multipath flush
pub fn record_flush(status: &str) {
    counter!(names::FC_MULTIPATH_FLUSHES_TOTAL, "status" => status.to_string()).increment(1);
}

pub fn record_port_registered() {
    counter!(names::FC_PORTS_REGISTERED_TOTAL).increment(1);
}

/// Record how long a disk search took and whether it found anything
pub fn record_disk_search(found: bool, duration_secs: f64) {
    histogram!(names::FC_DISK_SEARCH_DURATION_SECONDS, "found" => found.to_string())
        .record(duration_secs);
}

/// Record a retry attempt
pub fn record_retry(operation: &str) {
    counter!(names::CSI_RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

/// Helper for timing operations
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    /// Start timing an operation
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    /// Complete the operation with success
    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(&self.operation, "success", duration);
    }

    /// Complete the operation with failure
    pub fn failure(self, error_code: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(&self.operation, error_code, duration);
    }
}
