//! Error types shared by the FC attach/detach engine and the node service.

use thiserror::Error;
use tonic::Status;

use crate::management::ApiError;

#[derive(Error, Debug)]
pub enum FcError {
    /// Request is malformed or incomplete; retrying will not help.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Something expected to exist is not there (yet).
    #[error("{0} not found")]
    NotFound(String),

    /// A mount, unmount, flush or sysfs operation failed.
    #[error("device operation failed: {0}")]
    Device(String),

    #[error("'{0}' is not mounted")]
    NotMounted(String),

    #[error("command '{command}' timed out after {timeout_ms}ms")]
    CommandTimeout { command: String, timeout_ms: u64 },

    #[error("management API error: {0}")]
    ExternalService(#[from] ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FcError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FcError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, FcError>;

/// Malformed requests map to INVALID_ARGUMENT. Everything else, including a
/// disk or port that never became visible, is INTERNAL.
impl From<FcError> for Status {
    fn from(error: FcError) -> Self {
        match error {
            FcError::InvalidArgument(_) => Status::invalid_argument(error.to_string()),
            _ => Status::internal(error.to_string()),
        }
    }
}
