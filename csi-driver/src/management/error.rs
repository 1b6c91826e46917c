use thiserror::Error;

/// Failures talking to the storage array's management API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Transport failure or an unexpected HTTP status without an error body.
    #[error("communication with management API failed: {0}")]
    ServerCommunication(String),

    #[error("request authentication failed for {0}")]
    Unauthorized(String),

    #[error("management API unavailable: {0}")]
    ServiceUnavailable(String),

    /// The response envelope carried an error object.
    #[error("{code} {message}")]
    Api { code: String, message: String },

    /// The response envelope had no result.
    #[error("result part of response is empty for request {0}")]
    EmptyResult(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    /// Client could not be built (unreadable CA bundle, bad TLS settings).
    #[error("invalid client configuration: {0}")]
    Config(String),
}
