//! HTTP client for the array management API
//!
//! Every response is wrapped in the same envelope:
//!
//! ```json
//! { "result": ..., "metadata": {...}, "error": { "code": "...", "message": "..." } }
//! ```
//!
//! [`decode_response`] turns an HTTP status and body into the typed result or
//! an [`ApiError`]. Reads are retried with exponential backoff on transient
//! failures; port registration is not, since a POST may have been applied.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{ApiError, FcNode, HostPort, ManagementApi};
use crate::metrics;
use crate::types::HostId;

/// Maximum number of retry attempts for transient failures
const MAX_RETRIES: u32 = 3;
/// Initial backoff delay in milliseconds
const INITIAL_BACKOFF_MS: u64 = 100;
/// Maximum backoff delay in milliseconds
const MAX_BACKOFF_MS: u64 = 5000;
/// Backoff multiplier (exponential factor)
const BACKOFF_MULTIPLIER: u64 = 2;

// REST API paths, relative to the base URL.
mod uri {
    pub const HOSTS: &str = "api/rest/hosts";
    pub const NODES: &str = "api/rest/components/nodes";
}

/// Connection settings for [`RestClient`].
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// e.g. `https://array.example.com`
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// PEM bundle to trust in addition to the system roots
    pub ca_cert: Option<PathBuf>,
    /// Skip certificate verification
    pub insecure: bool,
    pub timeout: Duration,
}

/// The management API response envelope.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub result: Option<T>,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize)]
struct AddPortBody<'a> {
    #[serde(rename = "type")]
    port_type: &'a str,
    address: &'a str,
}

/// Decode one management API response.
///
/// 401 and 503 are reported as such whatever the body says. Otherwise an
/// `error` object in the envelope wins; a non-success status without one is a
/// communication error, and a success without a `result` is
/// [`ApiError::EmptyResult`].
pub fn decode_response<T: DeserializeOwned>(
    status: StatusCode,
    body: &[u8],
    url: &str,
) -> Result<T, ApiError> {
    match status {
        StatusCode::UNAUTHORIZED => return Err(ApiError::Unauthorized(url.to_string())),
        StatusCode::SERVICE_UNAVAILABLE => {
            return Err(ApiError::ServiceUnavailable(format!("{} returned {}", url, status)));
        }
        _ => {}
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return if status.is_success() {
            Err(ApiError::EmptyResult(url.to_string()))
        } else {
            Err(ApiError::ServerCommunication(format!("{} returned {}", url, status)))
        };
    }

    let envelope: ApiResponse<T> = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) if status.is_success() => {
            return Err(ApiError::InvalidResponse(format!("{}: {}", url, e)));
        }
        Err(_) => {
            return Err(ApiError::ServerCommunication(format!("{} returned {}", url, status)));
        }
    };

    if let Some(error) = envelope.error {
        return Err(ApiError::Api {
            code: error.code,
            message: error.message,
        });
    }
    if !status.is_success() {
        return Err(ApiError::ServerCommunication(format!("{} returned {}", url, status)));
    }
    envelope
        .result
        .ok_or_else(|| ApiError::EmptyResult(url.to_string()))
}

/// Check if an API error indicates a transient failure worth retrying.
fn is_retryable(error: &ApiError) -> bool {
    matches!(
        error,
        ApiError::ServerCommunication(_) | ApiError::ServiceUnavailable(_)
    )
}

/// Execute an async operation with exponential backoff retry.
async fn with_retry<T, F, Fut>(operation_name: &str, mut operation: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                attempt += 1;

                if !is_retryable(&error) || attempt > MAX_RETRIES {
                    if attempt > 1 {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %error,
                            "Operation failed after retries"
                        );
                    }
                    return Err(error);
                }

                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    max_retries = MAX_RETRIES,
                    error = %error,
                    backoff_ms = backoff_ms,
                    "Retryable error, backing off"
                );
                metrics::record_retry(operation_name);

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * BACKOFF_MULTIPLIER).min(MAX_BACKOFF_MS);
            }
        }
    }
}

/// [`ManagementApi`] over HTTPS with basic authentication.
#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: Url,
    username: String,
    password: String,
    http: Client,
}

impl RestClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| ApiError::MalformedUrl(format!("{}: {}", config.base_url, e)))?;

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure);
        if let Some(ca_path) = &config.ca_cert {
            let pem = std::fs::read(ca_path).map_err(|e| {
                ApiError::Config(format!("failed to read {}: {}", ca_path.display(), e))
            })?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| ApiError::Config(format!("invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {}", e)))?;

        debug!(base_url = %base_url, "Management API client initialized");
        Ok(Self {
            base_url,
            username: config.username,
            password: config.password,
            http,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::MalformedUrl(format!("{}: {}", path, e)))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, url: &Url) -> Result<T, ApiError> {
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| ApiError::ServerCommunication(format!("{}: {}", url, e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::ServerCommunication(format!("{}: {}", url, e)))?;
        debug!(url = %url, status = %status, "Management API response");
        decode_response(status, &body, url.as_str())
    }

    async fn get<T: DeserializeOwned>(&self, operation: &str, url: Url) -> Result<T, ApiError> {
        with_retry(operation, || self.send(self.http.get(url.clone()), &url)).await
    }
}

#[tonic::async_trait]
impl ManagementApi for RestClient {
    async fn add_host_port(
        &self,
        host_id: HostId,
        port_type: &str,
        address: &str,
    ) -> Result<HostPort, ApiError> {
        let url = self.url(&format!("{}/{}/ports", uri::HOSTS, host_id))?;
        let body = AddPortBody { port_type, address };
        debug!(host_id = %host_id, address = %address, "Registering host port");
        self.send(self.http.post(url.clone()).json(&body), &url).await
    }

    async fn get_host_port(&self, host_id: HostId, address: &str) -> Result<HostPort, ApiError> {
        let url = self.url(&format!("{}/{}/ports/fc/{}", uri::HOSTS, host_id, address))?;
        self.get("get_host_port", url).await
    }

    async fn list_fc_ports(&self) -> Result<Vec<FcNode>, ApiError> {
        let mut url = self.url(uri::NODES)?;
        url.query_pairs_mut().append_pair("fields", "fc_ports");
        self.get("list_fc_ports", url).await
    }
}
