//! Fibre Channel CSI Node Plugin
//!
//! Serves the CSI Identity and Node services on a unix socket and attaches
//! FC volumes exported by the storage array to this host.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::UnixListener;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fc_csi_driver::csi::identity_server::IdentityServer;
use fc_csi_driver::csi::node_server::NodeServer;
use fc_csi_driver::fc::{FcDiskManager, OsIoHandler};
use fc_csi_driver::platform::{LinuxMounter, OsCommandRunner};
use fc_csi_driver::types::HostPaths;
use fc_csi_driver::{ApiConfig, IdentityService, NodeService, RestClient, metrics};

/// CLI arguments for the FC CSI node plugin
#[derive(Parser, Debug)]
#[command(name = "fc-csi-driver")]
#[command(about = "Fibre Channel CSI node plugin for Kubernetes")]
struct Args {
    /// CSI endpoint (unix socket path)
    #[arg(long, env = "CSI_ENDPOINT", default_value = "unix:///csi/csi.sock")]
    endpoint: String,

    /// Node ID for this CSI node (defaults to the hostname)
    #[arg(long, env = "CSI_NODE_ID")]
    node_id: Option<String>,

    /// Driver name
    #[arg(long, env = "CSI_DRIVER_NAME", default_value = fc_csi_driver::identity::DRIVER_NAME)]
    driver_name: String,

    /// Where the host root filesystem is mounted inside the container
    #[arg(long, env = "HOST_ROOT", default_value = "/host")]
    host_root: PathBuf,

    /// Where sysfs is mounted
    #[arg(long, env = "SYS_ROOT", default_value = "/sys")]
    sys_root: PathBuf,

    /// Storage array management API base URL
    #[arg(long, env = "MGMT_API_URL")]
    api_url: String,

    #[arg(long, env = "MGMT_API_USER")]
    api_user: String,

    #[arg(long, env = "MGMT_API_PASSWORD", hide_env_values = true)]
    api_password: String,

    /// Additional CA certificate (PEM) for the management API
    #[arg(long, env = "MGMT_API_CA_CERT")]
    api_ca_cert: Option<PathBuf>,

    /// Skip TLS certificate verification for the management API
    #[arg(long, env = "MGMT_API_INSECURE", default_value = "false")]
    api_insecure: bool,

    /// Management API request timeout in seconds
    #[arg(long, env = "MGMT_API_TIMEOUT_SECS", default_value = "30")]
    api_timeout_secs: u64,

    /// Upper bound for `multipath -f` on unstage, in milliseconds
    #[arg(long, env = "MULTIPATH_FLUSH_TIMEOUT_MS", default_value = "4000")]
    flush_timeout_ms: u64,

    /// Prometheus metrics listen address (e.g. 0.0.0.0:9090)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let node_id = match args.node_id {
        Some(id) => id,
        None => hostname::get()?.to_string_lossy().to_string(),
    };

    info!(
        driver_name = %args.driver_name,
        endpoint = %args.endpoint,
        node_id = %node_id,
        host_root = %args.host_root.display(),
        api_url = %args.api_url,
        "Starting FC CSI node plugin"
    );

    if let Some(metrics_addr) = args.metrics_addr {
        metrics::init_metrics(metrics_addr)
            .map_err(|e| format!("Failed to initialize metrics: {}", e))?;
        info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    }

    let api = RestClient::new(ApiConfig {
        base_url: args.api_url,
        username: args.api_user,
        password: args.api_password,
        ca_cert: args.api_ca_cert,
        insecure: args.api_insecure,
        timeout: Duration::from_secs(args.api_timeout_secs),
    })?;
    if args.api_insecure {
        warn!("TLS certificate verification disabled for the management API");
    }

    let paths = HostPaths::new(args.host_root, args.sys_root);
    let disks = FcDiskManager::new(
        Arc::new(OsIoHandler),
        Arc::new(LinuxMounter::new()),
        Arc::new(OsCommandRunner),
        paths,
    )
    .with_flush_timeout(Duration::from_millis(args.flush_timeout_ms));

    let identity = IdentityService::new(args.driver_name);
    let node = NodeService::new(node_id, disks, Arc::new(api));

    let socket_path = args
        .endpoint
        .strip_prefix("unix://")
        .unwrap_or(&args.endpoint)
        .to_string();
    let listener = bind_socket(Path::new(&socket_path))?;
    info!(socket = %socket_path, "CSI gRPC server listening");

    Server::builder()
        .add_service(IdentityServer::new(identity))
        .add_service(NodeServer::new(node))
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), async {
            shutdown_signal().await;
            info!("Shutdown signal received, stopping server");
        })
        .await?;

    if let Err(e) = std::fs::remove_file(&socket_path) {
        warn!(socket = %socket_path, error = %e, "Failed to remove CSI socket");
    }
    info!("FC CSI node plugin stopped");
    Ok(())
}

/// Bind the CSI unix socket, replacing a stale one left by a previous run.
fn bind_socket(path: &Path) -> std::io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => info!(socket = %path.display(), "Removed stale CSI socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    UnixListener::bind(path)
}

/// Wait for SIGTERM, SIGINT or SIGHUP.
///
/// A handler that fails to install is logged and never fires.
async fn shutdown_signal() {
    let mut sigterm = install(SignalKind::terminate(), "SIGTERM");
    let mut sigint = install(SignalKind::interrupt(), "SIGINT");
    let mut sighup = install(SignalKind::hangup(), "SIGHUP");

    tokio::select! {
        _ = recv(&mut sigterm) => info!("Received SIGTERM"),
        _ = recv(&mut sigint) => info!("Received SIGINT"),
        _ = recv(&mut sighup) => info!("Received SIGHUP"),
    }
}

fn install(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(s) => Some(s),
        Err(e) => {
            error!(signal = name, error = %e, "Failed to install signal handler");
            None
        }
    }
}

async fn recv(sig: &mut Option<Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}
