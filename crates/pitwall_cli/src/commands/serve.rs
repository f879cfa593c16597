//! Serve command implementation.

use super::CliResult;
use pitwall_sync_server::{serve, ServerConfig, SyncServer};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Runs the sync server until Ctrl-C.
///
/// The store directory is created on first use.
pub fn run(path: &Path, bind: SocketAddr, timeout: Duration, cors: bool) -> CliResult<()> {
    let config = ServerConfig::default()
        .with_bind_addr(bind)
        .with_request_timeout(timeout)
        .with_cors(cors);
    let server = Arc::new(SyncServer::open(path, config)?);
    info!(path = %path.display(), "store opened");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(server, shutdown_signal()))?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => {
            // Without a signal handler, run until killed.
            warn!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
