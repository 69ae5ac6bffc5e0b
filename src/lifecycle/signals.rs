//! OS signal handling.
//!
//! # Responsibilities
//! - SIGTERM / SIGINT (Ctrl+C) → graceful shutdown
//! - SIGHUP → re-read the site file, not shutdown

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::watcher;
use crate::routing::RouteTable;

/// Resolves on the first SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Reload `sites` on every SIGHUP, sending the result to `updates`.
#[cfg(unix)]
pub fn spawn_reload_on_hangup(
    sites: PathBuf,
    updates: mpsc::UnboundedSender<RouteTable>,
) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    Ok(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!(path = %sites.display(), "SIGHUP received, reloading site file");
            let sites = sites.clone();
            let updates = updates.clone();
            // Parsing touches the filesystem.
            if let Err(e) = tokio::task::spawn_blocking(move || watcher::reload(&sites, &updates)).await {
                tracing::error!(error = %e, "Reload task failed");
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_reload_on_hangup(
    _sites: PathBuf,
    _updates: mpsc::UnboundedSender<RouteTable>,
) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async {}))
}
