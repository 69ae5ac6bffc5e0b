//! Site file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_sites;
use crate::observability::metrics;
use crate::routing::RouteTable;

/// Watches the site file and sends freshly compiled route tables.
pub struct SiteWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<RouteTable>,
}

impl SiteWatcher {
    /// Returns the watcher and the receiver the server drains.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<RouteTable>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Another handle for pushing reloads (used by SIGHUP).
    pub fn sender(&self) -> mpsc::UnboundedSender<RouteTable> {
        self.update_tx.clone()
    }

    /// Start watching. The returned watcher must be kept alive.
    ///
    /// The parent directory is watched rather than the file, so editors
    /// that save by renaming a temp file over it are still noticed.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();
        let file_name = path.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if ours {
                        tracing::info!(path = %path.display(), "Site file change detected, reloading");
                        reload(&path, &tx);
                    }
                }
                Err(e) => tracing::error!(error = %e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "Site file watcher started");
        Ok(watcher)
    }
}

/// Re-parse `path` and send the table. A broken file is logged and the
/// current table stays in service.
pub fn reload(path: &Path, tx: &mpsc::UnboundedSender<RouteTable>) {
    match load_sites(path) {
        Ok(table) => {
            if tx.send(table).is_err() {
                tracing::debug!("Server gone, dropping reloaded route table");
            }
        }
        Err(e) => {
            metrics::record_reload("failed");
            tracing::error!(path = %path.display(), error = %e, "Failed to reload site file, keeping current routes");
        }
    }
}
