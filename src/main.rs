//! vhost-proxy
//!
//! Virtual-host reverse proxy driven by a Sitefile.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request      ┌──────────┐   ┌──────────┐   ┌────────────┐
//!     ───────────────────▶│   net    │──▶│   http   │──▶│  routing   │
//!                         │ listener │   │  server  │   │ host table │
//!                         └──────────┘   └──────────┘   └─────┬──────┘
//!                                                             │
//!                                        ┌────────────────────┴─────┐
//!                                        ▼                          ▼
//!                                  ┌───────────┐             ┌────────────┐
//!                                  │ upstream  │──▶ Backend  │ static     │
//!                                  │ client    │             │ files      │
//!                                  └─────┬─────┘             └─────┬──────┘
//!     Client Response     ┌──────────┐   │                         │
//!     ◀───────────────────│ rewrite  │◀──┴─────────────────────────┘
//!                         │ headers  │
//!                         └──────────┘
//!
//!     config (Sitefile + proxy.toml, hot reload) · lifecycle · observability
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use vhost_proxy::config::{self, ConfigError, ProxyConfig, SiteWatcher};
use vhost_proxy::config::validation::validate_config;
use vhost_proxy::http::HttpServer;
use vhost_proxy::lifecycle::{signals, Shutdown};
use vhost_proxy::net::Listener;
use vhost_proxy::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "vhost-proxy", version, about = "Host-routing HTTP reverse proxy")]
struct Cli {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Site file, overriding `sites` from the settings.
    #[arg(long, value_name = "FILE")]
    sites: Option<PathBuf>,

    /// Listen address, overriding `listener.bind_address`.
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

fn load(cli: &Cli) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(sites) = &cli.sites {
        config.sites = sites.clone();
    }
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("vhost-proxy: configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let routes = match config::load_sites(&config.sites) {
        Ok(routes) => routes,
        Err(e) => {
            eprintln!("vhost-proxy: {}: {e}", config.sites.display());
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        println!("configuration ok: {} site(s)", routes.len());
        for route in routes.routes() {
            println!("  {} -> {}", route.host, route.target);
        }
        return ExitCode::SUCCESS;
    }

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "vhost-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        sites_file = %config.sites.display(),
        sites = routes.len(),
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = match Listener::bind(&config.listener).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start listener");
            return ExitCode::FAILURE;
        }
    };

    let (site_watcher, route_updates) = SiteWatcher::new(&config.sites);
    if let Err(e) = signals::spawn_reload_on_hangup(config.sites.clone(), site_watcher.sender()) {
        tracing::warn!(error = %e, "SIGHUP reload unavailable");
    }
    // Dropping the watcher stops it, so keep it for the whole run.
    let _watcher = if config.reload.watch {
        match site_watcher.run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Site file watching unavailable");
                None
            }
        }
    } else {
        None
    };

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            signals::shutdown_signal().await;
            shutdown.trigger();
        }
    });

    let server = HttpServer::new(config, routes);
    if let Err(e) = server.run(listener, route_updates, server_shutdown).await {
        tracing::error!(error = %e, "Server failed");
        return ExitCode::FAILURE;
    }

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
