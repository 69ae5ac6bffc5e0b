//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! proxy.toml (optional)
//!     → loader.rs (deserialize with defaults)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (immutable for the process lifetime)
//!
//! Sitefile
//!     → sitefile.rs (tokenize, parse directives)
//!     → RouteTable (one route per site address)
//!
//! On change (watcher.rs) or SIGHUP:
//!     → re-parse Sitefile
//!     → whole-table swap in SharedRouteTable
//!     → on error: log, keep serving the current table
//! ```
//!
//! # Design Decisions
//! - Settings need a restart; only the route table reloads
//! - All settings have defaults so the TOML file is optional
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod sitefile;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_sites, ConfigError};
pub use schema::{ListenerConfig, ObservabilityConfig, ProxyConfig, ReloadConfig, TimeoutConfig, UpstreamConfig};
pub use watcher::SiteWatcher;
