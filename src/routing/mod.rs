//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (Host header)
//!     → host.rs (normalize: strip port, lowercase)
//!     → table.rs (exact lookup)
//!     → Return: matched Route or NoMatch
//!
//! Route Compilation (at startup and on reload):
//!     Site file
//!     → config::sitefile (typed sites)
//!     → RouteTable::new (reject duplicate hosts)
//!     → SharedRouteTable (atomic swap)
//! ```
//!
//! # Design Decisions
//! - Routes compiled at load time, immutable at runtime
//! - Exact host match only; no path routing
//! - Deterministic: same input always matches same route

pub mod host;
pub mod table;

pub use table::{BackendAddress, FilesystemRoot, Route, RouteTable, SharedRouteTable, Target};
