//! Route lookup by virtual host.
//!
//! # Responsibilities
//! - Store compiled routes keyed by normalized host
//! - Look up the route for a Host header
//! - Publish a new table atomically on reload
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) host lookup via HashMap
//! - Explicit NoMatch (`None`) rather than a silent default route
//! - Reload swaps the whole table; a request keeps the snapshot it loaded

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::loader::ConfigError;
use crate::rewrite::HeaderRule;
use crate::routing::host;

/// An upstream process the proxy forwards to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendAddress {
    pub host: String,
    pub port: u16,
}

impl BackendAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A directory static files are served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemRoot {
    pub path: PathBuf,
}

impl FilesystemRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Where a virtual host's requests go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Backend(BackendAddress),
    Static(FilesystemRoot),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Backend(addr) => write!(f, "backend {}", addr),
            Target::Static(root) => write!(f, "files {}", root.path.display()),
        }
    }
}

/// A virtual host and everything needed to answer it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Normalized host name (lowercase, no port).
    pub host: String,
    pub target: Target,
    /// Response header rules, in declaration order.
    pub headers: Vec<HeaderRule>,
}

impl Route {
    pub fn new(host: impl Into<String>, target: Target, headers: Vec<HeaderRule>) -> Self {
        Self {
            host: host.into(),
            target,
            headers,
        }
    }
}

/// Immutable host → route map.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: HashMap<String, Arc<Route>>,
}

impl RouteTable {
    /// Build a table. Hosts are normalized; two routes for the same host
    /// are a configuration error.
    pub fn new(routes: impl IntoIterator<Item = Route>) -> Result<Self, ConfigError> {
        let mut table = HashMap::new();
        for mut route in routes {
            let key = host::normalize(&route.host)
                .ok_or_else(|| ConfigError::InvalidHost(route.host.clone()))?;
            if table.contains_key(&key) {
                return Err(ConfigError::DuplicateHost(key));
            }
            route.host = key.clone();
            table.insert(key, Arc::new(route));
        }
        Ok(Self { routes: table })
    }

    /// Find the route for a raw Host header value.
    pub fn lookup(&self, host_header: &str) -> Option<Arc<Route>> {
        let key = host::normalize(host_header)?;
        self.routes.get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Configured hosts, sorted.
    pub fn hosts(&self) -> Vec<&str> {
        let mut hosts: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        hosts.sort_unstable();
        hosts
    }

    /// All routes, sorted by host.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        let mut routes: Vec<Arc<Route>> = self.routes.values().cloned().collect();
        routes.sort_by(|a, b| a.host.cmp(&b.host));
        routes
    }
}

/// The live route table, swappable as a whole.
#[derive(Debug)]
pub struct SharedRouteTable {
    current: ArcSwap<RouteTable>,
}

impl SharedRouteTable {
    pub fn new(table: RouteTable) -> Self {
        Self {
            current: ArcSwap::from_pointee(table),
        }
    }

    /// Snapshot of the current table.
    pub fn load(&self) -> Arc<RouteTable> {
        self.current.load_full()
    }

    /// Publish `table`. Returns false, leaving the current table in place,
    /// when the new one is identical.
    pub fn replace(&self, table: RouteTable) -> bool {
        if *self.current.load_full() == table {
            return false;
        }
        self.current.store(Arc::new(table));
        true
    }
}
