//! Host-routing HTTP/1.1 reverse proxy and static file server.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod rewrite;
pub mod routing;

pub use config::{ConfigError, ProxyConfig};
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use routing::{RouteTable, SharedRouteTable};
