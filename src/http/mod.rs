//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1.1, Axum router, middleware)
//!     → request.rs (request ID, tracing span)
//!     → dispatcher.rs (host lookup, header rules)
//!         → upstream.rs + headers.rs (backend sites)
//!         → static_files.rs (file sites)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod headers;
pub mod request;
pub mod server;
pub mod static_files;
pub mod upstream;

pub use dispatcher::Dispatcher;
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
pub use upstream::UpstreamClient;
