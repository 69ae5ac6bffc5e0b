//! Per-request errors.
//!
//! Every variant is recoverable: it becomes an HTTP response for the one
//! request that hit it and never escapes the connection task. Startup
//! failures use [`crate::config::ConfigError`] instead.

use axum::{
    body::Body,
    http::{header, HeaderValue, Response, StatusCode},
    response::IntoResponse,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// No route for the request's host (or no usable host at all).
    #[error("no route for host {0:?}")]
    RouteNotFound(Option<String>),

    /// The backend refused, reset, or sent something unusable.
    #[error("upstream {backend} failed: {reason}")]
    Upstream { backend: String, reason: String },

    /// The backend did not answer within the request timeout.
    #[error("upstream {backend} timed out after {secs}s")]
    UpstreamTimeout { backend: String, secs: u64 },

    /// The request path tried to leave the file root.
    #[error("path {0:?} escapes the file root")]
    PathTraversal(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("method {0} not allowed for static files")]
    MethodNotAllowed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::RouteNotFound(_) | ProxyError::Upstream { .. } | ProxyError::UpstreamTimeout { .. } => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::PathTraversal(_) => StatusCode::FORBIDDEN,
            ProxyError::FileNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::RouteNotFound(_) => "route_not_found",
            ProxyError::Upstream { .. } => "upstream",
            ProxyError::UpstreamTimeout { .. } => "upstream_timeout",
            ProxyError::PathTraversal(_) => "path_traversal",
            ProxyError::FileNotFound(_) => "file_not_found",
            ProxyError::MethodNotAllowed(_) => "method_not_allowed",
            ProxyError::Io(_) => "io",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        match &self {
            ProxyError::Io(e) => tracing::error!(error = %e, "Request failed"),
            ProxyError::FileNotFound(_) => tracing::debug!(error = %self, "Request failed"),
            _ => tracing::warn!(error = %self, status = status.as_u16(), "Request failed"),
        }

        let reason = status.canonical_reason().unwrap_or("Error");
        let mut response = Response::new(Body::from(reason));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        if let ProxyError::MethodNotAllowed(_) = self {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        }
        response
    }
}
