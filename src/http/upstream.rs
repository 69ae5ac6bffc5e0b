//! Upstream forwarding.
//!
//! # Responsibilities
//! - Hold the pooled HTTP/1.1 client shared by all connection tasks
//! - Rewrite the request URI to the backend, keep method/path/headers/body
//! - Enforce connect and request timeouts
//! - Read the whole upstream response
//!
//! # Design Decisions
//! - One attempt per client request; failures surface immediately as 502
//! - The hyper-util pool handles checkout/return of keep-alive connections
//! - Dropping the future (client went away) aborts the upstream exchange
//!   and releases its connection

use std::net::IpAddr;
use std::time::Duration;

use axum::{
    body::Body,
    http::{uri::Scheme, Request, Response, Uri, Version},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioTimer},
};

use crate::config::{TimeoutConfig, UpstreamConfig};
use crate::error::ProxyError;
use crate::http::headers;
use crate::routing::BackendAddress;

/// Pooled client for backend requests.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client<HttpConnector, Body>,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl UpstreamClient {
    pub fn new(timeouts: &TimeoutConfig, upstream: &UpstreamConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(Duration::from_secs(timeouts.idle_secs))
            .pool_max_idle_per_host(upstream.pool_max_idle_per_host)
            .build(connector);

        Self {
            client,
            request_timeout: Duration::from_secs(timeouts.request_secs),
            max_body_bytes: upstream.max_response_body_bytes,
        }
    }

    /// Forward `req` to `backend` and return the buffered response with
    /// hop-by-hop headers removed.
    pub async fn forward(
        &self,
        backend: &BackendAddress,
        req: Request<Body>,
        client_ip: Option<IpAddr>,
    ) -> Result<Response<Body>, ProxyError> {
        let backend_str = backend.to_string();
        let req = outbound_request(backend, &backend_str, req, client_ip)?;

        let exchange = async {
            let response = self.client.request(req).await.map_err(|e| ProxyError::Upstream {
                backend: backend_str.clone(),
                reason: error_chain(&e),
            })?;

            let (mut parts, body) = response.into_parts();
            let bytes = axum::body::to_bytes(Body::new(body), self.max_body_bytes)
                .await
                .map_err(|e| ProxyError::Upstream {
                    backend: backend_str.clone(),
                    reason: format!("reading body: {}", e),
                })?;

            headers::strip_hop_by_hop(&mut parts.headers);
            Ok(Response::from_parts(parts, Body::from(bytes)))
        };

        match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::UpstreamTimeout {
                backend: backend.to_string(),
                secs: self.request_timeout.as_secs(),
            }),
        }
    }
}

fn outbound_request(
    backend: &BackendAddress,
    authority: &str,
    req: Request<Body>,
    client_ip: Option<IpAddr>,
) -> Result<Request<Body>, ProxyError> {
    let (mut parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| "/".to_owned());
    parts.uri = Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::Upstream {
            backend: backend.to_string(),
            reason: format!("building upstream uri: {}", e),
        })?;
    parts.version = Version::HTTP_11;

    headers::strip_hop_by_hop(&mut parts.headers);
    headers::add_forwarded(&mut parts.headers, client_ip);

    Ok(Request::from_parts(parts, body))
}

/// Flatten an error and its sources into one line for logs.
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
