//! Per-request dispatch.
//!
//! # Responsibilities
//! - Pick the route for the request's host from the live table
//! - Hand the request to the route's target (backend or file root)
//! - Apply the route's header rules to whatever comes back
//!
//! # Design Decisions
//! - The table snapshot is taken once per request; a reload mid-request
//!   does not affect it
//! - Unknown hosts get a bare 502 with no rules applied
//! - Rules also run on error responses of a matched route

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response},
    response::IntoResponse,
};

use crate::error::ProxyError;
use crate::http::{static_files, upstream::UpstreamClient};
use crate::observability::metrics;
use crate::rewrite;
use crate::routing::{host, SharedRouteTable, Target};

pub struct Dispatcher {
    routes: Arc<SharedRouteTable>,
    upstream: UpstreamClient,
}

impl Dispatcher {
    pub fn new(routes: Arc<SharedRouteTable>, upstream: UpstreamClient) -> Self {
        Self { routes, upstream }
    }

    pub fn routes(&self) -> &Arc<SharedRouteTable> {
        &self.routes
    }

    /// Produce the response for one client request. Never fails: every
    /// error is turned into its HTTP response here.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        let method = req.method().clone();
        let request_host = host::request_host(&req);

        let table = self.routes.load();
        let route = match request_host.as_deref().and_then(|h| table.lookup(h)) {
            Some(route) => route,
            None => {
                let err = ProxyError::RouteNotFound(request_host);
                metrics::record_error(err.kind());
                let response = err.into_response();
                metrics::record_request(method.as_str(), response.status().as_u16(), "-", start);
                return response;
            }
        };

        let result = match &route.target {
            Target::Backend(backend) => {
                let client_ip = req
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(peer)| peer.ip());
                self.upstream.forward(backend, req, client_ip).await
            }
            Target::Static(root) => {
                let path = req.uri().path().to_owned();
                drop(req);
                static_files::serve(root, &method, &path).await
            }
        };

        let mut response = match result {
            Ok(response) => response,
            Err(e) => {
                metrics::record_error(e.kind());
                e.into_response()
            }
        };
        rewrite::apply(&route.headers, response.headers_mut());

        let status = response.status().as_u16();
        metrics::record_request(method.as_str(), status, &route.host, start);
        tracing::debug!(
            host = %route.host,
            target = %route.target,
            status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request dispatched"
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TimeoutConfig, UpstreamConfig};
    use crate::rewrite::HeaderRule;
    use crate::routing::{BackendAddress, FilesystemRoot, Route, RouteTable};
    use axum::http::{header, StatusCode};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Backend that answers every connection with a fixed response carrying
    /// a `Via` header, and reports the raw request it saw.
    async fn via_backend() -> (u16, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let _ = tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
                    let body = "backend";
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nVia: 1.1 squid\r\nX-Backend: a\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        (port, rx)
    }

    fn dispatcher(routes: Vec<Route>) -> Dispatcher {
        let table = RouteTable::new(routes).unwrap();
        Dispatcher::new(
            Arc::new(SharedRouteTable::new(table)),
            UpstreamClient::new(&TimeoutConfig::default(), &UpstreamConfig::default()),
        )
    }

    fn get(host: &str, path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header(header::HOST, host)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn backend_response_gets_header_rules() {
        let (port, mut seen) = via_backend().await;
        let rules = vec![
            HeaderRule::delete("Via").unwrap(),
            HeaderRule::set("Access-Control-Allow-Origin", "*").unwrap(),
        ];
        let d = dispatcher(vec![Route::new(
            "frontier.example",
            Target::Backend(BackendAddress::new("127.0.0.1", port)),
            rules,
        )]);

        let response = d.handle(get("frontier.example", "/status?x=1")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("via"));
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(response.headers()["x-backend"], "a");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"backend");

        let raw = seen.recv().await.unwrap();
        assert!(raw.starts_with("GET /status?x=1 HTTP/1.1\r\n"), "{}", raw);
        assert!(raw.to_ascii_lowercase().contains("host: frontier.example"), "{}", raw);
    }

    #[tokio::test]
    async fn host_port_is_ignored_for_lookup() {
        let (port, _seen) = via_backend().await;
        let d = dispatcher(vec![Route::new(
            "frontier.example",
            Target::Backend(BackendAddress::new("127.0.0.1", port)),
            Vec::new(),
        )]);

        let response = d.handle(get("FRONTIER.example:8080", "/")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_host_is_bad_gateway_without_rules() {
        let d = dispatcher(vec![Route::new(
            "frontier.example",
            Target::Backend(BackendAddress::new("127.0.0.1", 1)),
            vec![HeaderRule::set("X-Site", "frontier").unwrap()],
        )]);

        let response = d.handle(get("other.example", "/")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(!response.headers().contains_key("x-site"));

        let no_host = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(d.handle(no_host).await.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn failed_backend_still_gets_rules() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let d = dispatcher(vec![Route::new(
            "frontier.example",
            Target::Backend(BackendAddress::new("127.0.0.1", port)),
            vec![HeaderRule::set("X-Site", "frontier").unwrap()],
        )]);

        let response = d.handle(get("frontier.example", "/")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()["x-site"], "frontier");
    }

    #[tokio::test]
    async fn static_site_serves_and_forbids_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<p>hi</p>").unwrap();
        let d = dispatcher(vec![Route::new(
            "files.example",
            Target::Static(FilesystemRoot::new(dir.path())),
            vec![HeaderRule::set("Cache-Control", "no-store").unwrap()],
        )]);

        let response = d.handle(get("files.example", "/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

        let response = d.handle(get("files.example", "/missing.txt")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

        let response = d.handle(get("files.example", "/%2e%2e/etc/passwd")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn reload_changes_routing_for_new_requests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "x").unwrap();
        let d = dispatcher(Vec::new());
        assert_eq!(d.handle(get("files.example", "/")).await.status(), StatusCode::BAD_GATEWAY);

        let table = RouteTable::new(vec![Route::new(
            "files.example",
            Target::Static(FilesystemRoot::new(dir.path())),
            Vec::new(),
        )])
        .unwrap();
        assert!(d.routes().replace(table));
        assert_eq!(d.handle(get("files.example", "/")).await.status(), StatusCode::OK);
    }
}
