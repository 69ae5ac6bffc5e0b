//! HTTP server setup and the accept loop.
//!
//! # Responsibilities
//! - Build the Axum router (one fallback handler) with tracing and
//!   request-ID middleware
//! - Serve each accepted connection with hyper's HTTP/1.1 builder
//! - Swap in reloaded route tables
//! - Drain connections on shutdown
//!
//! # Design Decisions
//! - Connections are driven by hand rather than `axum::serve` so each one
//!   gets keep-alive, header-read timeout and its own graceful shutdown
//! - HTTP/1.1 keep-alive serves one exchange at a time, so responses on a
//!   connection go out in request order

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Response},
    Router,
};
use hyper::{body::Incoming, server::conn::http1};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::sync::{broadcast, mpsc};
use tower::ServiceExt;
use tower_http::{request_id::SetRequestIdLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::http::dispatcher::Dispatcher;
use crate::http::request::{make_span, UuidRequestId, X_REQUEST_ID};
use crate::http::upstream::UpstreamClient;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::routing::{RouteTable, SharedRouteTable};

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    app: Router,
    dispatcher: Arc<Dispatcher>,
    config: ProxyConfig,
}

impl HttpServer {
    pub fn new(config: ProxyConfig, routes: RouteTable) -> Self {
        let upstream = UpstreamClient::new(&config.timeouts, &config.upstream);
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(SharedRouteTable::new(routes)), upstream));
        let app = Self::build_router(Arc::clone(&dispatcher));
        Self {
            app,
            dispatcher,
            config,
        }
    }

    /// Build the Axum router. Every path goes to the dispatcher.
    fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(dispatcher)
            // Failures are logged once, by `ProxyError`, at their own level.
            .layer(TraceLayer::new_for_http().make_span_with(make_span).on_failure(()))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
    }

    /// The live table, for callers that swap it directly.
    pub fn routes(&self) -> Arc<SharedRouteTable> {
        Arc::clone(self.dispatcher.routes())
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut route_updates: mpsc::UnboundedReceiver<RouteTable>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            sites = self.dispatcher.routes().load().len(),
            "HTTP server starting"
        );

        let mut builder = http1::Builder::new();
        builder
            .keep_alive(true)
            .timer(TokioTimer::new())
            .header_read_timeout(Duration::from_secs(self.config.timeouts.header_read_secs));

        let tracker = ConnectionTracker::new();
        let connections = Shutdown::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Closed) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                            // Usually fd exhaustion; give it a moment.
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            continue;
                        }
                    };

                    let guard = tracker.track();
                    let app = self.app.clone();
                    let builder = builder.clone();
                    let mut stop = connections.subscribe();

                    tokio::spawn(async move {
                        let _permit = permit;
                        let service = hyper::service::service_fn(move |mut req: Request<Incoming>| {
                            req.extensions_mut().insert(ConnectInfo(peer));
                            app.clone().oneshot(req)
                        });

                        let conn = builder.serve_connection(TokioIo::new(stream), service);
                        tokio::pin!(conn);

                        let result = tokio::select! {
                            result = conn.as_mut() => result,
                            _ = stop.recv() => {
                                conn.as_mut().graceful_shutdown();
                                conn.as_mut().await
                            }
                        };
                        if let Err(e) = result {
                            tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, error = %e, "Connection ended with error");
                        }
                    });
                }
                Some(table) = route_updates.recv() => {
                    self.apply_reload(table);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }

        drop(listener);
        connections.trigger();

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        if tracker.drain(grace).await {
            tracing::info!("All connections drained");
        } else {
            tracing::warn!(
                remaining = tracker.active_count(),
                grace_secs = grace.as_secs(),
                "Grace period over, closing remaining connections"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn apply_reload(&self, table: RouteTable) {
        let sites = table.len();
        if self.dispatcher.routes().replace(table) {
            metrics::record_reload("applied");
            tracing::info!(sites, "Route table reloaded");
        } else {
            metrics::record_reload("unchanged");
            tracing::debug!("Site file unchanged, keeping current routes");
        }
    }
}

async fn proxy_handler(State(dispatcher): State<Arc<Dispatcher>>, req: Request<Body>) -> Response<Body> {
    dispatcher.handle(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_subscriber::layer::{Context, SubscriberExt};

    /// Counts ERROR events seen while installed.
    struct ErrorCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn bad_gateway_is_not_logged_as_error() {
        let errors = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(ErrorCounter(Arc::clone(&errors)));
        let _guard = tracing::subscriber::set_default(subscriber);

        let server = HttpServer::new(ProxyConfig::default(), RouteTable::default());
        let req = Request::builder()
            .uri("/")
            .header("host", "unknown.example")
            .body(Body::empty())
            .unwrap();
        let response = server.app.clone().oneshot(req).await.unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::BAD_GATEWAY);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }
}
