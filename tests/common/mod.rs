//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use vhost_proxy::config::{sitefile, ProxyConfig};
use vhost_proxy::net::Listener;
use vhost_proxy::{HttpServer, RouteTable, SharedRouteTable, Shutdown};

/// A running mock backend.
pub struct MockBackend {
    pub addr: SocketAddr,
    /// Connections accepted so far.
    pub accepted: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Start a mock backend that answers every request with `200`, the given
/// extra headers and `body`, then closes the connection.
pub async fn start_mock_backend(headers: &'static [(&'static str, &'static str)], body: &'static str) -> MockBackend {
    start_slow_backend(Duration::ZERO, headers, body).await
}

/// Like [`start_mock_backend`], but waits `delay` before answering.
pub async fn start_slow_backend(
    delay: Duration,
    headers: &'static [(&'static str, &'static str)],
    body: &'static str,
) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                read_head(&mut socket).await;
                tokio::time::sleep(delay).await;
                let mut response = String::from("HTTP/1.1 200 OK\r\n");
                for (name, value) in headers {
                    response.push_str(&format!("{}: {}\r\n", name, value));
                }
                response.push_str(&format!(
                    "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                ));
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    MockBackend { addr, accepted }
}

#[derive(Debug, PartialEq, Eq)]
pub enum BackendEvent {
    /// A full request head arrived.
    Request,
    /// The proxy closed the connection.
    Closed,
}

/// Start a backend that reads requests but never answers, reporting what
/// happens on each connection.
pub async fn start_hanging_backend() -> (SocketAddr, mpsc::UnboundedReceiver<BackendEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let _ = tx.send(BackendEvent::Request);
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => continue,
                    }
                }
                let _ = tx.send(BackendEvent::Closed);
            });
        }
    });

    (addr, rx)
}

/// Read until the end of the request head.
async fn read_head(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

pub fn routes(site_file: &str) -> RouteTable {
    RouteTable::new(sitefile::parse(site_file).unwrap().into_routes()).unwrap()
}

/// A proxy running on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub updates: mpsc::UnboundedSender<RouteTable>,
    /// The live table, for swapping routes without the update channel.
    pub routes: Arc<SharedRouteTable>,
    pub task: tokio::task::JoinHandle<()>,
}

pub async fn start_proxy(site_file: &str) -> TestProxy {
    start_proxy_with(site_file, |_| {}).await
}

/// Start a proxy after letting `configure` adjust the settings.
pub async fn start_proxy_with(site_file: &str, configure: impl FnOnce(&mut ProxyConfig)) -> TestProxy {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.timeouts.shutdown_grace_secs = 2;
    configure(&mut config);

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let (updates, route_updates) = mpsc::unbounded_channel();

    let server = HttpServer::new(config, routes(site_file));
    let live_routes = server.routes();
    let server_shutdown = shutdown.subscribe();
    let task = tokio::spawn(async move {
        let _ = server.run(listener, route_updates, server_shutdown).await;
    });

    TestProxy {
        addr,
        shutdown,
        updates,
        routes: live_routes,
        task,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Send `request` verbatim and return the raw response text. Needed for
/// paths a normal client would clean up first.
pub async fn raw_request(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
    String::from_utf8_lossy(&response).into_owned()
}
