//! End-to-end tests: real listener, real sockets.

use std::time::Duration;

use axum::http::StatusCode;
use tokio::io::AsyncWriteExt;

mod common;

#[tokio::test]
async fn frontier_headers_are_rewritten() {
    let backend = common::start_mock_backend(&[("Via", "1.1 x"), ("X-Backend", "frontier")], "hello").await;
    let proxy = common::start_proxy(&format!(
        "frontier.example:80 {{\n    reverse_proxy {}\n    header {{\n        Server nginx\n        -Via\n        Connection keep-alive\n    }}\n}}\n",
        backend.addr
    ))
    .await;

    let res = common::client()
        .get(format!("http://{}/api?x=1", proxy.addr))
        .header("Host", "frontier.example")
        .send()
        .await
        .expect("Proxy unreachable");

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["server"], "nginx");
    assert_eq!(res.headers()["connection"], "keep-alive");
    assert_eq!(res.headers()["x-backend"], "frontier");
    assert!(res.headers().get("via").is_none());
    assert!(res.headers().get("x-request-id").is_none());
    assert_eq!(res.text().await.unwrap(), "hello");
}

#[tokio::test]
async fn undeclared_host_is_bad_gateway() {
    let backend = common::start_mock_backend(&[], "ok").await;
    let proxy = common::start_proxy(&format!("frontier.example {{\n    reverse_proxy {}\n}}\n", backend.addr)).await;

    let res = common::client()
        .get(format!("http://{}/", proxy.addr))
        .header("Host", "unknown.example")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(backend.accepted(), 0, "unknown host must not reach a backend");

    let res = common::client()
        .get(format!("http://{}/", proxy.addr))
        .header("Host", "FRONTIER.example:8080")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(backend.accepted(), 1);
}

#[tokio::test]
async fn dead_backend_is_bad_gateway() {
    let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = unused.local_addr().unwrap().port();
    drop(unused);

    let proxy = common::start_proxy(&format!("down.example {{\n    reverse_proxy 127.0.0.1:{}\n}}\n", port)).await;
    let res = common::client()
        .get(format!("http://{}/", proxy.addr))
        .header("Host", "down.example")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn silent_backend_times_out_as_bad_gateway() {
    let (backend, mut events) = common::start_hanging_backend().await;
    let proxy = common::start_proxy_with(
        &format!("slow.example {{\n    reverse_proxy {}\n}}\n", backend),
        |config| config.timeouts.request_secs = 1,
    )
    .await;

    let started = std::time::Instant::now();
    let res = common::client()
        .get(format!("http://{}/", proxy.addr))
        .header("Host", "slow.example")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(events.recv().await, Some(common::BackendEvent::Request));
}

#[tokio::test]
async fn client_disconnect_closes_backend_connection() {
    let (backend, mut events) = common::start_hanging_backend().await;
    let proxy = common::start_proxy(&format!("slow.example {{\n    reverse_proxy {}\n}}\n", backend)).await;

    let mut client = tokio::net::TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: slow.example\r\n\r\n")
        .await
        .unwrap();
    let seen = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    assert_eq!(seen, Some(common::BackendEvent::Request));

    drop(client);

    let seen = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("backend connection left open after client went away");
    assert_eq!(seen, Some(common::BackendEvent::Closed));
}

#[tokio::test]
async fn static_site_is_served() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>static</h1>").unwrap();
    std::fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();
    let proxy = common::start_proxy(&format!(
        "http://static.example {{\n    root * {}\n    file_server\n    header Cache-Control \"public, max-age=60\"\n}}\n",
        dir.path().display()
    ))
    .await;
    let client = common::client();

    let res = client
        .get(format!("http://{}/", proxy.addr))
        .header("Host", "static.example")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/html");
    assert_eq!(res.headers()["cache-control"], "public, max-age=60");
    assert_eq!(res.text().await.unwrap(), "<h1>static</h1>");

    let res = client
        .get(format!("http://{}/app.js", proxy.addr))
        .header("Host", "static.example")
        .send()
        .await
        .unwrap();
    assert!(res.headers()["content-type"].to_str().unwrap().contains("javascript"));

    let res = client
        .get(format!("http://{}/missing.html", proxy.addr))
        .header("Host", "static.example")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(format!("http://{}/", proxy.addr))
        .header("Host", "static.example")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.headers()["allow"], "GET, HEAD");
}

#[tokio::test]
async fn traversal_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "x").unwrap();
    let proxy = common::start_proxy(&format!(
        "static.example {{\n    root {}\n    file_server\n}}\n",
        dir.path().display()
    ))
    .await;

    let response = common::raw_request(
        proxy.addr,
        "GET /../../etc/passwd HTTP/1.1\r\nHost: static.example\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 403"), "{}", response);
}

#[tokio::test]
async fn keep_alive_serves_requests_in_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "first").unwrap();
    std::fs::write(dir.path().join("b.txt"), "second").unwrap();
    let proxy = common::start_proxy(&format!(
        "static.example {{\n    root {}\n    file_server\n}}\n",
        dir.path().display()
    ))
    .await;

    // Two pipelined requests on one connection.
    let response = common::raw_request(
        proxy.addr,
        "GET /a.txt HTTP/1.1\r\nHost: static.example\r\n\r\nGET /b.txt HTTP/1.1\r\nHost: static.example\r\nConnection: close\r\n\r\n",
    )
    .await;
    let first = response.find("first").expect("first response");
    let second = response.find("second").expect("second response");
    assert!(first < second);
}

#[tokio::test]
async fn reload_swaps_routes() {
    let backend = common::start_mock_backend(&[], "new").await;
    let proxy = common::start_proxy("").await;
    let client = common::client();

    let res = client
        .get(format!("http://{}/", proxy.addr))
        .header("Host", "late.example")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    proxy
        .updates
        .send(common::routes(&format!("late.example {{\n    reverse_proxy {}\n}}\n", backend.addr)))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let res = client
        .get(format!("http://{}/", proxy.addr))
        .header("Host", "late.example")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "new");
}

#[tokio::test]
async fn reload_does_not_disturb_in_flight_request() {
    let backend = common::start_slow_backend(Duration::from_millis(500), &[], "slow").await;
    let proxy = common::start_proxy(&format!("slow.example {{\n    reverse_proxy {}\n}}\n", backend.addr)).await;

    let url = format!("http://{}/", proxy.addr);
    let in_flight = tokio::spawn(async move {
        common::client().get(url).header("Host", "slow.example").send().await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The new table no longer knows the host.
    assert!(proxy.routes.replace(common::routes("")));

    let res = in_flight.await.unwrap().unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "slow");

    let res = common::client()
        .get(format!("http://{}/", proxy.addr))
        .header("Host", "slow.example")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn shutdown_stops_server() {
    let proxy = common::start_proxy("").await;
    proxy.shutdown.trigger();

    tokio::time::timeout(Duration::from_secs(5), proxy.task)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(tokio::net::TcpStream::connect(proxy.addr).await.is_err());
}
