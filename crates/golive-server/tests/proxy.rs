//! Reverse proxy tests against real upstream servers.

use std::time::Duration;

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderMap, header};
use golive_server::{LiveServer, ProxyRules, ServerConfig};
use pretty_assertions::assert_eq;

/// Start an upstream that answers `<name> <method> <path>?<query> <body>`.
async fn upstream(name: &'static str) -> String {
    let app = Router::new().fallback(move |headers: HeaderMap, request: Request| async move {
        let method = request.method().clone();
        let target = request
            .uri()
            .path_and_query()
            .map(ToString::to_string)
            .unwrap_or_default();
        let body = axum::body::to_bytes(request.into_body(), usize::MAX)
            .await
            .unwrap();
        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        (
            [("x-upstream-host", host)],
            format!("{name} {method} {target} {}", String::from_utf8_lossy(&body)),
        )
    });
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    format!("http://{addr}")
}

async fn start(rules: ProxyRules) -> (LiveServer, String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("local.txt"), "local").unwrap();
    let server = LiveServer::new(ServerConfig {
        root_dir: dir.path().to_path_buf(),
        preferred_port: 0,
        proxy_rules: rules,
        debounce: Duration::from_millis(50),
        ..ServerConfig::default()
    });
    let url = server.start(None).await.unwrap().info.url;
    (server, url, dir)
}

#[tokio::test]
async fn test_prefix_is_stripped_and_query_kept() {
    let target = upstream("users").await;
    let (server, url, _dir) = start([("/api", target.clone())].into_iter().collect()).await;

    let response = reqwest::get(format!("{url}/api/users?page=2")).await.unwrap();

    assert_eq!(response.status(), 200);
    // Upstream sees its own host, not the dev server's
    let host = response.headers()["x-upstream-host"].to_str().unwrap().to_owned();
    assert_eq!(format!("http://{host}"), target);
    assert_eq!(response.text().await.unwrap(), "users GET /users?page=2 ");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_first_registered_rule_wins() {
    let first = upstream("first").await;
    let second = upstream("second").await;
    let (server, url, _dir) = start(
        [("/api", first), ("/api/v2", second)]
            .into_iter()
            .collect(),
    )
    .await;

    let body = reqwest::get(format!("{url}/api/v2/foo"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(body, "first GET /v2/foo ");
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_method_and_body_are_forwarded() {
    let target = upstream("echo").await;
    let (server, url, _dir) = start([("/api", target)].into_iter().collect()).await;

    let body = reqwest::Client::new()
        .post(format!("{url}/api/items"))
        .body("{\"name\":\"x\"}")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(body, "echo POST /items {\"name\":\"x\"}");
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_local_file_wins_over_proxy() {
    let target = upstream("catch-all").await;
    let (server, url, _dir) = start([("/", target)].into_iter().collect()).await;

    let local = reqwest::get(format!("{url}/local.txt")).await.unwrap();
    assert_eq!(local.text().await.unwrap(), "local");

    let proxied = reqwest::get(format!("{url}/remote.txt")).await.unwrap();
    assert_eq!(proxied.text().await.unwrap(), "catch-all GET /remote.txt ");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    // Bind then drop to get a port with nothing listening
    let closed = {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.local_addr().unwrap()
    };
    let (server, url, _dir) =
        start([("/api", format!("http://{closed}"))].into_iter().collect()).await;

    let response = reqwest::get(format!("{url}/api/users")).await.unwrap();

    assert_eq!(response.status(), 502);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_unmatched_path_is_not_found() {
    let target = upstream("api").await;
    let (server, url, _dir) = start([("/api", target)].into_iter().collect()).await;

    let response = reqwest::get(format!("{url}/apix")).await.unwrap();

    assert_eq!(response.status(), 404);
    server.stop().await.unwrap();
}
