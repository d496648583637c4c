//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use relay_http::config::ServerConfig;
use relay_http::http::parts::RequestPart;
use relay_http::http::{RequestHead, Responder, ServeError};
use relay_http::net::Listener;
use relay_http::{HttpServer, Shutdown};

/// Request head part for `method path`.
pub fn head(method: Method, path: &str) -> RequestPart {
    RequestPart::Head(RequestHead::new(method, path.parse().unwrap()))
}

/// A server running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), ServeError>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start `responder` behind a real listener bound to 127.0.0.1:0.
pub async fn start_server(mut config: ServerConfig, responder: Arc<dyn Responder>) -> TestServer {
    config.listener.bind_address = "127.0.0.1:0".to_string();
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, config.listener.max_connections);

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, responder);
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    TestServer {
        addr,
        shutdown,
        handle,
    }
}

/// Client that never reuses connections between tests.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// Send one HTTP/1.1 request on a raw socket and read the response head,
/// leaving the keep-alive connection open.
///
/// The responder must answer `204 No Content` so no body follows the head.
pub async fn keep_alive_request(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|window| window == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "connection closed before the response head");
        head.extend_from_slice(&buf[..n]);
    }
    assert!(head.starts_with(b"HTTP/1.1 204"), "unexpected response: {:?}", String::from_utf8_lossy(&head));
    stream
}

/// Whether the server closes `stream` within `limit`.
pub async fn closed_within(stream: &mut TcpStream, limit: Duration) -> bool {
    let mut buf = [0u8; 64];
    matches!(
        tokio::time::timeout(limit, stream.read(&mut buf)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}
