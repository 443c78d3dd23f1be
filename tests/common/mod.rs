//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use h1_wire::config::{RouteConfig, RouteKind, ServerConfig};
use h1_wire::net::Listener;
use h1_wire::{Handler, HttpServer, Router, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A server running on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the accept loop to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

pub fn route(name: &str, prefix: Option<&str>, kind: RouteKind, root: Option<&str>) -> RouteConfig {
    RouteConfig {
        name: name.into(),
        host: None,
        path_prefix: prefix.map(Into::into),
        kind,
        root: root.map(Into::into),
    }
}

/// Echo on `/`, WebSocket echo on `/ws`.
pub fn echo_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.routes = vec![
        route("ws", Some("/ws"), RouteKind::WebsocketEcho, None),
        route("echo", None, RouteKind::Echo, None),
    ];
    config
}

/// Start a server with routes compiled from `config`.
pub async fn start_server(config: ServerConfig) -> TestServer {
    let router = Router::from_config(&config.routes).unwrap();
    start_with_handler(config, router).await
}

pub async fn start_with_handler<H: Handler>(config: ServerConfig, handler: H) -> TestServer {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = Listener::from_tcp(tcp, config.listener.max_connections);
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server = HttpServer::new(config, handler);
    let handle = tokio::spawn(async move {
        server.run(listener, server_shutdown).await.unwrap();
    });

    TestServer { addr, shutdown, handle }
}

/// Send raw bytes, half-close, and collect everything the server sends back.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

/// HTTP client that ignores proxy environment variables.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
