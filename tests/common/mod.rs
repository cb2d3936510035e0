//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use keepalive_core::config::ServerConfig;
use keepalive_core::http::{Handler, HttpServer, ServerError};
use keepalive_core::lifecycle::Shutdown;
use keepalive_core::net::SlotPool;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const HELLO: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 13\r\n\r\nHello, World!";

/// A server running on an ephemeral loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub slots: SlotPool,
    pub shutdown: Shutdown,
    pub config_updates: mpsc::UnboundedSender<ServerConfig>,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.unwrap()
    }

    /// Trigger shutdown and wait for the accept loop to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Loopback config with timeouts short enough for tests.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.port = 0;
    config.listener.max_concurrency = 16;
    config.timeouts.idle_ms = 5_000;
    config.timeouts.header_read_ms = 2_000;
    config.timeouts.body_read_ms = 2_000;
    config.timeouts.write_ms = 2_000;
    config.timeouts.request_ms = 2_000;
    config.timeouts.drain_ms = 500;
    config
}

pub async fn start_server<H: Handler>(config: ServerConfig, handler: H) -> TestServer {
    let server = HttpServer::bind(config, handler).await.unwrap();
    let addr = server.local_addr().unwrap();
    let slots = server.slots();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let (config_updates, updates_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(server.run(updates_rx, server_shutdown));

    TestServer {
        addr,
        slots,
        shutdown,
        config_updates,
        handle,
    }
}

/// Send `raw` on a fresh connection and read until the server closes it.
pub async fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    read_to_close(&mut stream).await
}

pub async fn read_to_close(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("connection was not closed")
        .unwrap();
    String::from_utf8(out).unwrap()
}

/// Read exactly `len` bytes.
pub async fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("response did not arrive")
        .unwrap();
    buf
}

/// Read one `Content-Length` framed response. Returns the head and body.
pub async fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let mut byte = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut byte))
            .await
            .expect("response head did not arrive")
            .unwrap();
        assert_eq!(n, 1, "connection closed mid-head");
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    let len = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().unwrap())
        })
        .unwrap_or(0);
    let body = read_exact(stream, len).await;
    (head, body)
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
