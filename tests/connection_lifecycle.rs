//! End-to-end tests for connection handling over real sockets.

use std::time::Duration;

use bytes::Bytes;
use keepalive_core::http::{BoxError, HandlerResult, HelloWorld, Request, Response, StatusCode};
use tokio::io::AsyncWriteExt;

mod common;

use common::{exchange, read_exact, read_response, read_to_close, start_server, test_config, HELLO};

#[tokio::test]
async fn test_hello_world_exact_bytes_with_keep_alive() {
    let server = start_server(test_config(), HelloWorld).await;
    let mut stream = server.connect().await;

    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    assert_eq!(read_exact(&mut stream, HELLO.len()).await, HELLO);

    // Same connection serves a second request.
    stream
        .write_all(b"GET /again HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    assert_eq!(read_exact(&mut stream, HELLO.len()).await, HELLO);
    assert_eq!(server.slots.outstanding(), 1);

    drop(stream);
    server.stop().await;
}

#[tokio::test]
async fn test_request_split_across_writes() {
    let server = start_server(test_config(), HelloWorld).await;
    let mut stream = server.connect().await;

    for piece in [&b"GE"[..], b"T / HTTP/1.", b"1\r\nHost: x\r", b"\n\r\n"] {
        stream.write_all(piece).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(read_exact(&mut stream, HELLO.len()).await, HELLO);

    drop(stream);
    server.stop().await;
}

#[tokio::test]
async fn test_connection_close_honored() {
    let server = start_server(test_config(), HelloWorld).await;

    let reply = exchange(server.addr, b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert_eq!(
        reply,
        "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 13\r\n\r\nHello, World!"
    );

    server.stop().await;
}

#[tokio::test]
async fn test_http10_closes_by_default() {
    let server = start_server(test_config(), HelloWorld).await;

    let reply = exchange(server.addr, b"GET / HTTP/1.0\r\n\r\n").await;
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(reply.contains("Connection: close\r\n"));

    server.stop().await;
}

#[tokio::test]
async fn test_http10_keep_alive_opt_in() {
    let server = start_server(test_config(), HelloWorld).await;
    let mut stream = server.connect().await;

    for _ in 0..2 {
        stream
            .write_all(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n")
            .await
            .unwrap();
        let (head, body) = read_response(&mut stream).await;
        assert!(head.contains("Connection: keep-alive\r\n"));
        assert_eq!(body, b"Hello, World!");
    }

    drop(stream);
    server.stop().await;
}

#[tokio::test]
async fn test_pipelined_requests_answered_in_order() {
    let echo_path =
        |req: Request| async move { HandlerResult::Ok(Response::ok(req.path().to_string())) };
    let server = start_server(test_config(), echo_path).await;

    let reply = exchange(
        server.addr,
        b"GET /first HTTP/1.1\r\n\r\nGET /second HTTP/1.1\r\n\r\nGET /third HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;

    let first = reply.find("/first").unwrap();
    let second = reply.find("/second").unwrap();
    let third = reply.find("/third").unwrap();
    assert!(first < second && second < third);
    assert_eq!(reply.matches("HTTP/1.1 200 OK").count(), 3);

    server.stop().await;
}

#[tokio::test]
async fn test_chunked_request_body_decoded() {
    let body_len =
        |req: Request| async move { HandlerResult::Ok(Response::ok(req.body().len().to_string())) };
    let server = start_server(test_config(), body_len).await;

    let reply = exchange(
        server.addr,
        b"POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
          5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
    )
    .await;
    assert!(reply.ends_with("\r\n\r\n11"));

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_request_gets_400_and_close() {
    let server = start_server(test_config(), HelloWorld).await;

    for raw in [
        &b"BREW /pot HTTP/1.1\r\n\r\n"[..],
        b"GET / HTTP/1.1\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n",
        b"GET / HTTP/1.1\r\nBad Header\r\n\r\n",
        b"GET / HTTP/2.0\r\n\r\n",
    ] {
        let reply = exchange(server.addr, raw).await;
        assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{reply}");
        assert!(reply.contains("Connection: close\r\n"));
    }

    assert!(common::eventually(|| server.slots.outstanding() == 0).await);
    server.stop().await;
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let mut config = test_config();
    config.limits.max_body_size = 16;
    let server = start_server(config, HelloWorld).await;

    let reply = exchange(
        server.addr,
        b"POST / HTTP/1.1\r\nContent-Length: 17\r\n\r\n",
    )
    .await;
    assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    server.stop().await;
}

#[tokio::test]
async fn test_handler_failures_become_500() {
    let flaky = |req: Request| async move {
        match req.path() {
            "/panic" => panic!("handler exploded"),
            "/error" => Err::<Response, BoxError>("backend unavailable".into()),
            _ => Ok(Response::ok("fine")),
        }
    };
    let server = start_server(test_config(), flaky).await;

    for path in ["/panic", "/error"] {
        let raw = format!("GET {path} HTTP/1.1\r\n\r\n");
        let reply = exchange(server.addr, raw.as_bytes()).await;
        assert!(reply.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "{reply}");
        assert!(reply.contains("Connection: close\r\n"));
    }

    // The server keeps serving after a handler panic.
    let reply = exchange(server.addr, b"GET /ok HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(reply.ends_with("\r\n\r\nfine"));
    assert!(common::eventually(|| server.slots.outstanding() == 0).await);

    server.stop().await;
}

#[tokio::test]
async fn test_streamed_response_is_chunked() {
    let streaming = |_req: Request| async {
        let parts = futures_util::stream::iter(vec![
            Ok::<_, BoxError>(Bytes::from_static(b"Hello, ")),
            Ok(Bytes::from_static(b"World!")),
        ]);
        HandlerResult::Ok(
            Response::new(StatusCode::OK)
                .header("Content-Type", "text/plain")
                .with_stream(parts),
        )
    };
    let server = start_server(test_config(), streaming).await;

    let reply = exchange(server.addr, b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert_eq!(
        reply,
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\
         Transfer-Encoding: chunked\r\n\r\n7\r\nHello, \r\n6\r\nWorld!\r\n0\r\n\r\n"
    );

    server.stop().await;
}

#[tokio::test]
async fn test_idle_connection_times_out() {
    let mut config = test_config();
    config.timeouts.idle_ms = 100;
    let server = start_server(config, HelloWorld).await;
    let mut stream = server.connect().await;

    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    assert_eq!(read_exact(&mut stream, HELLO.len()).await, HELLO);

    // Nothing more is sent: the server closes without writing anything.
    assert_eq!(read_to_close(&mut stream).await, "");
    assert!(common::eventually(|| server.slots.outstanding() == 0).await);

    server.stop().await;
}

#[tokio::test]
async fn test_slow_headers_get_408() {
    let mut config = test_config();
    config.timeouts.header_read_ms = 100;
    let server = start_server(config, HelloWorld).await;
    let mut stream = server.connect().await;

    stream.write_all(b"GET / HTTP/1.1\r\nHost:").await.unwrap();
    let reply = read_to_close(&mut stream).await;
    assert!(reply.starts_with("HTTP/1.1 408 Request Timeout\r\n"));

    server.stop().await;
}

#[tokio::test]
async fn test_slow_handler_gets_504() {
    let slow = |_req: Request| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        HandlerResult::Ok(Response::ok("late"))
    };
    let mut config = test_config();
    config.timeouts.request_ms = 100;
    let server = start_server(config, slow).await;

    let reply = exchange(server.addr, b"GET / HTTP/1.1\r\n\r\n").await;
    assert!(reply.starts_with("HTTP/1.1 504 Gateway Timeout\r\n"));

    server.stop().await;
}

#[tokio::test]
async fn test_expect_continue() {
    let echo = |req: Request| async move { HandlerResult::Ok(Response::ok(req.body().clone())) };
    let server = start_server(test_config(), echo).await;
    let mut stream = server.connect().await;

    stream
        .write_all(b"PUT /item HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 3\r\n\r\n")
        .await
        .unwrap();
    let interim = read_exact(&mut stream, 25).await;
    assert_eq!(interim, b"HTTP/1.1 100 Continue\r\n\r\n");

    stream.write_all(b"abc").await.unwrap();
    let (head, body) = read_response(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body, b"abc");

    drop(stream);
    server.stop().await;
}

#[tokio::test]
async fn test_reqwest_round_trip() {
    let server = start_server(test_config(), HelloWorld).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/", server.addr);

    for _ in 0..3 {
        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "Hello, World!");
    }

    let response = client.post(&url).body("payload").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn test_reqwest_reads_chunked_and_custom_headers() {
    let streaming = |req: Request| async move {
        let echoed = req.header("x-request-id").unwrap_or("none").to_string();
        let parts = futures_util::stream::iter(
            ["alpha", "-", "beta"]
                .into_iter()
                .map(|p| Ok::<_, BoxError>(Bytes::from_static(p.as_bytes()))),
        );
        HandlerResult::Ok(
            Response::new(StatusCode::CREATED)
                .header("X-Echo-Id", echoed)
                .with_stream(parts),
        )
    };
    let server = start_server(test_config(), streaming).await;

    let response = reqwest::Client::new()
        .get(format!("http://{}/stream", server.addr))
        .header("X-Request-ID", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert_eq!(response.headers()["x-echo-id"], "abc-123");
    assert!(response.headers().get("content-length").is_none());
    assert_eq!(response.text().await.unwrap(), "alpha-beta");

    server.stop().await;
}
