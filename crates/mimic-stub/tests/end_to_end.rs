//! End-to-end tests against an in-process server on an ephemeral port.
//!
//! Covers contract validation and fallback, transient lifecycle over HTTP,
//! event stream replay and graceful shutdown.

use assert_json_diff::assert_json_eq;
use mimic_stub::config::PassThroughConfig;
use mimic_stub::{MimicConfig, StubEngine, StubServer};
use reqwest::Client;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const CONTRACT: &str = r#"
name: items
scenarios:
  - name: fetch item
    method: GET
    path: /items/(id:number)
    response:
      status: 200
      body: {name: "(string)"}
"#;

struct TestServer {
    base: String,
    client: Client,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
    _contract: tempfile::NamedTempFile,
}

impl TestServer {
    async fn start(configure: impl FnOnce(&mut MimicConfig)) -> Self {
        let mut contract = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        contract.write_all(CONTRACT.as_bytes()).unwrap();

        let mut config = MimicConfig {
            contracts: vec![contract.path().display().to_string()],
            shutdown_grace_ms: 1_000,
            ..MimicConfig::default()
        };
        configure(&mut config);

        let engine = Arc::new(StubEngine::load(config).unwrap());
        let server = StubServer::bind("127.0.0.1:0".parse().unwrap(), engine)
            .await
            .unwrap();
        let base = format!("http://{}", server.local_addr().unwrap());
        let shutdown = server.shutdown_handle();
        let handle = tokio::spawn(server.run());

        Self {
            base,
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap(),
            shutdown,
            handle,
            _contract: contract,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn test_expectation_served_exactly_and_fallback_generated() {
    let server = TestServer::start(|_| {}).await;

    let response = server
        .post(
            "/_mimic/expectations",
            json!({
                "http-request": {"method": "GET", "path": "/items/1"},
                "http-response": {"status": 200, "body": {"name": "pen"}}
            }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let registered: Value = response.json().await.unwrap();
    assert_eq!(registered["scenario"], "fetch item");
    assert!(registered["contract"].as_str().unwrap().ends_with(".yaml"));

    let response = server.get("/items/1").await;
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("x-mimic-type").is_none());
    let body: Value = response.json().await.unwrap();
    assert_json_eq!(body, json!({"name": "pen"}));

    let response = server.get("/items/2").await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-mimic-type"], "generated");
    let body: Value = response.json().await.unwrap();
    assert!(body["name"].is_string());

    server.stop().await;
}

#[tokio::test]
async fn test_expectation_outside_contract_is_rejected() {
    let server = TestServer::start(|_| {}).await;

    let response = server
        .post(
            "/_mimic/expectations",
            json!({
                "http-request": {"path": "/items/1"},
                "http-response": {"body": {"name": 42}}
            }),
        )
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    let message = body["errors"][0]["message"].as_str().unwrap();
    assert!(message.contains("fetch item"));
    assert!(message.contains("RESPONSE.BODY.name"));

    server.stop().await;
}

#[tokio::test]
async fn test_transient_single_use_then_flush() {
    let server = TestServer::start(|config| config.strict_mode = true).await;

    for name in ["first", "second"] {
        let response = server
            .post(
                "/_mimic/expectations",
                json!({
                    "http-request": {"path": "/items/5"},
                    "http-response": {"body": {"name": name}},
                    "token": "run-1"
                }),
            )
            .await;
        assert_eq!(response.status(), 200);
    }

    // Newest first, each served once
    let body: Value = server.get("/items/5").await.json().await.unwrap();
    assert_eq!(body["name"], "second");
    let body: Value = server.get("/items/5").await.json().await.unwrap();
    assert_eq!(body["name"], "first");
    assert_eq!(server.get("/items/5").await.status(), 400);

    server
        .post(
            "/_mimic/expectations",
            json!({
                "http-request": {"path": "/items/6"},
                "http-response": {"body": {"name": "kept"}},
                "token": "run-2"
            }),
        )
        .await;
    let response = server
        .client
        .delete(server.url("/_mimic/transient/run-2"))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["removed"], 1);
    assert_eq!(server.get("/items/6").await.status(), 400);

    server.stop().await;
}

/// Read from an event stream until `blocks` complete events have arrived
async fn read_events(response: &mut reqwest::Response, blocks: usize) -> String {
    let mut text = String::new();
    while text.matches("\n\n").count() < blocks {
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .unwrap()
            .unwrap()
            .expect("stream ended early");
        text.push_str(&String::from_utf8_lossy(&chunk));
    }
    text
}

#[tokio::test]
async fn test_event_stream_replays_backlog_then_live() {
    let server = TestServer::start(|config| config.events.backlog = 2).await;

    for id in 1..=3 {
        let response = server
            .post("/_mimic/sse-expectations", json!({"id": id, "data": format!("event {id}")}))
            .await;
        assert_eq!(response.status(), 200);
    }

    let mut stream = server.get("/_mimic/events").await;
    assert_eq!(stream.headers()["content-type"], "text/event-stream");
    let replayed = read_events(&mut stream, 2).await;
    assert_eq!(replayed, "id: 2\ndata: event 2\n\nid: 3\ndata: event 3\n\n");

    let body: Value = server
        .post("/_mimic/sse-expectations", json!({"event": "live", "data": "a\nb"}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["delivered"], 1);
    let live = read_events(&mut stream, 1).await;
    assert_eq!(live, "event: live\ndata: a\ndata: b\n\n");

    // Shutdown closes the stream and the server drains
    server.shutdown.send(()).unwrap();
    let end = tokio::time::timeout(Duration::from_secs(5), stream.chunk())
        .await
        .unwrap();
    assert!(matches!(end, Ok(None) | Err(_)));
    tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_introspection() {
    let server = TestServer::start(|_| {}).await;

    let health: Value = server.get("/_mimic/health").await.json().await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["contracts"], 1);

    let contracts: Value = server.get("/_mimic/contracts").await.json().await.unwrap();
    assert_eq!(contracts["contracts"][0]["name"], "items");
    assert_eq!(
        contracts["contracts"][0]["scenarios"][0]["path"],
        "/items/(id:number)"
    );

    server.get("/items/3").await;
    let log: Value = server.get("/_mimic/log").await.json().await.unwrap();
    assert_eq!(log.as_array().unwrap().len(), 1);
    assert_eq!(log[0]["resolution"], "generated");

    server.stop().await;
}

/// Minimal upstream answering one request: 201, two cookies, and the
/// request line it received as the body.
async fn start_upstream() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while !received.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        let text = String::from_utf8_lossy(&received);
        let request_line = text.lines().next().unwrap_or_default().to_string();
        let response = format!(
            "HTTP/1.1 201 Created\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\
             Content-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            request_line.len(),
            request_line
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    });
    (format!("http://{addr}"), handle)
}

#[tokio::test]
async fn test_pass_through_relays_upstream_before_strict_mode() {
    let (upstream, upstream_handle) = start_upstream().await;
    let server = TestServer::start(|config| {
        config.strict_mode = true;
        config.pass_through = Some(PassThroughConfig::new(upstream));
    })
    .await;

    let response = server.get("/items/1?b=2&a=1&a=3").await;
    assert_eq!(response.status(), 201);
    assert_eq!(response.headers()["x-mimic-proxied"], "true");
    let cookies: Vec<_> = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(cookies, vec!["a=1", "b=2"]);
    assert_eq!(
        response.text().await.unwrap(),
        "GET /items/1?b=2&a=1&a=3 HTTP/1.1"
    );
    upstream_handle.await.unwrap();

    let log: Value = server.get("/_mimic/log").await.json().await.unwrap();
    assert_eq!(log[0]["resolution"], "pass-through");

    server.stop().await;
}
