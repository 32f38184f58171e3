//! Tests for the resolution pipeline.
//!
//! Covers:
//! - Route ordering: introspection, handlers, admin mutations, traffic
//! - Expectation registration and serving through the admin API
//! - Strict rejection, external commands, hooks, delays and facts

use super::*;
use crate::config::{HookConfig, MimicConfig};
use crate::contract::ContractSet;
use crate::engine::StubEngine;
use crate::hooks::FailMode;
use crate::http::{HttpRequest, HttpResponse, ResponseBody};
use crate::log::Resolution;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn engine_with(config: MimicConfig) -> Arc<StubEngine> {
    Arc::new(StubEngine::new(config, ContractSet::default(), Vec::new()))
}

fn engine() -> Arc<StubEngine> {
    engine_with(MimicConfig::default())
}

async fn get(engine: &Arc<StubEngine>, path: &str) -> HttpResponse {
    handle_request(HttpRequest::new("GET", path), Arc::clone(engine)).await
}

async fn post(engine: &Arc<StubEngine>, path: &str, body: Value) -> HttpResponse {
    handle_request(
        HttpRequest::new("POST", path).with_json_body(body),
        Arc::clone(engine),
    )
    .await
}

async fn expect(engine: &Arc<StubEngine>, doc: Value) -> Value {
    let response = post(engine, "/_mimic/expectations", doc).await;
    assert_eq!(response.status, 200, "{:?}", response.body_value());
    response.body_value()
}

fn item(id: u32, name: &str) -> Value {
    json!({
        "http-request": {"path": format!("/items/{id}")},
        "http-response": {"status": 200, "body": {"name": name}}
    })
}

// ============================================================================
// Admin surface
// ============================================================================

#[tokio::test]
async fn test_registered_expectation_is_served_and_logged() {
    let engine = engine();
    let registered = expect(&engine, item(1, "pen")).await;
    assert_eq!(registered["contract"], Value::Null);
    assert_eq!(registered["token"], Value::Null);

    let response = get(&engine, "/items/1").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body_value(), json!({"name": "pen"}));
    assert_eq!(response.header("content-type"), Some("application/json"));

    let entries = engine.log().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].resolution, Resolution::Expectation);
    assert_eq!(entries[0].expectation_id, registered["id"].as_u64());

    let log = get(&engine, "/_mimic/log").await.body_value();
    assert_eq!(log.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_unparsable_admin_document() {
    let engine = engine();
    let response = handle_request(
        HttpRequest::from_parts(
            "POST",
            "/_mimic/expectations",
            "",
            Default::default(),
            bytes::Bytes::from("{not json"),
        )
        .unwrap(),
        Arc::clone(&engine),
    )
    .await;
    assert_eq!(response.status, 400);
    let message = response.body_value()["errors"][0]["message"].clone();
    assert!(message.as_str().unwrap().starts_with("could not parse"));

    let response = post(&engine, "/_mimic/expectations", json!({"http-response": {}})).await;
    assert_eq!(response.status, 400);
    assert_eq!(engine.store().len_by_population().dynamic, 0);
}

#[tokio::test]
async fn test_unknown_admin_route_is_not_traffic() {
    let engine = engine();
    let response = get(&engine, "/_mimic/nothing").await;
    assert_eq!(response.status, 404);
    assert!(engine.log().is_empty());
}

#[tokio::test]
async fn test_health_counts_populations() {
    let engine = engine();
    expect(&engine, item(1, "pen")).await;
    let mut transient = item(2, "cup");
    transient["token"] = json!("run-1");
    expect(&engine, transient).await;

    let health = get(&engine, "/_mimic/health").await.body_value();
    assert_eq!(health["status"], "ok");
    assert_eq!(
        health["expectations"],
        json!({"static": 0, "dynamic": 1, "transient": 1})
    );
}

#[tokio::test]
async fn test_flush_transient_route() {
    let engine = engine();
    for id in 1..=2 {
        let mut doc = item(id, "x");
        doc["token"] = json!("run 1");
        expect(&engine, doc).await;
    }
    let response = handle_request(
        HttpRequest::new("DELETE", "/_mimic/transient/run%201"),
        Arc::clone(&engine),
    )
    .await;
    assert_eq!(response.body_value()["removed"], json!(2));
    assert_eq!(engine.store().len_by_population().transient, 0);
}

#[tokio::test]
async fn test_publish_reaches_subscriber() {
    let engine = engine();
    let stream = get(&engine, "/_mimic/events").await;
    assert_eq!(stream.header("content-type"), Some("text/event-stream"));

    let response = post(
        &engine,
        "/_mimic/sse-expectations",
        json!({"event": "update", "data": {"id": 1}}),
    )
    .await;
    assert_eq!(response.body_value(), json!({"delivered": 1}));

    let ResponseBody::Events(mut subscription) = stream.body else {
        panic!("expected an event stream");
    };
    let event = subscription.recv().await.unwrap();
    assert_eq!(event.to_sse(), "event: update\ndata: {\"id\":1}\n\n");
}

#[tokio::test]
async fn test_multiline_event_name_is_rejected() {
    let engine = engine();
    let response = post(
        &engine,
        "/_mimic/sse-expectations",
        json!({"event": "a\ndata: injected", "data": "x"}),
    )
    .await;
    assert_eq!(response.status, 400);
    let message = response.body_value()["errors"][0]["message"].clone();
    assert!(message.as_str().unwrap().contains("event must be a single line"));
    assert!(engine.events().backlog().is_empty());
}

// ============================================================================
// Route ordering
// ============================================================================

struct Teapot;

#[async_trait]
impl RequestHandler for Teapot {
    fn name(&self) -> &str {
        "teapot"
    }

    async fn handle(&self, _request: &HttpRequest) -> Option<HttpResponse> {
        Some(HttpResponse::text(418, "teapot"))
    }
}

#[tokio::test]
async fn test_handlers_sit_between_introspection_and_mutations() {
    let engine = Arc::new(
        StubEngine::new(MimicConfig::default(), ContractSet::default(), Vec::new())
            .with_handler(Arc::new(Teapot)),
    );
    assert_eq!(get(&engine, "/_mimic/health").await.status, 200);
    assert_eq!(post(&engine, "/_mimic/state", json!({})).await.status, 418);
    assert_eq!(get(&engine, "/items/1").await.status, 418);
}

// ============================================================================
// Traffic
// ============================================================================

#[tokio::test]
async fn test_strict_mode_reports_candidates() {
    let engine = engine_with(MimicConfig {
        strict_mode: true,
        ..MimicConfig::default()
    });
    expect(&engine, item(1, "pen")).await;

    let response = get(&engine, "/items/2").await;
    assert_eq!(response.status, 400);
    let text = String::from_utf8_lossy(response.body_bytes().unwrap()).into_owned();
    assert!(text.contains("REQUEST.PATH[1]"));
    assert_eq!(engine.log().entries()[0].resolution, Resolution::Strict);
}

#[tokio::test]
async fn test_facts_cleared_after_traffic_only() {
    let engine = engine();
    let response = post(&engine, "/_mimic/state", json!({"role": "admin"})).await;
    assert_eq!(response.status, 200);
    assert_eq!(post(&engine, "/_mimic/state", json!([1])).await.status, 400);

    get(&engine, "/_mimic/health").await;
    assert_eq!(engine.facts().snapshot().len(), 1);

    get(&engine, "/anything").await;
    assert!(engine.facts().snapshot().is_empty());
}

#[tokio::test]
async fn test_external_command_response() {
    let engine = engine();
    expect(
        &engine,
        json!({
            "http-request": {"method": "POST", "path": "/jobs"},
            "http-response": {
                "external-command": r#"echo '{"http-response": {"status": 201, "body": {"job": "made"}}}'"#
            }
        }),
    )
    .await;

    let response = post(&engine, "/jobs", json!({})).await;
    assert_eq!(response.status, 201);
    assert_eq!(response.body_value(), json!({"job": "made"}));
    assert_eq!(response.header("content-type"), Some("application/json"));
}

#[tokio::test]
async fn test_failed_command_does_not_consume_single_use() {
    let engine = engine();
    expect(
        &engine,
        json!({
            "http-request": {"path": "/jobs"},
            "http-response": {"external-command": "echo broken >&2; exit 3"},
            "token": "run-1"
        }),
    )
    .await;

    for _ in 0..2 {
        let response = get(&engine, "/jobs").await;
        assert_eq!(response.status, 500);
        assert_eq!(response.body_value()["exitCode"], json!(3));
    }
    assert_eq!(engine.store().len_by_population().transient, 1);
}

#[tokio::test]
async fn test_expectation_and_global_delay_add_up() {
    let engine = engine_with(MimicConfig {
        delay_ms: Some(30),
        ..MimicConfig::default()
    });
    let mut doc = item(1, "slow");
    doc["delay-in-milliseconds"] = json!(40);
    expect(&engine, doc).await;

    let started = Instant::now();
    assert_eq!(get(&engine, "/items/1").await.status, 200);
    assert!(started.elapsed() >= Duration::from_millis(70));
}

#[tokio::test]
async fn test_request_hook_rewrites_before_lookup() {
    let mut config = MimicConfig::default();
    config.hooks.request = Some(HookConfig {
        command: "sed 's#/old#/items#'".to_string(),
        timeout_ms: 5_000,
        fail_mode: FailMode::Closed,
    });
    let engine = engine_with(config);
    expect(&engine, item(1, "pen")).await;

    let response = get(&engine, "/old/1").await;
    assert_eq!(response.body_value(), json!({"name": "pen"}));
}

#[tokio::test]
async fn test_no_contracts_and_no_match() {
    let engine = engine();
    let response = get(&engine, "/nothing").await;
    assert_eq!(response.status, 400);
    assert_eq!(engine.log().entries()[0].resolution, Resolution::Generated);
}
