//! Facts handler.

use crate::admin_api::types::{could_not_parse, json_document};
use crate::engine::StubEngine;
use crate::http::{HttpRequest, HttpResponse};
use serde_json::Value;
use tracing::info;

/// POST /state - set the facts used by the next traffic request
pub fn handle_set(request: &HttpRequest, engine: &StubEngine) -> HttpResponse {
    let facts = match json_document(request) {
        Ok(Value::Object(facts)) => facts,
        Ok(_) => return could_not_parse("facts must be a JSON object"),
        Err(response) => return response,
    };

    info!(keys = facts.len(), "Facts set");
    engine.facts().set(facts.clone());
    HttpResponse::json(200, &serde_json::json!({ "facts": facts }))
}
