//! Event publishing handler.

use crate::admin_api::types::{could_not_parse, json_document};
use crate::engine::StubEngine;
use crate::events::ServerEvent;
use crate::http::{HttpRequest, HttpResponse};
use tracing::debug;

/// POST /sse-expectations - publish `{"id"?, "event"?, "data"}` to every subscriber
pub fn handle_publish(request: &HttpRequest, engine: &StubEngine) -> HttpResponse {
    let doc = match json_document(request) {
        Ok(doc) => doc,
        Err(response) => return response,
    };
    let event = match ServerEvent::from_document(doc) {
        Ok(event) => event,
        Err(e) => return could_not_parse(&format!("invalid event: {e}")),
    };

    let delivered = engine.events().publish(event);
    debug!(delivered, "Published event");
    HttpResponse::json(200, &serde_json::json!({ "delivered": delivered }))
}
