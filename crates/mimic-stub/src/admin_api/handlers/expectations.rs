//! Expectation registration and transient flushing.

use crate::admin_api::types::{could_not_parse, json_document, RegisteredExpectation};
use crate::engine::{RegistrationError, StubEngine};
use crate::expectation::ExpectationDocument;
use crate::http::{HttpRequest, HttpResponse};
use serde_json::json;
use tracing::warn;

/// POST /expectations - validate against the contracts and register
pub fn handle_add(request: &HttpRequest, engine: &StubEngine) -> HttpResponse {
    let doc = match json_document(request) {
        Ok(doc) => doc,
        Err(response) => return response,
    };
    let document = match ExpectationDocument::from_value(doc) {
        Ok(document) => document,
        Err(e) => return could_not_parse(&format!("invalid expectation: {e}")),
    };

    match engine.register_expectation(document) {
        Ok(expectation) => {
            let scenario = expectation.provenance.validated_against.clone();
            HttpResponse::json(
                200,
                &RegisteredExpectation {
                    contract: scenario.as_ref().map(|s| s.contract.clone()),
                    scenario: scenario.map(|s| s.scenario),
                    id: expectation.id,
                    token: expectation.token.clone(),
                },
            )
        }
        Err(RegistrationError::Invalid(e)) => {
            warn!(error = %e, "Rejected expectation");
            HttpResponse::error(400, &e.to_string())
        }
        Err(RegistrationError::Rejected(rejections)) => {
            warn!(scenarios = rejections.len(), "Expectation fits no contract scenario");
            let errors: Vec<_> = rejections
                .iter()
                .map(|r| json!({"code": "400", "message": r.to_string()}))
                .collect();
            HttpResponse::json(400, &json!({ "errors": errors }))
        }
    }
}

/// DELETE /transient/:token
pub fn handle_flush(token: &str, engine: &StubEngine) -> HttpResponse {
    let removed = engine.store().flush(token);
    HttpResponse::json(200, &json!({ "token": token, "removed": removed }))
}
