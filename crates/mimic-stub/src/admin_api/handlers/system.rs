//! Introspection handlers: health, logs, contracts.

use crate::admin_api::types::{ContractSummary, HealthResponse};
use crate::engine::StubEngine;
use crate::http::HttpResponse;

/// GET /health
pub fn handle_health(engine: &StubEngine) -> HttpResponse {
    HttpResponse::json(
        200,
        &HealthResponse {
            status: "ok",
            expectations: engine.store().len_by_population(),
            contracts: engine.contracts().contracts().len(),
            subscribers: engine.events().subscriber_count(),
            served: engine.log().len(),
        },
    )
}

/// GET /log - every served interaction, oldest first
pub fn handle_log(engine: &StubEngine) -> HttpResponse {
    HttpResponse::json(200, &engine.log().entries())
}

/// GET /load_log - messages from loading contracts and static examples
pub fn handle_load_log(engine: &StubEngine) -> HttpResponse {
    HttpResponse::text(200, engine.log().load_log().join("\n"))
}

/// GET /contracts
pub fn handle_contracts(engine: &StubEngine) -> HttpResponse {
    let contracts: Vec<ContractSummary> = engine
        .contracts()
        .contracts()
        .iter()
        .map(ContractSummary::from)
        .collect();
    HttpResponse::json(200, &serde_json::json!({ "contracts": contracts }))
}
