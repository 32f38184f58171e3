//! Response types and shared helpers for the admin API.

use crate::contract::Contract;
use crate::expectation::PopulationCounts;
use crate::http::{HttpRequest, HttpResponse};
use serde::Serialize;
use serde_json::Value;

/// GET /health
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub expectations: PopulationCounts,
    pub contracts: usize,
    pub subscribers: usize,
    pub served: usize,
}

/// POST /expectations on success
#[derive(Debug, Serialize, PartialEq)]
pub struct RegisteredExpectation {
    pub contract: Option<String>,
    pub scenario: Option<String>,
    pub id: u64,
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScenarioSummary {
    pub name: String,
    pub method: String,
    pub path: String,
    pub status: u16,
}

/// One entry of GET /contracts
#[derive(Debug, Serialize)]
pub struct ContractSummary {
    pub name: String,
    pub path: String,
    pub scenarios: Vec<ScenarioSummary>,
}

impl From<&Contract> for ContractSummary {
    fn from(contract: &Contract) -> Self {
        Self {
            name: contract.name.clone(),
            path: contract.path.clone(),
            scenarios: contract
                .scenarios
                .iter()
                .map(|s| ScenarioSummary {
                    name: s.name.clone(),
                    method: s.method.clone(),
                    path: s.path.to_string(),
                    status: s.response.status,
                })
                .collect(),
        }
    }
}

/// Admin documents are JSON whatever the declared content type.
pub fn json_document(request: &HttpRequest) -> Result<Value, HttpResponse> {
    let parsed = match &request.body {
        Value::Null => Err("request body is empty".to_string()),
        Value::String(text) => serde_json::from_str(text).map_err(|e| e.to_string()),
        other => Ok(other.clone()),
    };
    parsed.map_err(|reason| could_not_parse(&reason))
}

pub fn could_not_parse(reason: &str) -> HttpResponse {
    HttpResponse::error(400, &format!("could not parse: {reason}"))
}
