//! Responses synthesized from the loaded contracts when nothing matched.

use crate::contract::{ContractSet, Rejection, Scenario};
use crate::http::{body_to_bytes, HttpRequest, HttpResponse, ResponseBody};
use crate::pattern::{MatchFailure, MatchOptions};
use serde_json::{Map, Value};
use tracing::debug;

pub const GENERATED_HEADER: &str = "x-mimic-type";

/// Synthesize a response for an unmatched request.
///
/// The first 2xx scenario (in load order) that fits the request and agrees
/// with the facts wins. Failing that, with `generative` set, a 400/422
/// scenario with the same method and path shape is synthesized with the
/// mismatch report embedded in its body. Otherwise the answer is a 400
/// listing why every scenario rejected the request.
pub fn generate_fallback(
    contracts: &ContractSet,
    request: &HttpRequest,
    facts: &Map<String, Value>,
    generative: bool,
) -> HttpResponse {
    if contracts.is_empty() {
        return HttpResponse::text(400, "No expectation matched and no contracts are loaded");
    }

    let mut rejections = Vec::new();
    for (contract, scenario) in contracts.scenarios() {
        let failures = if !scenario.given_agrees(facts) {
            vec![MatchFailure::at("GIVEN", "Scenario does not agree with the current facts")]
        } else {
            match scenario.match_request(request, MatchOptions::default()) {
                Ok(()) if scenario.is_success() => {
                    debug!(
                        contract = %contract.name,
                        scenario = %scenario.name,
                        "Generating response from scenario"
                    );
                    return tagged(scenario.generate_response(facts));
                }
                Ok(()) => vec![MatchFailure::at(
                    "RESPONSE.STATUS",
                    format!(
                        "Request fits, but the scenario responds {}; only 2xx scenarios are generated",
                        scenario.response.status
                    ),
                )],
                Err(failures) => failures,
            }
        };
        rejections.push(Rejection {
            contract: contract.path.clone(),
            scenario: scenario.name.clone(),
            failures,
        });
    }

    let report = rejections
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n\n");

    if generative {
        if let Some(scenario) = find_error_scenario(contracts, request, facts) {
            debug!(scenario = %scenario.name, "Generating error response from scenario");
            return tagged(with_diagnostics(scenario.generate_response(facts), &report));
        }
    }

    HttpResponse::text(400, format!("No matching scenario found.\n\n{report}"))
}

fn find_error_scenario<'a>(
    contracts: &'a ContractSet,
    request: &HttpRequest,
    facts: &Map<String, Value>,
) -> Option<&'a Scenario> {
    contracts
        .scenarios()
        .map(|(_, scenario)| scenario)
        .find(|scenario| {
            scenario.is_client_error()
                && scenario.method.eq_ignore_ascii_case(&request.method)
                && scenario.path.matches_shape(&request.path)
                && scenario.given_agrees(facts)
        })
}

fn with_diagnostics(mut response: HttpResponse, report: &str) -> HttpResponse {
    let mut body = response.body_value();
    if embed_in_first_string(&mut body, report) {
        response.body = ResponseBody::Bytes(body_to_bytes(&body));
    }
    response
}

/// Replace the first string found depth-first, in declared order.
///
/// Returns false and leaves the value alone when it holds no string.
pub fn embed_in_first_string(value: &mut Value, text: &str) -> bool {
    match value {
        Value::String(s) => {
            *s = text.to_string();
            true
        }
        Value::Array(items) => items.iter_mut().any(|item| embed_in_first_string(item, text)),
        Value::Object(fields) => fields
            .values_mut()
            .any(|field| embed_in_first_string(field, text)),
        _ => false,
    }
}

fn tagged(response: HttpResponse) -> HttpResponse {
    response.with_header(GENERATED_HEADER, "generated")
}
