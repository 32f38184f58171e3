//! Request entry point: admin routes, handlers, store lookup and fallbacks.

use super::fallback::generate_fallback;
use super::post_process::PostProcess;
use crate::admin_api::{self, AdminRoute};
use crate::engine::StubEngine;
use crate::expectation::{Expectation, ExpectationResponse};
use crate::hooks::{Hook, HookError, ProcessHook, REQUEST_KEY, RESPONSE_KEY};
use crate::http::{HttpRequest, HttpResponse};
use crate::log::{LogEntry, Resolution};
use bytes::Bytes;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Resolve one request to a response.
pub async fn handle_request(request: HttpRequest, engine: Arc<StubEngine>) -> HttpResponse {
    let route = AdminRoute::parse(&request.method, &request.path);

    if let Some(route) = route.as_ref().filter(|r| r.is_introspection()) {
        return admin_api::dispatch(route, &request, &engine);
    }

    for handler in engine.handlers() {
        if let Some(response) = handler.handle(&request).await {
            debug!(handler = handler.name(), path = %request.path, "Request handled");
            return response;
        }
    }

    if let Some(route) = route {
        return admin_api::dispatch(&route, &request, &engine);
    }
    if admin_api::is_admin_path(&request.path) {
        return HttpResponse::error(
            404,
            &format!("Unknown admin route {} {}", request.method, request.path),
        );
    }

    serve_traffic(request, &engine).await
}

/// Outcome of resolution, before post-processing
struct Resolved {
    response: HttpResponse,
    resolution: Resolution,
    expectation_id: Option<u64>,
    delay_ms: Option<u64>,
}

impl Resolved {
    fn new(response: HttpResponse, resolution: Resolution) -> Self {
        Self {
            response,
            resolution,
            expectation_id: None,
            delay_ms: None,
        }
    }
}

async fn serve_traffic(request: HttpRequest, engine: &StubEngine) -> HttpResponse {
    let facts = engine.facts().snapshot();
    let _facts_guard = engine.facts().clear_on_drop();

    let request = match engine.request_hook() {
        Some(stage) => match stage.apply_request(request.clone()).await {
            Ok(rewritten) => rewritten,
            Err(e) => {
                error!(error = %e, "Request hook failed");
                let response = e.to_response();
                engine.log().record(LogEntry::new(
                    Resolution::Error,
                    request.to_json(),
                    response.to_json(),
                ));
                return response;
            }
        },
        None => request,
    };

    let resolved = resolve(&request, engine, &facts).await;

    let delay_ms = resolved.delay_ms.unwrap_or(0) + engine.config().delay_ms.unwrap_or(0);
    let chain = PostProcess {
        request: &request,
        response_hook: engine.response_hook(),
        delay: Duration::from_millis(delay_ms),
    };
    let response = chain.run(resolved.response).await;

    let mut entry = LogEntry::new(resolved.resolution, request.to_json(), response.to_json());
    if let Some(id) = resolved.expectation_id {
        entry = entry.with_expectation(id);
    }
    engine.log().record(entry);
    response
}

async fn resolve(request: &HttpRequest, engine: &StubEngine, facts: &Map<String, Value>) -> Resolved {
    let mut result = engine.store().match_request(request).await;

    if let Some(staged) = result.staged.take() {
        let expectation = Arc::clone(&staged.expectation);
        let population = staged.population;
        return match render(&expectation, request, engine).await {
            Ok(response) => {
                engine.store().consume(staged);
                info!(
                    id = expectation.id,
                    population = %population,
                    "{} {} matched expectation",
                    request.method,
                    request.path
                );
                Resolved {
                    response,
                    resolution: Resolution::Expectation,
                    expectation_id: Some(expectation.id),
                    delay_ms: expectation.delay_ms,
                }
            }
            Err(e) => {
                // Dropping the staged match rolls it back
                drop(staged);
                error!(id = expectation.id, error = %e, "External command failed");
                Resolved {
                    expectation_id: Some(expectation.id),
                    ..Resolved::new(e.to_response(), Resolution::Error)
                }
            }
        };
    }

    if let Some(pass_through) = engine.pass_through() {
        return match pass_through.forward(request).await {
            Ok(response) => Resolved::new(response, Resolution::PassThrough),
            Err(e) => {
                warn!(error = %e, "Pass-through failed");
                Resolved::new(e.to_response(), Resolution::PassThrough)
            }
        };
    }

    if engine.config().strict_mode {
        let report = result.rejection_report();
        let body = if report.is_empty() {
            "No matching expectation found. No expectations are registered.".to_string()
        } else {
            format!("No matching expectation found.\n\n{report}")
        };
        debug!(path = %request.path, "Strict mode rejected unmatched request");
        return Resolved::new(HttpResponse::text(400, body), Resolution::Strict);
    }

    Resolved::new(
        generate_fallback(engine.contracts(), request, facts, engine.config().generative),
        Resolution::Generated,
    )
}

/// Produce the response of a matched expectation.
async fn render(
    expectation: &Expectation,
    request: &HttpRequest,
    engine: &StubEngine,
) -> Result<HttpResponse, HookError> {
    match &expectation.response {
        ExpectationResponse::Concrete {
            status,
            headers,
            body,
        } => {
            let mut response = HttpResponse::new(*status, body.clone());
            response.headers = headers.clone().into_iter().collect();
            Ok(response)
        }
        ExpectationResponse::Command(command) => {
            let hook = ProcessHook::new(
                command.clone(),
                Duration::from_millis(engine.config().hooks.command_timeout_ms),
            );
            let output = hook.invoke(json!({ REQUEST_KEY: request.to_json() })).await?;
            let malformed = |reason: String| HookError::MalformedOutput {
                command: command.clone(),
                reason,
                stdout: output.to_string(),
            };
            let doc = output
                .get(RESPONSE_KEY)
                .ok_or_else(|| malformed(format!("output has no \"{RESPONSE_KEY}\" field")))?;

            let mut response = HttpResponse::new(200, Bytes::new());
            response.merge_json(doc).map_err(malformed)?;
            Ok(response)
        }
    }
}
