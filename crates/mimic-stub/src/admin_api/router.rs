//! Route parsing and dispatch for the admin API.

use super::handlers::{events, expectations, state, system};
use crate::engine::StubEngine;
use crate::http::{split_path, HttpRequest, HttpResponse};
use tracing::debug;

pub const ADMIN_PREFIX: &str = "/_mimic";

/// Parsed admin route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminRoute {
    /// GET /health
    Health,
    /// GET /log
    Log,
    /// GET /load_log
    LoadLog,
    /// GET /contracts
    Contracts,
    /// POST /expectations
    AddExpectation,
    /// POST /sse-expectations
    AddEvent,
    /// POST /state
    SetState,
    /// DELETE /transient/:token
    FlushTransient(String),
}

impl AdminRoute {
    /// Parse a request line; `None` for anything that is not an admin route.
    pub fn parse(method: &str, path: &str) -> Option<Self> {
        let rest = admin_remainder(path)?;
        let segments = split_path(rest);

        match (method, segments.as_slice()) {
            ("GET", ["health"]) => Some(AdminRoute::Health),
            ("GET", ["log"]) => Some(AdminRoute::Log),
            ("GET", ["load_log"]) => Some(AdminRoute::LoadLog),
            ("GET", ["contracts"]) => Some(AdminRoute::Contracts),
            ("POST", ["expectations"]) => Some(AdminRoute::AddExpectation),
            ("POST", ["sse-expectations"]) => Some(AdminRoute::AddEvent),
            ("POST", ["state"]) => Some(AdminRoute::SetState),
            ("DELETE", ["transient", token]) => urlencoding::decode(token)
                .ok()
                .map(|token| AdminRoute::FlushTransient(token.into_owned())),
            _ => None,
        }
    }

    /// Read-only routes, answered before any pluggable handler.
    pub fn is_introspection(&self) -> bool {
        matches!(
            self,
            AdminRoute::Health | AdminRoute::Log | AdminRoute::LoadLog | AdminRoute::Contracts
        )
    }
}

/// True for any path under the reserved prefix
pub fn is_admin_path(path: &str) -> bool {
    admin_remainder(path).is_some()
}

fn admin_remainder(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(ADMIN_PREFIX)?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

pub fn dispatch(route: &AdminRoute, request: &HttpRequest, engine: &StubEngine) -> HttpResponse {
    debug!("Admin API: {} {}", request.method, request.path);

    match route {
        AdminRoute::Health => system::handle_health(engine),
        AdminRoute::Log => system::handle_log(engine),
        AdminRoute::LoadLog => system::handle_load_log(engine),
        AdminRoute::Contracts => system::handle_contracts(engine),
        AdminRoute::AddExpectation => expectations::handle_add(request, engine),
        AdminRoute::AddEvent => events::handle_publish(request, engine),
        AdminRoute::SetState => state::handle_set(request, engine),
        AdminRoute::FlushTransient(token) => expectations::handle_flush(token, engine),
    }
}
