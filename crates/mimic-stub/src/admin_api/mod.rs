//! Admin REST API served under the reserved `/_mimic` prefix.
//!
//! - Introspection: health, request log, load log, loaded contracts
//! - Mutations: register expectations, publish events, set facts, flush
//!   transient expectations

mod handlers;
mod router;
mod types;

pub use router::{dispatch, is_admin_path, AdminRoute, ADMIN_PREFIX};
pub use types::{ContractSummary, HealthResponse, RegisteredExpectation};
