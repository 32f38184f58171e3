//! Expectations and the store that resolves requests against them.
//!
//! This module is split into several submodules:
//! - `types`: expectation documents, request patterns, diagnostics
//! - `match_expr`: `$match(...)` expressions embedded in examples
//! - `stateful`: the transactional stateful matcher
//! - `store`: the three populations and their lifecycle rules

mod match_expr;
mod stateful;
mod store;
mod types;


pub use match_expr::{bind_expressions, BoundExpression, FieldLocation, MatchExpression, MatchKind};
pub use stateful::{evaluate, Attempt, MatchOutcome, MatcherGuard, MatcherState, StatefulMatcher};
pub use store::{ExpectationStore, MatchResult, PopulationCounts, StagedMatch};
pub use types::{
    CandidateOutcome, CandidateResult, Expectation, ExpectationDocument, ExpectationError,
    ExpectationResponse, Population, Provenance, RequestPattern, RequestSpec, ResponseMode,
    ResponseSpec,
};

pub(crate) use types::deserialize_status_code;
