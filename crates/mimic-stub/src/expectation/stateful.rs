//! Stateful matching for expectations that embed match expressions.
//!
//! State is an immutable [`MatcherState`] value. An attempt evaluates a
//! request against the committed state and, on success, stages the next
//! state. The staged state becomes committed only when the expectation is
//! actually served; otherwise it is discarded. The whole
//! rollback/evaluate/stage/commit sequence runs under the expectation's own
//! mutex, so concurrent requests for the same expectation are serialized.

use super::match_expr::{BoundExpression, MatchKind};
use crate::http::{value_as_text, HttpRequest};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Use counters, keyed by field label (`exact`) or label and value (others)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatcherState {
    uses: BTreeMap<String, u32>,
}

impl MatcherState {
    pub fn uses(&self, key: &str) -> u32 {
        self.uses.get(key).copied().unwrap_or(0)
    }

    fn incremented(&self, keys: &[String]) -> Self {
        let mut next = self.clone();
        for key in keys {
            *next.uses.entry(key.clone()).or_insert(0) += 1;
        }
        next
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Success(MatcherState),
    MisMatch(String),
    Exhausted,
}

/// Evaluate a request against `state` without touching it.
pub fn evaluate(
    expressions: &[BoundExpression],
    state: &MatcherState,
    request: &HttpRequest,
) -> MatchOutcome {
    let mut values = Vec::with_capacity(expressions.len());
    for bound in expressions {
        let label = bound.location.label();
        let Some(value) = bound.location.extract(request) else {
            return MatchOutcome::MisMatch(format!("{label}: value is missing"));
        };
        if !bound.accepts(&value) {
            return MatchOutcome::MisMatch(format!(
                "{label}: {} does not satisfy {}",
                value_as_text(&value),
                bound.expression
            ));
        }
        values.push(value);
    }

    if is_exhausted(expressions, state) {
        return MatchOutcome::Exhausted;
    }

    let mut keys = Vec::new();
    for (bound, value) in expressions.iter().zip(&values) {
        let Some(times) = bound.expression.times else {
            continue;
        };
        let key = use_key(bound, value);
        if !bound.expression.is_exact() && state.uses(&key) >= times {
            return MatchOutcome::MisMatch(format!(
                "{}: value {} already used {times} time(s)",
                bound.location.label(),
                value_as_text(value)
            ));
        }
        keys.push(key);
    }

    MatchOutcome::Success(state.incremented(&keys))
}

/// Some `exact` expression with a `times` limit has reached it.
pub fn is_exhausted(expressions: &[BoundExpression], state: &MatcherState) -> bool {
    expressions.iter().any(|bound| match (&bound.expression.kind, bound.expression.times) {
        (MatchKind::Exact(_), Some(times)) => state.uses(&bound.location.label()) >= times,
        _ => false,
    })
}

fn use_key(bound: &BoundExpression, value: &serde_json::Value) -> String {
    let label = bound.location.label();
    if bound.expression.is_exact() {
        label
    } else {
        format!("{label}={}", value_as_text(value))
    }
}

// ============================================================================
// Transactional wrapper
// ============================================================================

#[derive(Debug, Default)]
struct MatcherCell {
    committed: MatcherState,
    staged: Option<MatcherState>,
}

/// Result of one attempt against a stateful matcher
#[derive(Debug)]
pub enum Attempt {
    /// Matched; the guard holds the staged state and the expectation's lock
    Matched(MatcherGuard),
    MisMatch(String),
    /// Used up. Only reported for token-scoped expectations.
    Exhausted,
}

#[derive(Debug)]
pub struct StatefulMatcher {
    expressions: Vec<BoundExpression>,
    cell: Arc<Mutex<MatcherCell>>,
}

impl StatefulMatcher {
    pub fn new(expressions: Vec<BoundExpression>) -> Self {
        Self {
            expressions,
            cell: Arc::new(Mutex::new(MatcherCell::default())),
        }
    }

    /// Try the request. Exhaustion counts as a match unless `token_scoped`.
    pub async fn attempt(&self, request: &HttpRequest, token_scoped: bool) -> Attempt {
        let mut cell = self.cell.clone().lock_owned().await;
        cell.staged = None;

        match evaluate(&self.expressions, &cell.committed, request) {
            MatchOutcome::Success(next) => {
                let exhausts = is_exhausted(&self.expressions, &next);
                cell.staged = Some(next);
                Attempt::Matched(MatcherGuard { cell, exhausts })
            }
            MatchOutcome::Exhausted if !token_scoped => Attempt::Matched(MatcherGuard {
                cell,
                exhausts: true,
            }),
            MatchOutcome::Exhausted => Attempt::Exhausted,
            MatchOutcome::MisMatch(reason) => Attempt::MisMatch(reason),
        }
    }

    /// Committed state
    pub async fn state(&self) -> MatcherState {
        self.cell.lock().await.committed.clone()
    }
}

/// Holds an expectation's matcher lock with a staged state.
///
/// `commit` makes the staged state current; dropping the guard discards it.
#[derive(Debug)]
pub struct MatcherGuard {
    cell: OwnedMutexGuard<MatcherCell>,
    exhausts: bool,
}

impl MatcherGuard {
    /// Commit the staged state; returns whether the matcher is now exhausted.
    pub fn commit(mut self) -> bool {
        if let Some(next) = self.cell.staged.take() {
            self.cell.committed = next;
        }
        self.exhausts
    }
}

impl Drop for MatcherGuard {
    fn drop(&mut self) {
        self.cell.staged = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectation::match_expr::bind_expressions;
    use serde_json::json;

    fn matcher_for(example: HttpRequest) -> StatefulMatcher {
        StatefulMatcher::new(bind_expressions(&example).unwrap())
    }

    #[test]
    fn test_evaluate_exact_with_times_exhausts() {
        let example = HttpRequest::new("GET", "/items/$match(exact: 1, times: 2)");
        let expressions = bind_expressions(&example).unwrap();
        let request = HttpRequest::new("GET", "/items/1");

        let MatchOutcome::Success(one) = evaluate(&expressions, &MatcherState::default(), &request)
        else {
            panic!("first use should match");
        };
        let MatchOutcome::Success(two) = evaluate(&expressions, &one, &request) else {
            panic!("second use should match");
        };
        assert!(is_exhausted(&expressions, &two));
        assert_eq!(evaluate(&expressions, &two, &request), MatchOutcome::Exhausted);
    }

    #[test]
    fn test_evaluate_data_type_limit_is_per_value() {
        let example = HttpRequest::new("GET", "/items/$match(dataType: number, times: 1)");
        let expressions = bind_expressions(&example).unwrap();

        let first = HttpRequest::new("GET", "/items/1");
        let MatchOutcome::Success(state) =
            evaluate(&expressions, &MatcherState::default(), &first)
        else {
            panic!("expected success");
        };
        assert!(matches!(
            evaluate(&expressions, &state, &first),
            MatchOutcome::MisMatch(_)
        ));
        assert!(matches!(
            evaluate(&expressions, &state, &HttpRequest::new("GET", "/items/2")),
            MatchOutcome::Success(_)
        ));
        assert!(matches!(
            evaluate(&expressions, &state, &HttpRequest::new("GET", "/items/x")),
            MatchOutcome::MisMatch(_)
        ));
    }

    #[test]
    fn test_missing_body_field_is_a_mismatch() {
        let example =
            HttpRequest::new("POST", "/orders").with_json_body(json!({"sku": "$match(any)"}));
        let expressions = bind_expressions(&example).unwrap();
        let request = HttpRequest::new("POST", "/orders").with_json_body(json!({}));
        assert!(matches!(
            evaluate(&expressions, &MatcherState::default(), &request),
            MatchOutcome::MisMatch(_)
        ));
    }

    #[tokio::test]
    async fn test_dropped_guard_rolls_back() {
        let matcher = matcher_for(HttpRequest::new("GET", "/a/$match(exact: x, times: 1)"));
        let request = HttpRequest::new("GET", "/a/x");

        match matcher.attempt(&request, true).await {
            Attempt::Matched(guard) => drop(guard),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(matcher.state().await, MatcherState::default());

        match matcher.attempt(&request, true).await {
            Attempt::Matched(guard) => assert!(guard.commit()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(matcher.state().await.uses("path[1]"), 1);
        assert!(matches!(
            matcher.attempt(&request, true).await,
            Attempt::Exhausted
        ));
    }

    #[tokio::test]
    async fn test_exhaustion_is_success_without_token() {
        let matcher = matcher_for(HttpRequest::new("GET", "/a/$match(exact: x, times: 1)"));
        let request = HttpRequest::new("GET", "/a/x");
        for _ in 0..3 {
            match matcher.attempt(&request, false).await {
                Attempt::Matched(guard) => {
                    guard.commit();
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(matcher.state().await.uses("path[1]"), 1);
    }
}
