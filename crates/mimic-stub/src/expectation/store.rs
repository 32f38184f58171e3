//! Expectation store: static, dynamic and transient populations.
//!
//! Lookup order is dynamic, then transient, then static. Within dynamic and
//! transient the most recently registered expectation is tried first.

use super::stateful::{Attempt, MatcherGuard};
use super::types::{CandidateOutcome, CandidateResult, Expectation, Population};
use crate::http::HttpRequest;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Token-scoped expectations, newest first, indexed by token
#[derive(Debug, Default)]
struct TransientPopulation {
    order: Vec<Arc<Expectation>>,
    by_token: HashMap<String, HashSet<u64>>,
}

impl TransientPopulation {
    fn insert(&mut self, expectation: Arc<Expectation>, token: &str) {
        self.by_token
            .entry(token.to_string())
            .or_default()
            .insert(expectation.id);
        self.order.insert(0, expectation);
    }

    fn remove(&mut self, id: u64) -> bool {
        let before = self.order.len();
        self.order.retain(|e| {
            if e.id != id {
                return true;
            }
            if let Some(token) = &e.token {
                if let Some(ids) = self.by_token.get_mut(token) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.by_token.remove(token);
                    }
                }
            }
            false
        });
        self.order.len() != before
    }

    fn flush(&mut self, token: &str) -> usize {
        let Some(ids) = self.by_token.remove(token) else {
            return 0;
        };
        self.order.retain(|e| !ids.contains(&e.id));
        ids.len()
    }
}

/// Expectation counts per population
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PopulationCounts {
    #[serde(rename = "static")]
    pub static_: usize,
    pub dynamic: usize,
    pub transient: usize,
}

/// A matched expectation waiting to be served.
///
/// Holds the matcher lock with staged state, or the single-use claim. Pass it
/// to [`ExpectationStore::consume`] once the response is produced; dropping
/// it instead rolls the match back.
#[derive(Debug)]
pub struct StagedMatch {
    pub expectation: Arc<Expectation>,
    pub population: Population,
    guard: Option<MatcherGuard>,
    claimed: bool,
    consumed: bool,
}

impl Drop for StagedMatch {
    fn drop(&mut self) {
        if self.claimed && !self.consumed {
            self.expectation.release_claim();
        }
    }
}

/// Outcome of a store lookup
#[derive(Debug, Default)]
pub struct MatchResult {
    pub staged: Option<StagedMatch>,
    /// Every candidate tried, in lookup order
    pub candidates: Vec<CandidateResult>,
}

impl MatchResult {
    /// Reasons from every rejected candidate, one block per candidate
    pub fn rejection_report(&self) -> String {
        self.candidates
            .iter()
            .filter(|c| c.outcome != CandidateOutcome::Matched)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Default)]
pub struct ExpectationStore {
    static_: Vec<Arc<Expectation>>,
    dynamic: RwLock<Vec<Arc<Expectation>>>,
    transient: RwLock<TransientPopulation>,
}

impl ExpectationStore {
    /// Create a store over the static population, kept in load order.
    pub fn new(static_: Vec<Expectation>) -> Self {
        Self {
            static_: static_.into_iter().map(Arc::new).collect(),
            dynamic: RwLock::new(Vec::new()),
            transient: RwLock::new(TransientPopulation::default()),
        }
    }

    /// Register an expectation: transient if it has a token, dynamic otherwise.
    pub fn add(&self, expectation: Expectation) -> Arc<Expectation> {
        let expectation = Arc::new(expectation);
        match expectation.token.clone() {
            Some(token) => {
                self.transient.write().insert(expectation.clone(), &token);
                info!(id = expectation.id, token = %token, "Registered transient expectation");
            }
            None => {
                self.dynamic.write().insert(0, expectation.clone());
                info!(id = expectation.id, "Registered dynamic expectation");
            }
        }
        expectation
    }

    fn snapshot_of(&self, population: Population) -> Vec<Arc<Expectation>> {
        match population {
            Population::Dynamic => self.dynamic.read().clone(),
            Population::Transient => self.transient.read().order.clone(),
            Population::Static => self.static_.clone(),
        }
    }

    /// Every expectation in lookup order
    pub fn snapshot(&self) -> Vec<(Population, Arc<Expectation>)> {
        [Population::Dynamic, Population::Transient, Population::Static]
            .into_iter()
            .flat_map(|p| self.snapshot_of(p).into_iter().map(move |e| (p, e)))
            .collect()
    }

    pub fn len_by_population(&self) -> PopulationCounts {
        PopulationCounts {
            static_: self.static_.len(),
            dynamic: self.dynamic.read().len(),
            transient: self.transient.read().order.len(),
        }
    }

    /// Find the first expectation that matches structurally and statefully.
    ///
    /// Never fails; every candidate tried is reported in `candidates`.
    pub async fn match_request(&self, request: &HttpRequest) -> MatchResult {
        let mut result = MatchResult::default();

        for population in [Population::Dynamic, Population::Transient, Population::Static] {
            for expectation in self.snapshot_of(population) {
                let outcome = self.try_candidate(&expectation, population, request).await;
                let (outcome, staged) = match outcome {
                    Ok(staged) => (CandidateOutcome::Matched, Some(staged)),
                    Err(outcome) => (outcome, None),
                };

                debug!(
                    id = expectation.id,
                    population = %population,
                    matched = staged.is_some(),
                    "Tried expectation"
                );
                result.candidates.push(CandidateResult {
                    id: expectation.id,
                    population,
                    source: expectation.provenance.source.clone(),
                    outcome,
                });

                if staged.is_some() {
                    result.staged = staged;
                    return result;
                }
            }
        }

        result
    }

    async fn try_candidate(
        &self,
        expectation: &Arc<Expectation>,
        population: Population,
        request: &HttpRequest,
    ) -> Result<StagedMatch, CandidateOutcome> {
        expectation
            .pattern
            .matches(request)
            .map_err(CandidateOutcome::StructuralMismatch)?;

        let token_scoped = expectation.token.is_some();
        match &expectation.matcher {
            None if token_scoped => {
                if !expectation.try_claim() {
                    return Err(CandidateOutcome::AlreadyConsumed);
                }
                Ok(StagedMatch {
                    expectation: expectation.clone(),
                    population,
                    guard: None,
                    claimed: true,
                    consumed: false,
                })
            }
            None => Ok(StagedMatch {
                expectation: expectation.clone(),
                population,
                guard: None,
                claimed: false,
                consumed: false,
            }),
            Some(matcher) => match matcher.attempt(request, token_scoped).await {
                Attempt::Matched(guard) => Ok(StagedMatch {
                    expectation: expectation.clone(),
                    population,
                    guard: Some(guard),
                    claimed: false,
                    consumed: false,
                }),
                Attempt::MisMatch(reason) => Err(CandidateOutcome::StatefulMismatch(reason)),
                Attempt::Exhausted => {
                    if self.remove(population, expectation.id) {
                        info!(id = expectation.id, "Removed exhausted expectation");
                    }
                    Err(CandidateOutcome::Exhausted)
                }
            },
        }
    }

    /// Serve a staged match: commit matcher state and apply removal rules.
    pub fn consume(&self, mut staged: StagedMatch) {
        staged.consumed = true;
        let exhausted = staged.guard.take().map(MatcherGuard::commit).unwrap_or(false);

        let expectation = &staged.expectation;
        if expectation.token.is_none() || staged.population == Population::Static {
            return;
        }
        if expectation.matcher.is_none() || exhausted {
            if self.remove(staged.population, expectation.id) {
                info!(
                    id = expectation.id,
                    exhausted, "Removed used transient expectation"
                );
            }
        }
    }

    fn remove(&self, population: Population, id: u64) -> bool {
        match population {
            Population::Dynamic => {
                let mut dynamic = self.dynamic.write();
                let before = dynamic.len();
                dynamic.retain(|e| e.id != id);
                dynamic.len() != before
            }
            Population::Transient => self.transient.write().remove(id),
            Population::Static => false,
        }
    }

    /// Remove every transient expectation registered with `token`.
    pub fn flush(&self, token: &str) -> usize {
        let removed = self.transient.write().flush(token);
        info!(token = %token, removed, "Flushed transient expectations");
        removed
    }
}
