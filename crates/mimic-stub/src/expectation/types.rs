//! Expectation documents and the expectations built from them.

use super::match_expr::bind_expressions;
use super::stateful::StatefulMatcher;
use crate::contract::{ExampleResponse, ScenarioRef};
use crate::http::{parse_query_string, value_as_text, HttpRequest};
use crate::pattern::{nest_all, MatchFailure, Pattern};
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, thiserror::Error)]
pub enum ExpectationError {
    #[error("invalid expectation document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid match expression: {0}")]
    MatchExpression(String),
    #[error("binary body is not valid base64: {0}")]
    BinaryBody(#[from] base64::DecodeError),
}

// ============================================================================
// Wire format
// ============================================================================

/// Expectation document as posted to the admin API or stored in example files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectationDocument {
    #[serde(rename = "http-request")]
    pub request: RequestSpec,
    #[serde(rename = "http-response")]
    pub response: ResponseSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(
        rename = "delay-in-milliseconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSpec {
    #[serde(
        default = "default_status",
        deserialize_with = "deserialize_status_code"
    )]
    pub status: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// "text" (default) or "binary" (body is base64-encoded)
    #[serde(default, skip_serializing_if = "is_text_mode")]
    pub mode: ResponseMode,
    #[serde(
        rename = "external-command",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub external_command: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Body is UTF-8 text (default)
    #[default]
    Text,
    /// Body is base64-encoded binary data
    Binary,
}

fn is_text_mode(mode: &ResponseMode) -> bool {
    *mode == ResponseMode::Text
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

/// Accept a status code as either a number or a numeric string
pub(crate) fn deserialize_status_code<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| D::Error::custom("invalid status code number")),
        Value::String(s) => s
            .parse::<u16>()
            .map_err(|_| D::Error::custom(format!("invalid status code string: {s}"))),
        _ => Err(D::Error::custom("status must be a number or string")),
    }
}

impl ExpectationDocument {
    pub fn parse(text: &str) -> Result<Self, ExpectationError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_value(value: Value) -> Result<Self, ExpectationError> {
        Ok(serde_json::from_value(value)?)
    }
}

impl RequestSpec {
    /// The example as a request; a `?query` in the path is merged into `query`.
    pub fn to_request(&self) -> HttpRequest {
        let (path, inline_query) = match self.path.split_once('?') {
            Some((path, query)) => (path, parse_query_string(query)),
            None => (self.path.as_str(), BTreeMap::new()),
        };

        let mut request = HttpRequest::new(&self.method, path);
        request.query = inline_query;
        for (key, value) in &self.query {
            request.query.insert(key.clone(), value_as_text(value));
        }
        for (name, value) in &self.headers {
            request
                .headers
                .insert(name.to_ascii_lowercase(), value_as_text(value));
        }
        if let Some(body) = &self.body {
            request.body = body.clone();
        }
        request
    }
}

// ============================================================================
// Request patterns
// ============================================================================

/// Structural pattern built from an example request.
///
/// Values are exact; match expressions are wildcards here and enforced by the
/// stateful matcher. Query keys must agree exactly, headers are a subset.
#[derive(Debug, Clone)]
pub struct RequestPattern {
    method: String,
    path: Vec<Pattern>,
    query: Vec<(String, Pattern)>,
    headers: Vec<(String, Pattern)>,
    body: Option<Pattern>,
}

impl RequestPattern {
    pub fn from_example(example: &HttpRequest) -> Self {
        let text = |s: &str| Pattern::from_example(&Value::String(s.to_string()));
        Self {
            method: example.method.clone(),
            path: example.path_segments().into_iter().map(text).collect(),
            query: example
                .query
                .iter()
                .map(|(k, v)| (k.clone(), text(v)))
                .collect(),
            headers: example
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), text(v)))
                .collect(),
            body: (!example.body.is_null()).then(|| Pattern::from_example(&example.body)),
        }
    }

    pub fn matches(&self, request: &HttpRequest) -> Result<(), Vec<MatchFailure>> {
        let mut failures = Vec::new();

        if self.method != request.method {
            failures.push(MatchFailure::at(
                "METHOD",
                format!("Expected {}, actual was {}", self.method, request.method),
            ));
        }

        let segments = request.path_segments();
        if segments.len() != self.path.len() {
            failures.push(MatchFailure::at(
                "PATH",
                format!(
                    "Expected {} segments, actual was {} ({})",
                    self.path.len(),
                    segments.len(),
                    request.path
                ),
            ));
        } else {
            for (i, (pattern, actual)) in self.path.iter().zip(segments).enumerate() {
                if let Err(f) = pattern.matches_text(actual) {
                    failures.push(f.nested(&format!("[{i}]")).nested("PATH"));
                }
            }
        }

        for (key, pattern) in &self.query {
            match request.query.get(key) {
                Some(actual) => {
                    if let Err(f) = pattern.matches_text(actual) {
                        failures.push(f.nested(key).nested("QUERY"));
                    }
                }
                None => failures.push(
                    MatchFailure::at(key.clone(), "Expected key was missing").nested("QUERY"),
                ),
            }
        }
        for key in request.query.keys() {
            if !self.query.iter().any(|(k, _)| k == key) {
                failures.push(
                    MatchFailure::at(key.clone(), "Key was not expected").nested("QUERY"),
                );
            }
        }

        for (name, pattern) in &self.headers {
            match request.header(name) {
                Some(actual) => {
                    if let Err(f) = pattern.matches_text(actual) {
                        failures.push(f.nested(name).nested("HEADERS"));
                    }
                }
                None => failures.push(
                    MatchFailure::at(name.clone(), "Expected header was missing")
                        .nested("HEADERS"),
                ),
            }
        }

        if let Some(body) = &self.body {
            if let Err(body_failures) = match_body(body, &request.body) {
                failures.extend(nest_all(body_failures, "BODY"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(nest_all(failures, "REQUEST"))
        }
    }
}

/// A JSON body sent without a JSON content type arrives as text; retry it parsed.
fn match_body(pattern: &Pattern, body: &Value) -> Result<(), Vec<MatchFailure>> {
    let first = pattern.matches(body);
    match (&first, body) {
        (Err(_), Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(parsed) if pattern.matches(&parsed).is_ok() => Ok(()),
            _ => first,
        },
        _ => first,
    }
}

// ============================================================================
// Expectations
// ============================================================================

/// How the response of an expectation is produced
#[derive(Debug, Clone)]
pub enum ExpectationResponse {
    Concrete {
        status: u16,
        headers: BTreeMap<String, String>,
        body: Bytes,
    },
    /// Shell command that turns `{"http-request"}` into `{"http-response"}`
    Command(String),
}

/// Where an expectation came from
#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    /// `dynamic`, `transient`, or the example file path
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated_against: Option<ScenarioRef>,
}

/// Population an expectation lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Population {
    Dynamic,
    Transient,
    Static,
}

impl fmt::Display for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Population::Dynamic => write!(f, "dynamic"),
            Population::Transient => write!(f, "transient"),
            Population::Static => write!(f, "static"),
        }
    }
}

pub struct Expectation {
    pub id: u64,
    pub pattern: RequestPattern,
    pub response: ExpectationResponse,
    pub matcher: Option<StatefulMatcher>,
    pub token: Option<String>,
    pub delay_ms: Option<u64>,
    pub provenance: Provenance,
    pub document: ExpectationDocument,
    /// Set while a matcher-less token expectation is being served
    claimed: AtomicBool,
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expectation")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("source", &self.provenance.source)
            .field("stateful", &self.matcher.is_some())
            .finish()
    }
}

impl Expectation {
    /// Build an expectation; fails on a bad match expression or binary body.
    pub fn from_document(
        document: ExpectationDocument,
        source: impl Into<String>,
    ) -> Result<Self, ExpectationError> {
        let example = document.request.to_request();
        let expressions = bind_expressions(&example).map_err(ExpectationError::MatchExpression)?;
        let matcher = (!expressions.is_empty()).then(|| StatefulMatcher::new(expressions));

        let spec = &document.response;
        let response = match &spec.external_command {
            Some(command) => ExpectationResponse::Command(command.clone()),
            None => {
                let body = match (spec.mode, &spec.body) {
                    (_, None) => Bytes::new(),
                    (ResponseMode::Binary, Some(body)) => Bytes::from(
                        base64::engine::general_purpose::STANDARD.decode(value_as_text(body))?,
                    ),
                    (ResponseMode::Text, Some(body)) => crate::http::body_to_bytes(body),
                };
                let mut headers: BTreeMap<String, String> = spec
                    .headers
                    .iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                    .collect();
                if matches!(spec.body, Some(Value::Object(_)) | Some(Value::Array(_)))
                    && spec.mode == ResponseMode::Text
                {
                    headers
                        .entry("content-type".to_string())
                        .or_insert_with(|| "application/json".to_string());
                }
                ExpectationResponse::Concrete {
                    status: spec.status,
                    headers,
                    body,
                }
            }
        };

        Ok(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            pattern: RequestPattern::from_example(&example),
            response,
            matcher,
            token: document.token.clone(),
            delay_ms: document.delay_ms,
            provenance: Provenance {
                source: source.into(),
                validated_against: None,
            },
            document,
            claimed: AtomicBool::new(false),
        })
    }

    pub fn with_validation(mut self, scenario: Option<ScenarioRef>) -> Self {
        self.provenance.validated_against = scenario;
        self
    }

    /// The example request, for contract validation.
    pub fn example_request(&self) -> HttpRequest {
        self.document.request.to_request()
    }

    /// The example response, for contract validation; `None` for commands.
    pub fn example_response(&self) -> Option<ExampleResponse<'_>> {
        let ExpectationResponse::Concrete { headers, .. } = &self.response else {
            return None;
        };
        let spec = &self.document.response;
        Some(ExampleResponse {
            status: spec.status,
            headers,
            body: match spec.mode {
                ResponseMode::Text => Some(spec.body.as_ref().unwrap_or(&Value::Null)),
                ResponseMode::Binary => None,
            },
        })
    }

    /// Atomically claim a single-use expectation; false if already taken.
    pub(crate) fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_claim(&self) {
        self.claimed.store(false, Ordering::Release);
    }
}

// ============================================================================
// Match diagnostics
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOutcome {
    Matched,
    StructuralMismatch(Vec<MatchFailure>),
    StatefulMismatch(String),
    /// Token expectation whose matcher is used up; removed
    Exhausted,
    /// Single-use expectation taken by a concurrent request
    AlreadyConsumed,
}

/// Result of trying one expectation against a request
#[derive(Debug, Clone)]
pub struct CandidateResult {
    pub id: u64,
    pub population: Population,
    pub source: String,
    pub outcome: CandidateOutcome,
}

impl fmt::Display for CandidateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Expectation {} ({}, from {}): ",
            self.id, self.population, self.source
        )?;
        match &self.outcome {
            CandidateOutcome::Matched => write!(f, "matched"),
            CandidateOutcome::StructuralMismatch(failures) => {
                write!(f, "did not match\n{}", crate::pattern::render_failures(failures))
            }
            CandidateOutcome::StatefulMismatch(reason) => write!(f, "rejected: {reason}"),
            CandidateOutcome::Exhausted => write!(f, "exhausted"),
            CandidateOutcome::AlreadyConsumed => write!(f, "already consumed"),
        }
    }
}
