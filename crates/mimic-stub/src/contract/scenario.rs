//! Compiled contract scenarios and request/response matching against them.

use crate::expectation::deserialize_status_code;
use crate::http::{split_path, HttpRequest, HttpResponse, CONTENT_TYPE};
use crate::pattern::{
    nest_all, FieldPattern, Generator, MatchFailure, MatchOptions, Pattern, PatternError,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ScenarioRaw {
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query: Map<String, Value>,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub given: Map<String, Value>,
    #[serde(default)]
    pub response: ScenarioResponseRaw,
    #[serde(default)]
    pub examples: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ScenarioResponseRaw {
    #[serde(
        default = "default_status",
        deserialize_with = "deserialize_status_code"
    )]
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

impl Default for ScenarioResponseRaw {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

// ============================================================================
// Path templates
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum PathSegment {
    Literal(String),
    Param { name: String, pattern: Pattern },
}

/// Path template such as `/items/(id:number)`
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    template: String,
    segments: Vec<PathSegment>,
}

impl PathPattern {
    pub fn parse(template: &str) -> Result<Self, PatternError> {
        let segments = split_path(template)
            .into_iter()
            .enumerate()
            .map(|(i, segment)| {
                match segment
                    .strip_prefix('(')
                    .and_then(|rest| rest.strip_suffix(')'))
                {
                    Some(inner) => {
                        let (name, kind) = match inner.split_once(':') {
                            Some((name, kind)) => (name.trim().to_string(), kind.trim()),
                            None => (format!("param{i}"), inner.trim()),
                        };
                        let pattern = Pattern::parse_text(&format!("({kind})"))?;
                        Ok(PathSegment::Param { name, pattern })
                    }
                    None => Ok(PathSegment::Literal(segment.to_string())),
                }
            })
            .collect::<Result<Vec<_>, PatternError>>()?;

        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    pub fn matches(&self, path: &str, opts: MatchOptions) -> Result<(), Vec<MatchFailure>> {
        let actual = split_path(path);
        if actual.len() != self.segments.len() {
            return Err(vec![MatchFailure::at(
                "PATH",
                format!("Expected path {}, actual was {path}", self.template),
            )]);
        }

        let failures: Vec<MatchFailure> = self
            .segments
            .iter()
            .zip(actual)
            .filter_map(|(expected, actual)| match expected {
                PathSegment::Literal(literal) if literal == actual => None,
                PathSegment::Literal(literal) => Some(MatchFailure::at(
                    "PATH",
                    format!("Expected segment \"{literal}\", actual was \"{actual}\""),
                )),
                PathSegment::Param { name, pattern } => pattern
                    .matches_text_with(actual, opts)
                    .err()
                    .map(|f| f.nested(name).nested("PATH")),
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }

    /// Same segment count and literal segments, parameter values ignored.
    pub fn matches_shape(&self, path: &str) -> bool {
        let actual = split_path(path);
        actual.len() == self.segments.len()
            && self.segments.iter().zip(actual).all(|(s, a)| match s {
                PathSegment::Literal(literal) => literal == a,
                PathSegment::Param { .. } => true,
            })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.template)
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[derive(Debug, Clone)]
pub struct ScenarioResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Pattern>,
}

/// One request/response pair of a contract
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub method: String,
    pub path: PathPattern,
    pub query: Vec<FieldPattern>,
    /// Header patterns, names lowercase
    pub headers: Vec<FieldPattern>,
    pub body: Option<Pattern>,
    pub given: Map<String, Value>,
    pub response: ScenarioResponse,
    /// Inline expectation documents
    pub examples: Vec<Value>,
}

/// Concrete response of an example, as checked against a scenario
#[derive(Debug, Clone, Copy)]
pub struct ExampleResponse<'a> {
    pub status: u16,
    pub headers: &'a BTreeMap<String, String>,
    /// `None` skips the body check (binary bodies)
    pub body: Option<&'a Value>,
}

impl Scenario {
    pub(crate) fn compile(raw: ScenarioRaw) -> Result<Self, PatternError> {
        let body = raw.body.as_ref().map(Pattern::parse).transpose()?;
        let response_body = raw.response.body.as_ref().map(Pattern::parse).transpose()?;

        Ok(Self {
            path: PathPattern::parse(&raw.path)?,
            method: raw.method.to_ascii_uppercase(),
            query: field_patterns(&raw.query, false)?,
            headers: field_patterns(&raw.headers, true)?,
            body,
            given: raw.given,
            response: ScenarioResponse {
                status: raw.response.status,
                headers: raw.response.headers,
                body: response_body,
            },
            examples: raw.examples,
            name: raw.name,
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.response.status)
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self.response.status, 400 | 422)
    }

    /// Every declared fact agrees with the current facts; absent keys are fine.
    pub fn given_agrees(&self, facts: &Map<String, Value>) -> bool {
        self.given
            .iter()
            .all(|(key, expected)| facts.get(key).map_or(true, |actual| actual == expected))
    }

    /// Check a request against this scenario's request side.
    pub fn match_request(
        &self,
        request: &HttpRequest,
        opts: MatchOptions,
    ) -> Result<(), Vec<MatchFailure>> {
        let mut failures = Vec::new();

        if !request.method.eq_ignore_ascii_case(&self.method) {
            failures.push(MatchFailure::at(
                "METHOD",
                format!("Expected {}, actual was {}", self.method, request.method),
            ));
        }

        if let Err(path_failures) = self.path.matches(&request.path, opts) {
            failures.extend(path_failures);
        }

        failures.extend(match_text_fields(&self.query, &request.query, opts, "QUERY", true));
        failures.extend(match_text_fields(
            &self.headers,
            &request.headers,
            opts,
            "HEADERS",
            false,
        ));

        if let Some(body) = &self.body {
            if let Err(body_failures) = body.matches_with(&request.body, opts) {
                failures.extend(nest_all(body_failures, "BODY"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(nest_all(failures, "REQUEST"))
        }
    }

    /// Check an example's response against this scenario's response side.
    pub fn match_response(
        &self,
        response: ExampleResponse<'_>,
        opts: MatchOptions,
    ) -> Result<(), Vec<MatchFailure>> {
        let mut failures = Vec::new();

        if response.status != self.response.status {
            failures.push(MatchFailure::at(
                "STATUS",
                format!(
                    "Expected {}, actual was {}",
                    self.response.status, response.status
                ),
            ));
        }

        for (name, value) in &self.response.headers {
            let Some(actual) = response.headers.get(&name.to_ascii_lowercase()) else {
                continue;
            };
            if let Err(failure) = Pattern::parse_text(value)
                .unwrap_or_else(|_| Pattern::Exact(Value::String(value.clone())))
                .matches_text_with(actual, opts)
            {
                failures.push(failure.nested(name).nested("HEADERS"));
            }
        }

        if let (Some(pattern), Some(body)) = (&self.response.body, response.body) {
            if let Err(body_failures) = pattern.matches_with(body, opts) {
                failures.extend(nest_all(body_failures, "BODY"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(nest_all(failures, "RESPONSE"))
        }
    }

    /// Validate an example interaction, accepting match expressions as wildcards.
    pub fn validate_example(
        &self,
        request: &HttpRequest,
        response: Option<ExampleResponse<'_>>,
    ) -> Result<(), Vec<MatchFailure>> {
        let opts = MatchOptions::lenient();
        let mut failures = self.match_request(request, opts).err().unwrap_or_default();
        if let Some(response) = response {
            failures.extend(self.match_response(response, opts).err().unwrap_or_default());
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }

    /// Synthesize a response, generating every field not fixed by an exact pattern.
    pub fn generate_response(&self, facts: &Map<String, Value>) -> HttpResponse {
        let generator = Generator::new(facts);
        let body = self
            .response
            .body
            .as_ref()
            .map(|p| generator.generate(p))
            .unwrap_or(Value::Null);

        let mut response = HttpResponse::new(self.response.status, crate::http::body_to_bytes(&body));
        for (name, value) in &self.response.headers {
            let value = match Pattern::parse_text(value) {
                Ok(Pattern::Exact(_)) | Err(_) => value.clone(),
                Ok(pattern) => crate::http::value_as_text(&generator.generate(&pattern)),
            };
            response = response.with_header(name, &value);
        }
        if response.header(CONTENT_TYPE).is_none() && (body.is_object() || body.is_array()) {
            response = response.with_header(CONTENT_TYPE, "application/json");
        }
        response
    }
}

fn field_patterns(
    raw: &Map<String, Value>,
    lowercase: bool,
) -> Result<Vec<FieldPattern>, PatternError> {
    raw.iter()
        .map(|(key, value)| {
            let (key, optional) = match key.strip_suffix('?') {
                Some(stripped) => (stripped, true),
                None => (key.as_str(), false),
            };
            let key = if lowercase {
                key.to_ascii_lowercase()
            } else {
                key.to_string()
            };
            let pattern = Pattern::parse(value).map_err(|e| PatternError::InField {
                field: key.clone(),
                source: Box::new(e),
            })?;
            Ok(FieldPattern {
                key,
                optional,
                pattern,
            })
        })
        .collect()
}

/// Match textual fields (query or headers). Query rejects unknown keys,
/// headers allow them.
fn match_text_fields(
    patterns: &[FieldPattern],
    actual: &BTreeMap<String, String>,
    opts: MatchOptions,
    section: &str,
    reject_unknown: bool,
) -> Vec<MatchFailure> {
    let mut failures = Vec::new();
    for field in patterns {
        let value = if reject_unknown {
            actual.get(&field.key)
        } else {
            actual.get(&field.key.to_ascii_lowercase())
        };
        match value {
            Some(value) => {
                if let Err(failure) = field.pattern.matches_text_with(value, opts) {
                    failures.push(failure.nested(&field.key).nested(section));
                }
            }
            None if field.optional => {}
            None => failures.push(
                MatchFailure::at(field.key.clone(), "Expected key was missing").nested(section),
            ),
        }
    }
    if reject_unknown {
        for key in actual.keys() {
            if !patterns.iter().any(|f| &f.key == key) {
                failures.push(
                    MatchFailure::at(key.clone(), "Key was not expected (not in the contract)")
                        .nested(section),
                );
            }
        }
    }
    failures
}
