//! `$match(...)` expressions embedded in example requests.
//!
//! ```text
//! $match(exact: 10, times: 2)
//! $match(dataType: number, times: 1)
//! $match(any)
//! ```

use crate::http::{value_as_text, HttpRequest};
use crate::pattern::{is_match_expression, Pattern};
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

fn times_suffix() -> &'static Regex {
    static TIMES: OnceLock<Regex> = OnceLock::new();
    TIMES.get_or_init(|| {
        Regex::new(r"^(?s)(.*?)\s*,\s*times\s*:\s*(\d+)\s*$").expect("valid regex literal")
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchKind {
    /// Value must equal the literal
    Exact(String),
    /// Value must fit the type
    DataType(Pattern),
    /// Any value, as long as it is present
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchExpression {
    pub kind: MatchKind,
    /// Use limit: exhaustion for `exact`, per distinct value otherwise
    pub times: Option<u32>,
    raw: String,
}

impl MatchExpression {
    /// Parse `text` if it is a match expression; `Ok(None)` for plain values.
    pub fn parse(text: &str) -> Result<Option<Self>, String> {
        if !is_match_expression(text) {
            return Ok(None);
        }
        let trimmed = text.trim();
        let inner = trimmed
            .strip_prefix("$match(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| format!("unterminated match expression '{trimmed}'"))?;

        let (head, times) = match times_suffix().captures(inner) {
            Some(caps) => {
                let times: u32 = caps[2]
                    .parse()
                    .map_err(|_| format!("times out of range in '{trimmed}'"))?;
                if times == 0 {
                    return Err(format!("times must be at least 1 in '{trimmed}'"));
                }
                (caps[1].to_string(), Some(times))
            }
            None => (inner.to_string(), None),
        };

        let head = head.trim();
        let kind = if head == "any" {
            MatchKind::Any
        } else if let Some(literal) = head.strip_prefix("exact:") {
            MatchKind::Exact(unquote(literal.trim()).to_string())
        } else if let Some(type_name) = head.strip_prefix("dataType:") {
            let type_name = type_name.trim();
            MatchKind::DataType(
                Pattern::type_named(type_name)
                    .ok_or_else(|| format!("unknown dataType '{type_name}' in '{trimmed}'"))?,
            )
        } else {
            return Err(format!(
                "expected exact, dataType or any in '{trimmed}'"
            ));
        };

        Ok(Some(Self {
            kind,
            times,
            raw: trimmed.to_string(),
        }))
    }

    pub fn is_exact(&self) -> bool {
        matches!(self.kind, MatchKind::Exact(_))
    }
}

impl fmt::Display for MatchExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn unquote(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .or_else(|| text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')))
        .unwrap_or(text)
}

// ============================================================================
// Binding to request fields
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyStep {
    Key(String),
    Index(usize),
}

/// Where in a request an expression applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldLocation {
    PathSegment(usize),
    Query(String),
    Header(String),
    Body(Vec<BodyStep>),
}

impl FieldLocation {
    /// Stable label, also the use-counter key for `exact` expressions.
    pub fn label(&self) -> String {
        match self {
            FieldLocation::PathSegment(i) => format!("path[{i}]"),
            FieldLocation::Query(key) => format!("query.{key}"),
            FieldLocation::Header(name) => format!("header.{name}"),
            FieldLocation::Body(steps) => {
                let mut label = "body".to_string();
                for step in steps {
                    match step {
                        BodyStep::Key(key) => {
                            label.push('.');
                            label.push_str(key);
                        }
                        BodyStep::Index(i) => label.push_str(&format!("[{i}]")),
                    }
                }
                label
            }
        }
    }

    /// The request's value at this location, if present.
    pub fn extract(&self, request: &HttpRequest) -> Option<Value> {
        match self {
            FieldLocation::PathSegment(i) => request
                .path_segments()
                .get(*i)
                .map(|s| Value::String(s.to_string())),
            FieldLocation::Query(key) => request.query.get(key).cloned().map(Value::String),
            FieldLocation::Header(name) => request.header(name).map(|v| Value::String(v.to_string())),
            FieldLocation::Body(steps) => {
                let mut current = &request.body;
                for step in steps {
                    current = match step {
                        BodyStep::Key(key) => current.get(key)?,
                        BodyStep::Index(i) => current.get(*i)?,
                    };
                }
                Some(current.clone())
            }
        }
    }
}

/// A match expression bound to the request field it came from
#[derive(Debug, Clone, PartialEq)]
pub struct BoundExpression {
    pub location: FieldLocation,
    pub expression: MatchExpression,
}

impl BoundExpression {
    /// Whether the value satisfies the expression, ignoring use limits.
    pub fn accepts(&self, value: &Value) -> bool {
        match &self.expression.kind {
            MatchKind::Any => true,
            MatchKind::Exact(literal) => &value_as_text(value) == literal,
            MatchKind::DataType(pattern) => match (&self.location, value) {
                (FieldLocation::Body(_), value) => pattern.matches(value).is_ok(),
                (_, value) => pattern.matches_text(&value_as_text(value)).is_ok(),
            },
        }
    }
}

/// Collect every match expression in an example request.
pub fn bind_expressions(example: &HttpRequest) -> Result<Vec<BoundExpression>, String> {
    let mut bound = Vec::new();
    let mut push = |location: FieldLocation, text: &str| -> Result<(), String> {
        if let Some(expression) = MatchExpression::parse(text)? {
            bound.push(BoundExpression {
                location,
                expression,
            });
        }
        Ok(())
    };

    for (i, segment) in example.path_segments().into_iter().enumerate() {
        push(FieldLocation::PathSegment(i), segment)?;
    }
    for (key, value) in &example.query {
        push(FieldLocation::Query(key.clone()), value)?;
    }
    for (name, value) in &example.headers {
        push(FieldLocation::Header(name.clone()), value)?;
    }

    let mut body_strings = Vec::new();
    collect_body_strings(&example.body, &mut Vec::new(), &mut body_strings);
    for (steps, text) in body_strings {
        push(FieldLocation::Body(steps), &text)?;
    }

    Ok(bound)
}

fn collect_body_strings(value: &Value, steps: &mut Vec<BodyStep>, out: &mut Vec<(Vec<BodyStep>, String)>) {
    match value {
        Value::String(s) => out.push((steps.clone(), s.clone())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                steps.push(BodyStep::Index(i));
                collect_body_strings(item, steps, out);
                steps.pop();
            }
        }
        Value::Object(obj) => {
            for (key, item) in obj {
                steps.push(BodyStep::Key(key.clone()));
                collect_body_strings(item, steps, out);
                steps.pop();
            }
        }
        _ => {}
    }
}
