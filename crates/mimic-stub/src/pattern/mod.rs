//! Typed value patterns.
//!
//! Contracts describe values with a small notation:
//!
//! - `"(string)"`, `"(number)"`, `"(integer)"`, `"(boolean)"`, `"(null)"`,
//!   `"(uuid)"`, `"(date)"`, `"(datetime)"`, `"(anything)"`
//! - `"(string?)"` for a nullable value
//! - any other scalar is an exact value
//! - objects list their fields; a key ending in `?` is optional
//! - a one-element array is a list of that element's pattern
//!
//! Example documents are turned into patterns too ([`Pattern::from_example`]):
//! every value is exact, except strings holding a `$match(...)` expression,
//! which are wildcards left to the stateful matcher.

mod failure;
mod generate;

pub use failure::{nest_all, render_failures, MatchFailure};
pub use generate::Generator;

use crate::http::value_as_text;
use serde_json::Value;
use std::fmt;

/// Prefix that marks a string as a match expression
pub const MATCH_EXPRESSION_PREFIX: &str = "$match(";

pub fn is_match_expression(text: &str) -> bool {
    text.trim_start().starts_with(MATCH_EXPRESSION_PREFIX)
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PatternError {
    #[error("unknown type '({0})'")]
    UnknownType(String),
    #[error("list patterns take exactly one element, found {0}")]
    ListArity(usize),
    #[error("field '{field}': {source}")]
    InField {
        field: String,
        #[source]
        source: Box<PatternError>,
    },
}

/// Field of an object pattern
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPattern {
    pub key: String,
    pub optional: bool,
    pub pattern: Pattern,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Anything,
    String,
    Number,
    Integer,
    Boolean,
    Null,
    Uuid,
    Date,
    DateTime,
    Exact(Value),
    Nullable(Box<Pattern>),
    Object(Vec<FieldPattern>),
    List(Box<Pattern>),
    /// Fixed-length array, element-wise (from example documents)
    Tuple(Vec<Pattern>),
}

/// Knobs for a single match
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// Treat `$match(...)` strings in the value as fitting any pattern.
    /// Used when validating example documents against a contract.
    pub accept_match_expressions: bool,
}

impl MatchOptions {
    pub fn lenient() -> Self {
        Self {
            accept_match_expressions: true,
        }
    }
}

impl Pattern {
    /// Parse a contract pattern.
    pub fn parse(value: &Value) -> Result<Self, PatternError> {
        match value {
            Value::String(s) => Self::parse_text(s),
            Value::Object(obj) => {
                let mut fields = Vec::with_capacity(obj.len());
                for (key, raw) in obj {
                    let (key, optional) = match key.strip_suffix('?') {
                        Some(stripped) => (stripped.to_string(), true),
                        None => (key.clone(), false),
                    };
                    let pattern = Self::parse(raw).map_err(|e| PatternError::InField {
                        field: key.clone(),
                        source: Box::new(e),
                    })?;
                    fields.push(FieldPattern {
                        key,
                        optional,
                        pattern,
                    });
                }
                Ok(Pattern::Object(fields))
            }
            Value::Array(items) => match items.as_slice() {
                [] => Ok(Pattern::List(Box::new(Pattern::Anything))),
                [item] => Ok(Pattern::List(Box::new(Self::parse(item)?))),
                more => Err(PatternError::ListArity(more.len())),
            },
            scalar => Ok(Pattern::Exact(scalar.clone())),
        }
    }

    /// Parse a textual pattern such as `(number)` or a literal.
    pub fn parse_text(text: &str) -> Result<Self, PatternError> {
        let Some(token) = text
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
        else {
            return Ok(Pattern::Exact(Value::String(text.to_string())));
        };

        let token = token.trim();
        if let Some(inner) = token.strip_suffix('?') {
            let inner = Self::type_named(inner.trim())
                .ok_or_else(|| PatternError::UnknownType(token.to_string()))?;
            return Ok(Pattern::Nullable(Box::new(inner)));
        }
        Self::type_named(token).ok_or_else(|| PatternError::UnknownType(token.to_string()))
    }

    /// Scalar type by name, as used in `(name)` and `$match(dataType: name)`.
    pub fn type_named(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "string" => Some(Pattern::String),
            "number" => Some(Pattern::Number),
            "integer" => Some(Pattern::Integer),
            "boolean" => Some(Pattern::Boolean),
            "null" => Some(Pattern::Null),
            "uuid" => Some(Pattern::Uuid),
            "date" => Some(Pattern::Date),
            "datetime" => Some(Pattern::DateTime),
            "anything" | "any" => Some(Pattern::Anything),
            _ => None,
        }
    }

    /// Exact pattern built from an example value.
    pub fn from_example(value: &Value) -> Self {
        match value {
            Value::String(s) if is_match_expression(s) => Pattern::Anything,
            Value::Object(obj) => Pattern::Object(
                obj.iter()
                    .map(|(key, v)| FieldPattern {
                        key: key.clone(),
                        optional: false,
                        pattern: Self::from_example(v),
                    })
                    .collect(),
            ),
            Value::Array(items) => Pattern::Tuple(items.iter().map(Self::from_example).collect()),
            scalar => Pattern::Exact(scalar.clone()),
        }
    }

    pub fn matches(&self, value: &Value) -> Result<(), Vec<MatchFailure>> {
        self.matches_with(value, MatchOptions::default())
    }

    pub fn matches_with(&self, value: &Value, opts: MatchOptions) -> Result<(), Vec<MatchFailure>> {
        if opts.accept_match_expressions {
            if let Value::String(s) = value {
                if is_match_expression(s) {
                    return Ok(());
                }
            }
        }

        match self {
            Pattern::Anything => Ok(()),
            Pattern::Nullable(_) if value.is_null() => Ok(()),
            Pattern::Nullable(inner) => inner.matches_with(value, opts),
            Pattern::Exact(expected) => {
                if exact_equals(expected, value) {
                    Ok(())
                } else {
                    Err(vec![MatchFailure::new(format!(
                        "Expected {}, actual was {}",
                        expected,
                        describe(value)
                    ))])
                }
            }
            Pattern::Object(fields) => match_object(fields, value, opts),
            Pattern::List(item) => {
                let Value::Array(items) = value else {
                    return Err(vec![self.type_failure(value)]);
                };
                let failures: Vec<MatchFailure> = items
                    .iter()
                    .enumerate()
                    .filter_map(|(i, v)| item.matches_with(v, opts).err().map(|f| (i, f)))
                    .flat_map(|(i, f)| nest_all(f, &format!("[{i}]")))
                    .collect();
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(failures)
                }
            }
            Pattern::Tuple(patterns) => {
                let Value::Array(items) = value else {
                    return Err(vec![self.type_failure(value)]);
                };
                if items.len() != patterns.len() {
                    return Err(vec![MatchFailure::new(format!(
                        "Expected {} elements, actual was {}",
                        patterns.len(),
                        items.len()
                    ))]);
                }
                let failures: Vec<MatchFailure> = patterns
                    .iter()
                    .zip(items)
                    .enumerate()
                    .filter_map(|(i, (p, v))| p.matches_with(v, opts).err().map(|f| (i, f)))
                    .flat_map(|(i, f)| nest_all(f, &format!("[{i}]")))
                    .collect();
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(failures)
                }
            }
            scalar => {
                if scalar_fits(scalar, value) {
                    Ok(())
                } else {
                    Err(vec![self.type_failure(value)])
                }
            }
        }
    }

    /// Match a value that arrived as text (path segment, query value, header).
    pub fn matches_text(&self, text: &str) -> Result<(), MatchFailure> {
        self.matches_text_with(text, MatchOptions::default())
    }

    pub fn matches_text_with(&self, text: &str, opts: MatchOptions) -> Result<(), MatchFailure> {
        if opts.accept_match_expressions && is_match_expression(text) {
            return Ok(());
        }

        let fits = match self {
            Pattern::Anything | Pattern::String => true,
            Pattern::Number => text.parse::<f64>().is_ok(),
            Pattern::Integer => text.parse::<i64>().is_ok(),
            Pattern::Boolean => text == "true" || text == "false",
            Pattern::Null => text.is_empty() || text == "null",
            Pattern::Uuid => uuid::Uuid::parse_str(text).is_ok(),
            Pattern::Date => chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
            Pattern::DateTime => chrono::DateTime::parse_from_rfc3339(text).is_ok(),
            Pattern::Exact(expected) => value_as_text(expected) == text,
            Pattern::Nullable(inner) => {
                return if text.is_empty() {
                    Ok(())
                } else {
                    inner.matches_text_with(text, opts)
                };
            }
            Pattern::Object(_) | Pattern::List(_) | Pattern::Tuple(_) => {
                return match serde_json::from_str::<Value>(text) {
                    Ok(parsed) => self
                        .matches_with(&parsed, opts)
                        .map_err(|failures| MatchFailure::new(render_failures(&failures))),
                    Err(_) => Err(MatchFailure::new(format!(
                        "Expected {self}, actual was \"{text}\" which is not JSON"
                    ))),
                };
            }
        };

        if fits {
            Ok(())
        } else {
            Err(MatchFailure::new(format!(
                "Expected {self}, actual was \"{text}\""
            )))
        }
    }

    fn type_failure(&self, value: &Value) -> MatchFailure {
        MatchFailure::new(format!("Expected {self}, actual was {}", describe(value)))
    }
}

fn match_object(
    fields: &[FieldPattern],
    value: &Value,
    opts: MatchOptions,
) -> Result<(), Vec<MatchFailure>> {
    let Value::Object(actual) = value else {
        return Err(vec![MatchFailure::new(format!(
            "Expected json object, actual was {}",
            describe(value)
        ))]);
    };

    let mut failures = Vec::new();
    for field in fields {
        match actual.get(&field.key) {
            Some(v) => {
                if let Err(nested) = field.pattern.matches_with(v, opts) {
                    failures.extend(nest_all(nested, &field.key));
                }
            }
            None if field.optional => {}
            None => failures.push(MatchFailure::at(
                field.key.clone(),
                "Expected key was missing",
            )),
        }
    }
    for key in actual.keys() {
        if !fields.iter().any(|f| &f.key == key) {
            failures.push(MatchFailure::at(
                key.clone(),
                "Key was not expected (not in the pattern)",
            ));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}

fn scalar_fits(pattern: &Pattern, value: &Value) -> bool {
    match (pattern, value) {
        (Pattern::String, Value::String(_)) => true,
        (Pattern::Number, Value::Number(_)) => true,
        (Pattern::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (Pattern::Boolean, Value::Bool(_)) => true,
        (Pattern::Null, Value::Null) => true,
        (Pattern::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s).is_ok(),
        (Pattern::Date, Value::String(s)) => {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        }
        (Pattern::DateTime, Value::String(s)) => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
        _ => false,
    }
}

fn exact_equals(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => expected == actual,
    }
}

/// `"abc" (string)`-style rendering for mismatch messages
pub fn describe(value: &Value) -> String {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "json array",
        Value::Object(_) => "json object",
    };
    match value {
        Value::Null => "null".to_string(),
        Value::Array(_) | Value::Object(_) => kind.to_string(),
        other => format!("{other} ({kind})"),
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Anything => write!(f, "anything"),
            Pattern::String => write!(f, "string"),
            Pattern::Number => write!(f, "number"),
            Pattern::Integer => write!(f, "integer"),
            Pattern::Boolean => write!(f, "boolean"),
            Pattern::Null => write!(f, "null"),
            Pattern::Uuid => write!(f, "uuid"),
            Pattern::Date => write!(f, "date"),
            Pattern::DateTime => write!(f, "datetime"),
            Pattern::Exact(v) => write!(f, "{v}"),
            Pattern::Nullable(inner) => write!(f, "{inner} or null"),
            Pattern::Object(_) => write!(f, "json object"),
            Pattern::List(inner) => write!(f, "list of {inner}"),
            Pattern::Tuple(items) => write!(f, "json array of {} elements", items.len()),
        }
    }
}
