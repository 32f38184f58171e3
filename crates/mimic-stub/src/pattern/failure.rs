//! Mismatch reporting.

use std::fmt;

/// A single reason a value did not fit a pattern.
///
/// `breadcrumb` locates the offending field, e.g. `REQUEST.BODY.items[0].name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchFailure {
    pub breadcrumb: String,
    pub message: String,
}

impl MatchFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            breadcrumb: String::new(),
            message: message.into(),
        }
    }

    pub fn at(breadcrumb: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            breadcrumb: breadcrumb.into(),
            message: message.into(),
        }
    }

    /// Prefix the breadcrumb with an enclosing field name.
    pub fn nested(mut self, parent: &str) -> Self {
        self.breadcrumb = join_breadcrumb(parent, &self.breadcrumb);
        self
    }
}

fn join_breadcrumb(parent: &str, child: &str) -> String {
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (false, true) => parent.to_string(),
        (false, false) if child.starts_with('[') => format!("{parent}{child}"),
        (false, false) => format!("{parent}.{child}"),
    }
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.breadcrumb.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, ">> {}: {}", self.breadcrumb, self.message)
        }
    }
}

/// Prefix every failure with `parent`.
pub fn nest_all(failures: Vec<MatchFailure>, parent: &str) -> Vec<MatchFailure> {
    failures.into_iter().map(|f| f.nested(parent)).collect()
}

/// One failure per line.
pub fn render_failures(failures: &[MatchFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_breadcrumbs() {
        let failure = MatchFailure::at("name", "Expected string")
            .nested("[0]")
            .nested("items")
            .nested("BODY");
        assert_eq!(failure.breadcrumb, "BODY.items[0].name");
        assert_eq!(
            failure.to_string(),
            ">> BODY.items[0].name: Expected string"
        );
    }

    #[test]
    fn test_display_without_breadcrumb() {
        assert_eq!(MatchFailure::new("boom").to_string(), "boom");
    }
}
