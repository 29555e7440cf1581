//! Assertion results and cardinality expectations.

use crate::selector::Selector;
use serde::Serialize;

/// Outcome of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Verdict {
    /// Check passed
    Pass,
    /// Check failed
    Fail,
    /// Check was not attempted
    Skipped,
}

impl Verdict {
    /// Check if verdict is passing
    #[must_use]
    pub const fn is_pass(self) -> bool {
        matches!(self, Self::Pass)
    }

    /// Check if verdict is failing
    #[must_use]
    pub const fn is_fail(self) -> bool {
        matches!(self, Self::Fail)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skipped => "skipped",
        })
    }
}

/// Expected number of matches for an element query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Cardinality {
    /// Count must be 0
    Absent,
    /// Count must be at least 1
    Present,
    /// Count must be exactly 1
    ExactlyOne,
}

impl Cardinality {
    /// Whether `count` satisfies this expectation
    #[must_use]
    pub const fn accepts(self, count: usize) -> bool {
        match self {
            Self::Absent => count == 0,
            Self::Present => count >= 1,
            Self::ExactlyOne => count == 1,
        }
    }

    /// Human-readable expectation
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Absent => "none",
            Self::Present => "at least one",
            Self::ExactlyOne => "exactly one",
        }
    }
}

/// A selector paired with the number of matches it must produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementQuery {
    /// Label used in the report
    pub label: String,
    /// What to look for
    pub selector: Selector,
    /// How many matches are expected
    pub cardinality: Cardinality,
}

impl ElementQuery {
    /// Create a new element query
    #[must_use]
    pub fn new(label: impl Into<String>, selector: Selector, cardinality: Cardinality) -> Self {
        Self {
            label: label.into(),
            selector,
            cardinality,
        }
    }

    /// Query that must match nothing
    #[must_use]
    pub fn absent(label: impl Into<String>, selector: Selector) -> Self {
        Self::new(label, selector, Cardinality::Absent)
    }

    /// Query that must match at least once
    #[must_use]
    pub fn present(label: impl Into<String>, selector: Selector) -> Self {
        Self::new(label, selector, Cardinality::Present)
    }

    /// Query that must match exactly once
    #[must_use]
    pub fn exactly_one(label: impl Into<String>, selector: Selector) -> Self {
        Self::new(label, selector, Cardinality::ExactlyOne)
    }

    /// Reduce an observed count to an assertion result
    #[must_use]
    pub fn evaluate(&self, count: usize) -> AssertionResult {
        let detail = format!(
            "{} `{}` (expected {})",
            count,
            self.selector,
            self.cardinality.describe()
        );
        let result = if self.cardinality.accepts(count) {
            AssertionResult::pass(&self.label, detail)
        } else {
            AssertionResult::fail(&self.label, format!("found {detail}"))
        };
        result.with_count(count)
    }
}

/// Result of an assertion.
///
/// Values are built once and only read afterwards; the `with_*` builders
/// consume the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionResult {
    verdict: Verdict,
    label: String,
    message: String,
    count: Option<usize>,
    text: Option<String>,
    href: Option<String>,
}

impl AssertionResult {
    fn new(verdict: Verdict, label: &str, message: String) -> Self {
        Self {
            verdict,
            label: label.to_string(),
            message,
            count: None,
            text: None,
            href: None,
        }
    }

    /// Create a passing assertion result
    #[must_use]
    pub fn pass(label: &str, message: impl Into<String>) -> Self {
        Self::new(Verdict::Pass, label, message.into())
    }

    /// Create a failing assertion result
    #[must_use]
    pub fn fail(label: &str, message: impl Into<String>) -> Self {
        Self::new(Verdict::Fail, label, message.into())
    }

    /// Record a check that was not attempted
    #[must_use]
    pub fn skipped(label: &str, reason: impl Into<String>) -> Self {
        Self::new(Verdict::Skipped, label, reason.into())
    }

    /// Pass or fail depending on `condition`
    #[must_use]
    pub fn check(condition: bool, label: &str, message: impl Into<String>) -> Self {
        if condition {
            Self::pass(label, message)
        } else {
            Self::fail(label, message)
        }
    }

    /// Attach the observed match count
    #[must_use]
    pub const fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Attach extracted text
    #[must_use]
    pub fn with_text(mut self, text: Option<String>) -> Self {
        self.text = text;
        self
    }

    /// Attach an extracted href
    #[must_use]
    pub fn with_href(mut self, href: Option<String>) -> Self {
        self.href = href;
        self
    }

    /// Verdict
    #[must_use]
    pub const fn verdict(&self) -> Verdict {
        self.verdict
    }

    /// Whether the assertion passed
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.verdict.is_pass()
    }

    /// Label
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Human-readable detail
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Observed match count, if the result came from an element query
    #[must_use]
    pub const fn count(&self) -> Option<usize> {
        self.count
    }

    /// Extracted text
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Extracted href
    #[must_use]
    pub fn href(&self) -> Option<&str> {
        self.href.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinality_accepts() {
        assert!(Cardinality::Absent.accepts(0));
        assert!(!Cardinality::Absent.accepts(1));
        assert!(Cardinality::Present.accepts(3));
        assert!(!Cardinality::Present.accepts(0));
        assert!(Cardinality::ExactlyOne.accepts(1));
        assert!(!Cardinality::ExactlyOne.accepts(0));
        assert!(!Cardinality::ExactlyOne.accepts(2));
    }

    #[test]
    fn test_exactly_one_failure_reports_count() {
        let query = ElementQuery::exactly_one(
            "payment CTA present",
            Selector::anchor_href_prefix("https://buy.example-processor.com"),
        );
        let two = query.evaluate(2);
        assert_eq!(two.verdict(), Verdict::Fail);
        assert_eq!(two.count(), Some(2));
        assert!(two.message().contains("found 2"));

        let zero = query.evaluate(0);
        assert!(!zero.passed());
        assert!(zero.message().contains("found 0"));

        assert!(query.evaluate(1).passed());
    }

    #[test]
    fn test_builders_attach_extractions() {
        let result = AssertionResult::pass("cta", "ok")
            .with_text(Some("Get Instant Access".into()))
            .with_href(Some("https://buy.example-processor.com/abc123".into()));
        assert_eq!(result.text(), Some("Get Instant Access"));
        assert_eq!(result.href(), Some("https://buy.example-processor.com/abc123"));
        assert_eq!(result.label(), "cta");
    }

    #[test]
    fn test_check_and_skipped() {
        assert!(AssertionResult::check(true, "x", "y").passed());
        assert_eq!(AssertionResult::check(false, "x", "y").verdict(), Verdict::Fail);
        let skipped = AssertionResult::skipped("destination", "no CTA");
        assert_eq!(skipped.verdict(), Verdict::Skipped);
        assert!(!skipped.verdict().is_fail());
        assert_eq!(Verdict::Skipped.to_string(), "skipped");
    }
}
