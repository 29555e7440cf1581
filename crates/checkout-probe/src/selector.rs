//! Structural selectors for the DOM assertion engine.
//!
//! A [`Selector`] is a tag, an optional ancestor id, an optional attribute
//! filter and an optional text filter. The structural part renders to plain
//! CSS for the browser; the text filter is applied to each candidate's text
//! content as a case-insensitive substring match.

use serde::Serialize;

/// How an attribute value is compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AttrMatch {
    /// `[name="value"]`
    Equals,
    /// `[name*="value"]`
    Contains,
    /// `[name^="value"]`
    Prefix,
}

impl AttrMatch {
    /// CSS operator for this comparison
    #[must_use]
    pub const fn css_operator(self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::Contains => "*=",
            Self::Prefix => "^=",
        }
    }

    /// Compare an attribute value against the expected value
    #[must_use]
    pub fn matches(self, actual: &str, expected: &str) -> bool {
        match self {
            Self::Equals => actual == expected,
            Self::Contains => actual.contains(expected),
            Self::Prefix => actual.starts_with(expected),
        }
    }
}

/// Attribute filter of a selector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AttrFilter {
    /// Attribute name
    pub name: String,
    /// Comparison
    pub op: AttrMatch,
    /// Expected value
    pub value: String,
}

/// Selector for locating elements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Selector {
    tag: String,
    within_id: Option<String>,
    attr: Option<AttrFilter>,
    text: Option<String>,
}

impl Selector {
    /// Select elements by tag name
    #[must_use]
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            within_id: None,
            attr: None,
            text: None,
        }
    }

    /// Anchors whose `href` contains `needle`
    #[must_use]
    pub fn anchor_href_contains(needle: impl Into<String>) -> Self {
        Self::tag("a").with_attr("href", AttrMatch::Contains, needle)
    }

    /// Anchors whose `href` starts with `prefix`
    #[must_use]
    pub fn anchor_href_prefix(prefix: impl Into<String>) -> Self {
        Self::tag("a").with_attr("href", AttrMatch::Prefix, prefix)
    }

    /// Buttons whose text contains `text`
    #[must_use]
    pub fn button_with_text(text: impl Into<String>) -> Self {
        Self::tag("button").with_text(text)
    }

    /// Restrict to descendants of the element with this id
    #[must_use]
    pub fn within(mut self, id: impl Into<String>) -> Self {
        self.within_id = Some(id.into());
        self
    }

    /// Add an attribute filter
    #[must_use]
    pub fn with_attr(
        mut self,
        name: impl Into<String>,
        op: AttrMatch,
        value: impl Into<String>,
    ) -> Self {
        self.attr = Some(AttrFilter {
            name: name.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Add a text filter
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Tag name
    #[must_use]
    pub fn tag_name(&self) -> &str {
        &self.tag
    }

    /// Ancestor id, if any
    #[must_use]
    pub fn within_id(&self) -> Option<&str> {
        self.within_id.as_deref()
    }

    /// Attribute filter, if any
    #[must_use]
    pub const fn attr(&self) -> Option<&AttrFilter> {
        self.attr.as_ref()
    }

    /// Text filter, if any
    #[must_use]
    pub fn text_filter(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Structural part as a CSS selector (the text filter is not expressible in CSS)
    #[must_use]
    pub fn to_css(&self) -> String {
        let mut css = String::new();
        if let Some(id) = &self.within_id {
            css.push('#');
            css.push_str(id);
            css.push(' ');
        }
        css.push_str(&self.tag);
        if let Some(attr) = &self.attr {
            css.push_str(&format!(
                "[{}{}{:?}]",
                attr.name,
                attr.op.css_operator(),
                attr.value
            ));
        }
        css
    }

    /// Whether an element's text content passes the text filter.
    ///
    /// Matching is a case-insensitive substring test on whitespace-collapsed text.
    #[must_use]
    pub fn accepts_text(&self, text_content: &str) -> bool {
        match &self.text {
            None => true,
            Some(needle) => {
                normalize_text(text_content).contains(&normalize_text(needle))
            }
        }
    }

    /// Whether an attribute lookup passes the attribute filter
    #[must_use]
    pub fn accepts_attr<'a>(&self, lookup: impl Fn(&str) -> Option<&'a str>) -> bool {
        match &self.attr {
            None => true,
            Some(filter) => lookup(&filter.name)
                .is_some_and(|actual| filter.op.matches(actual, &filter.value)),
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_css())?;
        if let Some(text) = &self.text {
            write!(f, ":has-text({text:?})")?;
        }
        Ok(())
    }
}

fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
