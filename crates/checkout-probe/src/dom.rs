//! DOM assertion engine.
//!
//! Every call re-queries the live document; nothing is cached between calls.

use crate::assertion::{AssertionResult, ElementQuery};
use crate::engine::PageRef;
use crate::result::ProbeResult;
use crate::selector::Selector;

/// Number of elements currently matching `selector`
pub async fn query(page: &PageRef, selector: &Selector) -> ProbeResult<usize> {
    let count = page.count(selector).await?;
    tracing::debug!(%selector, count, "dom query");
    Ok(count)
}

/// Handle to the first element matching `selector`, if any
pub async fn first_matching(page: &PageRef, selector: &Selector) -> ProbeResult<Option<ElementHandle>> {
    Ok((query(page, selector).await? > 0).then(|| ElementHandle {
        page: PageRef::clone(page),
        selector: selector.clone(),
        index: 0,
    }))
}

/// Evaluate `query` against the live document
pub async fn check(page: &PageRef, query: &ElementQuery) -> ProbeResult<AssertionResult> {
    let count = self::query(page, &query.selector).await?;
    Ok(query.evaluate(count))
}

/// Evaluate `query` and attach the first match's trimmed text and `href`
pub async fn check_and_extract(page: &PageRef, query: &ElementQuery) -> ProbeResult<AssertionResult> {
    let result = check(page, query).await?;
    let Some(first) = first_matching(page, &query.selector).await? else {
        return Ok(result);
    };
    let text = first.text().await?;
    let href = first.attribute("href").await?;
    Ok(result.with_text(text).with_href(href))
}

/// Positional reference to a matched element.
///
/// The handle stores the selector and index, not a node; each access
/// re-resolves against the current document.
#[derive(Debug, Clone)]
pub struct ElementHandle {
    page: PageRef,
    selector: Selector,
    index: usize,
}

impl ElementHandle {
    /// Selector this handle resolves through
    #[must_use]
    pub const fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Trimmed text content
    pub async fn text(&self) -> ProbeResult<Option<String>> {
        Ok(self
            .page
            .text_content(&self.selector, self.index)
            .await?
            .map(|t| t.trim().to_string()))
    }

    /// Value of attribute `name`
    pub async fn attribute(&self, name: &str) -> ProbeResult<Option<String>> {
        self.page.attribute(&self.selector, self.index, name).await
    }

    /// Click the element
    pub async fn click(&self) -> ProbeResult<()> {
        tracing::debug!(selector = %self.selector, index = self.index, "click");
        self.page.click(&self.selector, self.index).await
    }
}
