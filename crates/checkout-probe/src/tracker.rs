//! Cross-tab navigation tracker.
//!
//! A click that opens a new tab is handled as arm-then-act: the expectation
//! for the new page is registered with the context before the click is
//! issued, so a tab that opens immediately is never missed.
//!
//! ```text
//! Armed --trigger--> Pending --resolve--> Resolved
//! ```

use crate::engine::{BrowsingContext, PageRef, PageWaiter};
use crate::result::{ProbeError, ProbeResult};
use crate::wait::{LoadState, WaitOptions};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// Lifecycle of a [`NavigationExpectation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TrackerState {
    /// Expectation registered, trigger not issued
    Armed,
    /// Trigger issued, new page not yet observed
    Pending,
    /// New page observed and reached `DOMContentLoaded`
    Resolved,
}

/// Token for "a new page will appear in this context"
pub struct NavigationExpectation {
    waiter: Option<PageWaiter>,
    state: TrackerState,
}

impl std::fmt::Debug for NavigationExpectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationExpectation")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl NavigationExpectation {
    /// Register the expectation with `context`.
    ///
    /// Fails if a secondary page from an earlier navigation is still open.
    pub async fn arm(context: &dyn BrowsingContext) -> ProbeResult<Self> {
        let open = context.pages().await?.len();
        if open > 1 {
            return Err(ProbeError::invalid_state(format!(
                "{} secondary page(s) still open",
                open - 1
            )));
        }
        let waiter = context.expect_page().await?;
        tracing::debug!("new-page expectation armed");
        Ok(Self {
            waiter: Some(waiter),
            state: TrackerState::Armed,
        })
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> TrackerState {
        self.state
    }

    /// Issue the triggering action, bounded by `timeout`
    pub async fn trigger<F, Fut>(&mut self, action: F, timeout: Duration) -> ProbeResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProbeResult<()>>,
    {
        if self.state != TrackerState::Armed {
            return Err(ProbeError::invalid_state(format!(
                "trigger issued while {:?}",
                self.state
            )));
        }
        tokio::time::timeout(timeout, action())
            .await
            .map_err(|_| ProbeError::NewPageTimeout { ms: millis(timeout) })??;
        self.state = TrackerState::Pending;
        tracing::debug!("trigger issued, awaiting new page");
        Ok(())
    }

    /// Await the new page and its `DOMContentLoaded`, bounded by `timeout`.
    ///
    /// The resolved page is returned open; closing it is the caller's job.
    pub async fn resolve(&mut self, timeout: Duration) -> ProbeResult<PageRef> {
        if self.state != TrackerState::Pending {
            return Err(ProbeError::invalid_state(format!(
                "resolve called while {:?}",
                self.state
            )));
        }
        let waiter = self
            .waiter
            .take()
            .ok_or_else(|| ProbeError::invalid_state("expectation already consumed"))?;
        let ms = millis(timeout);
        let wait = WaitOptions::new()
            .with_timeout(ms)
            .with_wait_until(LoadState::DomContentLoaded);

        let page = tokio::time::timeout(timeout, async move {
            let page = waiter.await?;
            page.wait_for_load_state(&wait).await?;
            Ok::<_, ProbeError>(page)
        })
        .await
        .map_err(|_| ProbeError::NewPageTimeout { ms })??;

        self.state = TrackerState::Resolved;
        tracing::debug!(page = page.id(), "new page resolved");
        Ok(page)
    }
}

/// Arm, run `trigger`, and await the page it opens.
///
/// The trigger and the new-page wait each get the full `timeout`.
pub async fn click_and_await_new_page<F, Fut>(
    context: &dyn BrowsingContext,
    trigger: F,
    timeout: Duration,
) -> ProbeResult<PageRef>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ProbeResult<()>>,
{
    let mut expectation = NavigationExpectation::arm(context).await?;
    expectation.trigger(trigger, timeout).await?;
    expectation.resolve(timeout).await
}

fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}
