//! Viewport/session controller.
//!
//! A [`Session`] owns the browser, one browsing context and the long-lived
//! primary page. Viewport switches re-navigate the same primary page; no
//! second session is ever created.

use crate::engine::{BrowsingContext, ContextOptions, Driver, PageRef};
use crate::result::{ProbeError, ProbeResult};
use crate::viewport::ViewportPreset;
use crate::wait::{LoadState, WaitOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Numbered viewport screenshots written after each navigation and click
#[derive(Debug)]
pub struct Recorder {
    dir: PathBuf,
    seq: AtomicUsize,
}

impl Recorder {
    /// Record into `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicUsize::new(0),
        }
    }

    /// Recording directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Frames written so far
    #[must_use]
    pub fn frames(&self) -> usize {
        self.seq.load(Ordering::SeqCst)
    }

    /// Write the next frame of `page`; failures are logged and dropped
    pub async fn capture(&self, page: &PageRef, label: &str) {
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.dir.join(format!("{n:03}-{label}.png"));
        if let Err(err) = page.screenshot(&path, false).await {
            tracing::warn!(path = %path.display(), "recording frame failed: {err}");
        }
    }
}

/// Browser session with one primary page
#[derive(Debug)]
pub struct Session {
    driver: Arc<dyn Driver>,
    context: Box<dyn BrowsingContext>,
    primary: PageRef,
    navigation: WaitOptions,
    settle: Duration,
    recorder: Option<Recorder>,
}

impl Session {
    /// Create the context and primary page on `driver`.
    ///
    /// The driver is not closed on failure; it still belongs to the caller
    /// until a session is returned.
    pub async fn open(
        driver: Arc<dyn Driver>,
        options: &ContextOptions,
        navigation_timeout: Duration,
        settle: Duration,
    ) -> ProbeResult<Self> {
        let context = driver.new_context(options).await?;
        let primary = match open_primary(context.as_ref(), options.viewport).await {
            Ok(page) => page,
            Err(err) => {
                if let Err(close_err) = context.close().await {
                    tracing::warn!("context cleanup failed: {close_err}");
                }
                return Err(err);
            }
        };
        let timeout_ms = u64::try_from(navigation_timeout.as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(page = primary.id(), "session opened");
        Ok(Self {
            driver,
            context,
            primary,
            navigation: WaitOptions::new()
                .with_timeout(timeout_ms)
                .with_wait_until(LoadState::NetworkIdle),
            settle,
            recorder: options.record_dir.as_ref().map(Recorder::new),
        })
    }

    /// The primary page
    #[must_use]
    pub const fn primary(&self) -> &PageRef {
        &self.primary
    }

    /// The browsing context
    #[must_use]
    pub fn context(&self) -> &dyn BrowsingContext {
        self.context.as_ref()
    }

    /// Recording sink, if configured
    #[must_use]
    pub const fn recorder(&self) -> Option<&Recorder> {
        self.recorder.as_ref()
    }

    /// Resize the primary page, load `entry_url` to network idle, then settle
    pub async fn with_viewport(&self, preset: ViewportPreset, entry_url: &str) -> ProbeResult<PageRef> {
        tracing::debug!(%preset, url = entry_url, "switching viewport");
        self.primary.set_viewport(preset).await?;
        self.navigate(entry_url).await?;
        self.settle().await;
        Ok(PageRef::clone(&self.primary))
    }

    /// Load `url` on the primary page and wait for network idle
    pub async fn navigate(&self, url: &str) -> ProbeResult<()> {
        let budget = self.navigation.timeout();
        tokio::time::timeout(budget, self.primary.goto(url, &self.navigation))
            .await
            .map_err(|_| self.timeout_error(url))??;
        self.record("navigate").await;
        Ok(())
    }

    /// Wait for the primary page's network to go idle after an in-page action
    pub async fn wait_for_network_idle(&self) -> ProbeResult<()> {
        let budget = self.navigation.timeout();
        if tokio::time::timeout(budget, self.primary.wait_for_load_state(&self.navigation))
            .await
            .is_err()
        {
            let url = self.primary.url().await.ok().flatten().unwrap_or_default();
            return Err(self.timeout_error(&url));
        }
        Ok(())
    }

    /// Fixed delay for late client-side rendering
    pub async fn settle(&self) {
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
    }

    /// Write a recording frame of the primary page
    pub async fn record(&self, label: &str) {
        if let Some(recorder) = &self.recorder {
            recorder.capture(&self.primary, label).await;
        }
    }

    /// Close every page other than the primary one
    pub async fn close_secondary_pages(&self) -> ProbeResult<usize> {
        let mut closed = 0;
        for page in self.context.pages().await? {
            if page.id() != self.primary.id() {
                page.close().await?;
                closed += 1;
            }
        }
        if closed > 0 {
            tracing::debug!(closed, "closed stray secondary pages");
        }
        Ok(closed)
    }

    /// Dispose of the context and close the browser
    pub async fn close(self) -> ProbeResult<()> {
        if let Err(err) = self.context.close().await {
            tracing::warn!("context close failed: {err}");
        }
        self.driver.close().await?;
        tracing::debug!("session closed");
        Ok(())
    }

    fn timeout_error(&self, url: &str) -> ProbeError {
        ProbeError::NavigationTimeout {
            url: url.to_string(),
            state: self.navigation.wait_until,
            ms: self.navigation.timeout_ms,
        }
    }
}

async fn open_primary(context: &dyn BrowsingContext, viewport: ViewportPreset) -> ProbeResult<PageRef> {
    let page = context.new_page().await?;
    page.set_viewport(viewport).await?;
    Ok(page)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mock::{MockBrowser, MockDocument, MockElement, MockSite};
    use crate::result::FailureKind;
    use crate::selector::Selector;

    const PRODUCT: &str = "http://shop.test/p";

    fn site() -> MockSite {
        MockSite::new()
            .route(
                PRODUCT,
                MockDocument::new().with_element(MockElement::new_tab_anchor(
                    "https://buy.example-processor.com/x",
                    "Buy",
                )),
            )
            .route("http://shop.test/slow", MockDocument::new().stalled())
    }

    async fn open(browser: &MockBrowser, options: &ContextOptions) -> Session {
        Session::open(
            Arc::new(browser.clone()),
            options,
            Duration::from_millis(100),
            Duration::ZERO,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_viewport_switch_reuses_primary_page() {
        let browser = MockBrowser::new(site());
        let session = open(&browser, &ContextOptions::default()).await;

        let desktop = session.with_viewport(ViewportPreset::Desktop, PRODUCT).await.unwrap();
        let mobile = session.with_viewport(ViewportPreset::Mobile, PRODUCT).await.unwrap();
        assert_eq!(desktop.id(), mobile.id());
        assert_eq!(browser.pages_opened(), 1);
        assert_eq!(mobile.url().await.unwrap().as_deref(), Some(PRODUCT));
    }

    #[tokio::test]
    async fn test_navigation_timeout_is_reported() {
        let browser = MockBrowser::new(site());
        let session = open(&browser, &ContextOptions::default()).await;

        let err = session
            .with_viewport(ViewportPreset::Desktop, "http://shop.test/slow")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::NavigationTimeout);
        assert!(err.to_string().contains("http://shop.test/slow"));

        let err = session.wait_for_network_idle().await.unwrap_err();
        assert!(matches!(err, ProbeError::NavigationTimeout { ms: 100, .. }));
    }

    #[tokio::test]
    async fn test_recording_writes_numbered_frames() {
        let dir = tempfile::tempdir().unwrap();
        let browser = MockBrowser::new(site());
        let options = ContextOptions::default().with_record_dir(dir.path());
        let session = open(&browser, &options).await;

        session.with_viewport(ViewportPreset::Desktop, PRODUCT).await.unwrap();
        session.record("click").await;
        assert_eq!(session.recorder().map(Recorder::frames), Some(2));
        assert!(dir.path().join("001-navigate.png").exists());
        assert!(dir.path().join("002-click.png").exists());
    }

    #[tokio::test]
    async fn test_close_secondary_pages_and_teardown() {
        let browser = MockBrowser::new(site());
        let session = open(&browser, &ContextOptions::default()).await;
        session.with_viewport(ViewportPreset::Desktop, PRODUCT).await.unwrap();
        session
            .primary()
            .click(&Selector::tag("a"), 0)
            .await
            .unwrap();
        assert_eq!(browser.open_page_count(), 2);

        assert_eq!(session.close_secondary_pages().await.unwrap(), 1);
        assert_eq!(browser.open_page_count(), 1);

        session.close().await.unwrap();
        assert!(browser.is_closed());
        assert_eq!(browser.open_page_count(), 0);
    }

    #[tokio::test]
    async fn test_open_propagates_context_failure() {
        let browser = MockBrowser::new(site()).failing_context_creation();
        let err = Session::open(
            Arc::new(browser.clone()),
            &ContextOptions::default(),
            Duration::from_millis(100),
            Duration::ZERO,
        )
        .await
        .unwrap_err();
        assert!(err.is_fatal());
        assert!(!browser.is_closed());
    }
}
