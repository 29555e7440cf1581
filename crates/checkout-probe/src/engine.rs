//! Browser capability contract.
//!
//! The harness talks to the browser-automation engine only through the three
//! traits in this module. [`crate::browser`] implements them on top of
//! chromiumoxide; [`crate::mock`] implements them in-process for tests.
//!
//! Waits exposed here are unbounded; callers wrap them in
//! `tokio::time::timeout` with the budget of the step they belong to.

use crate::result::ProbeResult;
use crate::selector::Selector;
use crate::viewport::ViewportPreset;
use crate::wait::WaitOptions;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Shared handle to an open page
pub type PageRef = Arc<dyn PageHandle>;

/// Stream of events emitted by one page; ends when the page closes
pub type PageEventStream = BoxStream<'static, PageEvent>;

/// One-shot future resolving with the next page created in a context
pub type PageWaiter = BoxFuture<'static, ProbeResult<PageRef>>;

/// Event observed on a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PageEvent {
    /// Console API call (`console.log`, `console.error`, ...)
    Console {
        /// Console level (`log`, `warning`, `error`, ...)
        level: String,
        /// Rendered message text
        text: String,
    },
    /// Uncaught exception in page script
    PageError {
        /// Exception description
        message: String,
    },
    /// Outgoing network request
    Request {
        /// HTTP method
        method: String,
        /// Full request URL
        url: String,
    },
}

/// Browser launch options
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Run in headless mode
    pub headless: bool,
    /// Delay inserted before each navigation and click
    pub slow_mo: Duration,
    /// Path to chromium binary (None = auto-detect)
    pub chromium_path: Option<PathBuf>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
    /// Initial browser window size
    pub window_size: (u32, u32),
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            slow_mo: Duration::ZERO,
            chromium_path: None,
            sandbox: true,
            window_size: (
                ViewportPreset::Desktop.width(),
                ViewportPreset::Desktop.height(),
            ),
        }
    }
}

impl LaunchOptions {
    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set the action pacing delay
    #[must_use]
    pub const fn with_slow_mo(mut self, slow_mo: Duration) -> Self {
        self.slow_mo = slow_mo;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }
}

/// Options for a new browsing context
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Viewport new pages start with
    pub viewport: ViewportPreset,
    /// Directory that receives the session recording, if any
    pub record_dir: Option<PathBuf>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            viewport: ViewportPreset::Desktop,
            record_dir: None,
        }
    }
}

impl ContextOptions {
    /// Set the initial viewport
    #[must_use]
    pub const fn with_viewport(mut self, viewport: ViewportPreset) -> Self {
        self.viewport = viewport;
        self
    }

    /// Record the session into `dir`
    #[must_use]
    pub fn with_record_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.record_dir = Some(dir.into());
        self
    }
}

/// A launched browser instance
#[async_trait]
pub trait Driver: Send + Sync + std::fmt::Debug {
    /// Create an isolated browsing context (own cookies and storage)
    async fn new_context(&self, options: &ContextOptions) -> ProbeResult<Box<dyn BrowsingContext>>;

    /// Close the browser and release its process
    async fn close(&self) -> ProbeResult<()>;
}

/// An isolated browsing context
#[async_trait]
pub trait BrowsingContext: Send + Sync + std::fmt::Debug {
    /// Open a blank page in this context
    async fn new_page(&self) -> ProbeResult<PageRef>;

    /// Register a one-shot expectation for the next page created in this
    /// context.
    ///
    /// The subscription is live when this returns, so a page opened by any
    /// action issued afterwards is observed even if it appears before the
    /// returned future is first polled.
    async fn expect_page(&self) -> ProbeResult<PageWaiter>;

    /// Pages currently open in this context
    async fn pages(&self) -> ProbeResult<Vec<PageRef>>;

    /// Close every page and dispose of the context
    async fn close(&self) -> ProbeResult<()>;
}

/// A navigable page
#[async_trait]
pub trait PageHandle: Send + Sync + std::fmt::Debug {
    /// Engine-assigned page identifier
    fn id(&self) -> &str;

    /// Resize the page viewport
    async fn set_viewport(&self, preset: ViewportPreset) -> ProbeResult<()>;

    /// Navigate and wait for `wait.wait_until`
    async fn goto(&self, url: &str, wait: &WaitOptions) -> ProbeResult<()>;

    /// Wait for the current document to reach `wait.wait_until`
    async fn wait_for_load_state(&self, wait: &WaitOptions) -> ProbeResult<()>;

    /// Current URL
    async fn url(&self) -> ProbeResult<Option<String>>;

    /// Number of live elements matching `selector`
    async fn count(&self, selector: &Selector) -> ProbeResult<usize>;

    /// Text content of the `index`-th match, untrimmed
    async fn text_content(&self, selector: &Selector, index: usize) -> ProbeResult<Option<String>>;

    /// Attribute of the `index`-th match
    async fn attribute(
        &self,
        selector: &Selector,
        index: usize,
        name: &str,
    ) -> ProbeResult<Option<String>>;

    /// Click the `index`-th match
    async fn click(&self, selector: &Selector, index: usize) -> ProbeResult<()>;

    /// Write a PNG screenshot to `path`
    async fn screenshot(&self, path: &Path, full_page: bool) -> ProbeResult<()>;

    /// Subscribe to console, page-error and request events
    async fn subscribe(&self) -> ProbeResult<PageEventStream>;

    /// Close the page
    async fn close(&self) -> ProbeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_options_builder() {
        let opts = LaunchOptions::default()
            .with_headless(false)
            .with_slow_mo(Duration::from_millis(500))
            .with_chromium_path("/usr/bin/chromium")
            .with_no_sandbox();
        assert!(!opts.headless);
        assert!(!opts.sandbox);
        assert_eq!(opts.slow_mo, Duration::from_millis(500));
        assert_eq!(opts.window_size, (1280, 720));
        assert_eq!(
            opts.chromium_path.as_deref(),
            Some(Path::new("/usr/bin/chromium"))
        );
    }

    #[test]
    fn test_context_options_builder() {
        let opts = ContextOptions::default()
            .with_viewport(ViewportPreset::Mobile)
            .with_record_dir("videos");
        assert_eq!(opts.viewport, ViewportPreset::Mobile);
        assert_eq!(opts.record_dir.as_deref(), Some(Path::new("videos")));
    }
}
