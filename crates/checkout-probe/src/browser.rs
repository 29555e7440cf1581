//! Chromium implementation of the capability contract over CDP.
//!
//! Each browsing context is a CDP browser context; new tabs are observed
//! through `Target.targetCreated` filtered to that context. Network idle is
//! computed from request lifecycle events with an in-flight set.

#![allow(
    clippy::significant_drop_tightening,
    clippy::missing_errors_doc,
    clippy::cast_possible_wrap
)]

use crate::engine::{
    BrowsingContext, ContextOptions, Driver, LaunchOptions, PageEvent, PageEventStream,
    PageHandle, PageRef, PageWaiter,
};
use crate::result::{ProbeError, ProbeResult};
use crate::selector::Selector;
use crate::viewport::ViewportPreset;
use crate::wait::{LoadState, WaitOptions, DEFAULT_POLL_INTERVAL_MS};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventLoadingFailed, EventLoadingFinished,
    EventRequestWillBeSent, RequestId,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
    DisposeBrowserContextParams, EventTargetCreated, GetTargetsParams, TargetId, TargetInfo,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    EventConsoleApiCalled, EventExceptionThrown, ExceptionDetails, RemoteObject,
};
use chromiumoxide::element::Element;
use chromiumoxide::page::{Page as CdpPage, ScreenshotParams};
use futures::{FutureExt, StreamExt};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const BLANK: &str = "about:blank";

/// Chromium browser driven over CDP
#[derive(Debug)]
pub struct ChromiumBrowser {
    inner: Arc<Mutex<CdpBrowser>>,
    handler: tokio::task::JoinHandle<()>,
    options: LaunchOptions,
}

impl ChromiumBrowser {
    /// Launch a browser
    pub async fn launch(options: LaunchOptions) -> ProbeResult<Self> {
        let mut builder = CdpConfig::builder()
            .window_size(options.window_size.0, options.window_size.1)
            .viewport(None);

        if !options.headless {
            builder = builder.with_head();
        }

        if !options.sandbox {
            builder = builder.no_sandbox();
        }

        if let Some(ref path) = options.chromium_path {
            builder = builder.chrome_executable(path);
        }

        let cdp_config = builder.build().map_err(|message| {
            if message.contains("executable") {
                ProbeError::BrowserNotFound
            } else {
                ProbeError::BrowserLaunchError { message }
            }
        })?;

        let (browser, mut handler) =
            CdpBrowser::launch(cdp_config)
                .await
                .map_err(|e| ProbeError::BrowserLaunchError {
                    message: e.to_string(),
                })?;

        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        tracing::debug!(headless = options.headless, "browser launched");
        Ok(Self {
            inner: Arc::new(Mutex::new(browser)),
            handler,
            options,
        })
    }

    /// Options the browser was launched with
    #[must_use]
    pub const fn options(&self) -> &LaunchOptions {
        &self.options
    }
}

#[async_trait]
impl Driver for ChromiumBrowser {
    async fn new_context(&self, options: &ContextOptions) -> ProbeResult<Box<dyn BrowsingContext>> {
        let id = self
            .inner
            .lock()
            .await
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(context_error)?;
        if let Some(dir) = &options.record_dir {
            tracing::debug!(dir = %dir.display(), "recording enabled");
        }
        Ok(Box::new(ChromiumContext {
            browser: Arc::clone(&self.inner),
            id,
            slow_mo: self.options.slow_mo,
        }))
    }

    async fn close(&self) -> ProbeResult<()> {
        let mut browser = self.inner.lock().await;
        browser
            .close()
            .await
            .map_err(|e| ProbeError::BrowserLaunchError {
                message: e.to_string(),
            })?;
        if let Err(err) = browser.wait().await {
            tracing::warn!("browser process did not exit cleanly: {err}");
        }
        self.handler.abort();
        Ok(())
    }
}

/// CDP browser context
#[derive(Debug)]
pub struct ChromiumContext {
    browser: Arc<Mutex<CdpBrowser>>,
    id: BrowserContextId,
    slow_mo: Duration,
}

impl ChromiumContext {
    fn wrap(&self, page: CdpPage) -> PageRef {
        Arc::new(ChromiumPage::new(page, self.slow_mo))
    }

    async fn targets(&self) -> ProbeResult<Vec<TargetInfo>> {
        let response = self
            .browser
            .lock()
            .await
            .execute(GetTargetsParams::default())
            .await
            .map_err(context_error)?;
        Ok(response
            .result
            .target_infos
            .into_iter()
            .filter(|info| is_page_in(info, &self.id))
            .collect())
    }
}

#[async_trait]
impl BrowsingContext for ChromiumContext {
    async fn new_page(&self) -> ProbeResult<PageRef> {
        let params = CreateTargetParams::builder()
            .url(BLANK)
            .browser_context_id(self.id.clone())
            .build()
            .map_err(|message| ProbeError::ContextError { message })?;
        let page = self
            .browser
            .lock()
            .await
            .new_page(params)
            .await
            .map_err(|e| ProbeError::page(e.to_string()))?;
        Ok(self.wrap(page))
    }

    async fn expect_page(&self) -> ProbeResult<PageWaiter> {
        let mut created = self
            .browser
            .lock()
            .await
            .event_listener::<EventTargetCreated>()
            .await
            .map_err(subscription_error)?;
        let browser = Arc::clone(&self.browser);
        let context_id = self.id.clone();
        let slow_mo = self.slow_mo;

        Ok(async move {
            while let Some(event) = created.next().await {
                if !is_page_in(&event.target_info, &context_id) {
                    continue;
                }
                let target_id = event.target_info.target_id.clone();
                // The target is announced before the handler attaches to it.
                loop {
                    if let Some(page) = find_page(&browser, &target_id).await? {
                        return Ok(Arc::new(ChromiumPage::new(page, slow_mo)) as PageRef);
                    }
                    tokio::time::sleep(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)).await;
                }
            }
            Err(ProbeError::invalid_state("browser closed while awaiting a page"))
        }
        .boxed())
    }

    async fn pages(&self) -> ProbeResult<Vec<PageRef>> {
        let mut pages = Vec::new();
        for info in self.targets().await? {
            if let Some(page) = find_page(&self.browser, &info.target_id).await? {
                pages.push(self.wrap(page));
            }
        }
        Ok(pages)
    }

    async fn close(&self) -> ProbeResult<()> {
        self.browser
            .lock()
            .await
            .execute(DisposeBrowserContextParams::new(self.id.clone()))
            .await
            .map_err(context_error)?;
        Ok(())
    }
}

/// CDP page
#[derive(Debug)]
pub struct ChromiumPage {
    id: String,
    page: CdpPage,
    slow_mo: Duration,
}

impl ChromiumPage {
    fn new(page: CdpPage, slow_mo: Duration) -> Self {
        Self {
            id: page.target_id().inner().clone(),
            page,
            slow_mo,
        }
    }

    async fn pace(&self) {
        if !self.slow_mo.is_zero() {
            tokio::time::sleep(self.slow_mo).await;
        }
    }

    async fn matching(&self, selector: &Selector) -> ProbeResult<Vec<Element>> {
        let elements = self
            .page
            .find_elements(selector.to_css())
            .await
            .map_err(|e| element_error(selector, e))?;
        if selector.text_filter().is_none() {
            return Ok(elements);
        }
        let mut kept = Vec::with_capacity(elements.len());
        for element in elements {
            let text = element
                .inner_text()
                .await
                .map_err(|e| element_error(selector, e))?
                .unwrap_or_default();
            if selector.accepts_text(&text) {
                kept.push(element);
            }
        }
        Ok(kept)
    }

    async fn nth(&self, selector: &Selector, index: usize) -> ProbeResult<Option<Element>> {
        Ok(self.matching(selector).await?.into_iter().nth(index))
    }

    async fn ready_state(&self) -> ProbeResult<String> {
        self.page
            .evaluate("document.readyState")
            .await
            .map_err(|e| ProbeError::page(e.to_string()))?
            .into_value::<String>()
            .map_err(|e| ProbeError::page(e.to_string()))
    }

    async fn wait_for_ready_state(&self, wait: &WaitOptions) -> ProbeResult<()> {
        while !wait.wait_until.satisfied_by_ready_state(&self.ready_state().await?) {
            tokio::time::sleep(wait.poll_interval()).await;
        }
        Ok(())
    }

    async fn network_tracker(&self) -> ProbeResult<NetworkTracker> {
        let started = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(subscription_error)?
            .map(|ev| NetworkActivity::Started(ev.request_id.clone()));
        let finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(subscription_error)?
            .map(|ev| NetworkActivity::Settled(ev.request_id.clone()));
        let failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(subscription_error)?
            .map(|ev| NetworkActivity::Settled(ev.request_id.clone()));
        Ok(NetworkTracker {
            activity: futures::stream::select(futures::stream::select(started, finished), failed)
                .boxed(),
        })
    }
}

enum NetworkActivity {
    Started(RequestId),
    Settled(RequestId),
}

struct NetworkTracker {
    activity: futures::stream::BoxStream<'static, NetworkActivity>,
}

impl NetworkTracker {
    /// Resolve once no request has been in flight for `quiet`
    async fn idle(mut self, quiet: Duration) {
        let mut in_flight: HashSet<RequestId> = HashSet::new();
        loop {
            tokio::select! {
                activity = self.activity.next() => match activity {
                    Some(NetworkActivity::Started(id)) => {
                        in_flight.insert(id);
                    }
                    Some(NetworkActivity::Settled(id)) => {
                        in_flight.remove(&id);
                    }
                    None => return,
                },
                () = tokio::time::sleep(quiet), if in_flight.is_empty() => return,
            }
        }
    }
}

#[async_trait]
impl PageHandle for ChromiumPage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn set_viewport(&self, preset: ViewportPreset) -> ProbeResult<()> {
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(preset.width()))
            .height(i64::from(preset.height()))
            .device_scale_factor(1.0)
            .mobile(preset.is_mobile())
            .build()
            .map_err(ProbeError::page)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| ProbeError::page(e.to_string()))?;
        Ok(())
    }

    async fn goto(&self, url: &str, wait: &WaitOptions) -> ProbeResult<()> {
        let tracker = if wait.wait_until == LoadState::NetworkIdle {
            Some(self.network_tracker().await?)
        } else {
            None
        };
        self.pace().await;
        self.page
            .goto(url)
            .await
            .map_err(|e| ProbeError::NavigationError {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        self.wait_for_ready_state(wait).await?;
        if let Some(tracker) = tracker {
            tracker.idle(wait.idle_threshold()).await;
        }
        Ok(())
    }

    async fn wait_for_load_state(&self, wait: &WaitOptions) -> ProbeResult<()> {
        if wait.wait_until == LoadState::NetworkIdle {
            let tracker = self.network_tracker().await?;
            self.wait_for_ready_state(wait).await?;
            tracker.idle(wait.idle_threshold()).await;
            return Ok(());
        }
        self.wait_for_ready_state(wait).await
    }

    async fn url(&self) -> ProbeResult<Option<String>> {
        self.page
            .url()
            .await
            .map_err(|e| ProbeError::page(e.to_string()))
    }

    async fn count(&self, selector: &Selector) -> ProbeResult<usize> {
        Ok(self.matching(selector).await?.len())
    }

    async fn text_content(&self, selector: &Selector, index: usize) -> ProbeResult<Option<String>> {
        match self.nth(selector, index).await? {
            Some(element) => element
                .inner_text()
                .await
                .map_err(|e| element_error(selector, e)),
            None => Ok(None),
        }
    }

    async fn attribute(
        &self,
        selector: &Selector,
        index: usize,
        name: &str,
    ) -> ProbeResult<Option<String>> {
        match self.nth(selector, index).await? {
            Some(element) => element
                .attribute(name)
                .await
                .map_err(|e| element_error(selector, e)),
            None => Ok(None),
        }
    }

    async fn click(&self, selector: &Selector, index: usize) -> ProbeResult<()> {
        let element = self
            .nth(selector, index)
            .await?
            .ok_or_else(|| ProbeError::ElementError {
                selector: selector.to_string(),
                message: format!("no element at index {index}"),
            })?;
        self.pace().await;
        element.click().await.map_err(|e| ProbeError::InputError {
            message: e.to_string(),
        })?;
        Ok(())
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> ProbeResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        self.page
            .save_screenshot(params, path)
            .await
            .map_err(|e| ProbeError::ScreenshotError {
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn subscribe(&self) -> ProbeResult<PageEventStream> {
        self.page
            .execute(NetworkEnableParams::default())
            .await
            .map_err(subscription_error)?;
        let console = self
            .page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(subscription_error)?
            .map(|ev| PageEvent::Console {
                level: ev.r#type.as_ref().to_string(),
                text: render_args(&ev.args),
            });
        let errors = self
            .page
            .event_listener::<EventExceptionThrown>()
            .await
            .map_err(subscription_error)?
            .map(|ev| PageEvent::PageError {
                message: exception_message(&ev.exception_details),
            });
        let requests = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(subscription_error)?
            .map(|ev| PageEvent::Request {
                method: ev.request.method.clone(),
                url: ev.request.url.clone(),
            });
        Ok(futures::stream::select(futures::stream::select(console, errors), requests).boxed())
    }

    async fn close(&self) -> ProbeResult<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| ProbeError::page(e.to_string()))
    }
}

async fn find_page(browser: &Mutex<CdpBrowser>, target_id: &TargetId) -> ProbeResult<Option<CdpPage>> {
    let pages = browser
        .lock()
        .await
        .pages()
        .await
        .map_err(|e| ProbeError::page(e.to_string()))?;
    Ok(pages.into_iter().find(|page| page.target_id() == target_id))
}

fn is_page_in(info: &TargetInfo, context: &BrowserContextId) -> bool {
    info.r#type == "page" && info.browser_context_id.as_ref() == Some(context)
}

fn render_args(args: &[RemoteObject]) -> String {
    args.iter()
        .map(|arg| match (&arg.value, &arg.description) {
            (Some(serde_json::Value::String(s)), _) => s.clone(),
            (Some(value), _) => value.to_string(),
            (None, Some(description)) => description.clone(),
            (None, None) => String::new(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn exception_message(details: &ExceptionDetails) -> String {
    details
        .exception
        .as_ref()
        .and_then(|e| e.description.clone())
        .unwrap_or_else(|| details.text.clone())
}

fn context_error(e: impl std::fmt::Display) -> ProbeError {
    ProbeError::ContextError {
        message: e.to_string(),
    }
}

fn subscription_error(e: impl std::fmt::Display) -> ProbeError {
    ProbeError::SubscriptionError {
        message: e.to_string(),
    }
}

fn element_error(selector: &Selector, e: impl std::fmt::Display) -> ProbeError {
    ProbeError::ElementError {
        selector: selector.to_string(),
        message: e.to_string(),
    }
}
