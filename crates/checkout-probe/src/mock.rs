//! Scripted in-process browser engine.
//!
//! Implements the capability contract without a browser so the harness can be
//! exercised end to end in unit tests. A [`MockSite`] maps URLs to documents;
//! each document lists its elements, the events it emits when loaded, and
//! what clicking each element does.

use crate::engine::{
    BrowsingContext, ContextOptions, Driver, PageEvent, PageEventStream, PageHandle, PageRef,
    PageWaiter,
};
use crate::result::{ProbeError, ProbeResult};
use crate::selector::Selector;
use crate::viewport::ViewportPreset;
use crate::wait::WaitOptions;
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, oneshot};

/// What happens when an element is clicked
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClickBehavior {
    /// Nothing observable
    #[default]
    Nothing,
    /// A new tab opens at the URL
    OpenTab(String),
    /// The current tab navigates to the URL
    Navigate(String),
    /// The click is rejected with this message
    Fail(String),
    /// The click never completes
    Hang,
}

/// Element of a mock document
#[derive(Debug, Clone, Default)]
pub struct MockElement {
    tag: String,
    id: Option<String>,
    parent_id: Option<String>,
    attrs: BTreeMap<String, String>,
    text: String,
    on_click: ClickBehavior,
}

impl MockElement {
    /// Create an element with the given tag
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// Anchor with an `href` and text; clicking navigates the current tab
    #[must_use]
    pub fn anchor(href: impl Into<String>, text: impl Into<String>) -> Self {
        let href = href.into();
        Self::new("a")
            .with_attr("href", href.clone())
            .with_text(text)
            .on_click(ClickBehavior::Navigate(href))
    }

    /// Anchor with `target="_blank"`; clicking opens its `href` in a new tab
    #[must_use]
    pub fn new_tab_anchor(href: impl Into<String>, text: impl Into<String>) -> Self {
        let href = href.into();
        Self::new("a")
            .with_attr("href", href.clone())
            .with_attr("target", "_blank")
            .with_text(text)
            .on_click(ClickBehavior::OpenTab(href))
    }

    /// Button with text
    #[must_use]
    pub fn button(text: impl Into<String>) -> Self {
        Self::new("button").with_text(text)
    }

    /// Set the element id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Nest under the element with this id
    #[must_use]
    pub fn inside(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set an attribute
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Set the text content
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set the click behaviour
    #[must_use]
    pub fn on_click(mut self, behavior: ClickBehavior) -> Self {
        self.on_click = behavior;
        self
    }
}

/// Document served for one URL
#[derive(Debug, Clone, Default)]
pub struct MockDocument {
    elements: Vec<MockElement>,
    events: Vec<PageEvent>,
    stall: bool,
}

impl MockDocument {
    /// Empty document
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element
    #[must_use]
    pub fn with_element(mut self, element: MockElement) -> Self {
        self.elements.push(element);
        self
    }

    /// Emit an event each time the document loads
    #[must_use]
    pub fn with_event(mut self, event: PageEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Never reach a load state
    #[must_use]
    pub const fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    fn matching(&self, selector: &Selector) -> Vec<&MockElement> {
        self.elements
            .iter()
            .filter(|el| self.matches(selector, el))
            .collect()
    }

    fn matches(&self, selector: &Selector, el: &MockElement) -> bool {
        el.tag == selector.tag_name()
            && selector
                .within_id()
                .map_or(true, |id| self.has_ancestor(el, id))
            && selector.accepts_attr(|name| el.attrs.get(name).map(String::as_str))
            && selector.accepts_text(&el.text)
    }

    fn has_ancestor(&self, el: &MockElement, id: &str) -> bool {
        let mut parent = el.parent_id.as_deref();
        // Bounded walk; a malformed parent cycle ends after one lap.
        for _ in 0..=self.elements.len() {
            match parent {
                None => return false,
                Some(p) if p == id => return true,
                Some(p) => {
                    parent = self
                        .elements
                        .iter()
                        .find(|e| e.id.as_deref() == Some(p))
                        .and_then(|e| e.parent_id.as_deref());
                }
            }
        }
        false
    }
}

/// URL to document routing table
#[derive(Debug, Clone, Default)]
pub struct MockSite {
    routes: HashMap<String, MockDocument>,
}

impl MockSite {
    /// Empty site; unrouted URLs load an empty document
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `document` at `url`
    #[must_use]
    pub fn route(mut self, url: impl Into<String>, document: MockDocument) -> Self {
        self.routes.insert(url.into(), document);
        self
    }

    fn document(&self, url: &str) -> MockDocument {
        self.routes.get(url).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct Faults {
    context_creation: AtomicBool,
    subscription: AtomicBool,
}

/// Mock browser instance
#[derive(Debug, Clone)]
pub struct MockBrowser {
    site: Arc<MockSite>,
    faults: Arc<Faults>,
    closed: Arc<AtomicBool>,
    contexts: Arc<Mutex<Vec<Arc<ContextInner>>>>,
}

impl MockBrowser {
    /// Launch a mock browser serving `site`
    #[must_use]
    pub fn new(site: MockSite) -> Self {
        Self {
            site: Arc::new(site),
            faults: Arc::new(Faults::default()),
            closed: Arc::new(AtomicBool::new(false)),
            contexts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make context creation fail
    #[must_use]
    pub fn failing_context_creation(self) -> Self {
        self.faults.context_creation.store(true, Ordering::SeqCst);
        self
    }

    /// Make event subscription fail
    #[must_use]
    pub fn failing_subscription(self) -> Self {
        self.faults.subscription.store(true, Ordering::SeqCst);
        self
    }

    /// Whether `close` was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of pages currently open across all contexts
    #[must_use]
    pub fn open_page_count(&self) -> usize {
        self.contexts
            .lock()
            .map(|contexts| contexts.iter().map(|c| c.open_pages().len()).sum())
            .unwrap_or(0)
    }

    /// Total pages ever opened across all contexts
    #[must_use]
    pub fn pages_opened(&self) -> usize {
        self.contexts
            .lock()
            .map(|contexts| {
                contexts
                    .iter()
                    .map(|c| c.opened.load(Ordering::SeqCst))
                    .sum()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl Driver for MockBrowser {
    async fn new_context(&self, options: &ContextOptions) -> ProbeResult<Box<dyn BrowsingContext>> {
        if self.is_closed() {
            return Err(ProbeError::ContextError {
                message: "browser is closed".to_string(),
            });
        }
        if self.faults.context_creation.load(Ordering::SeqCst) {
            return Err(ProbeError::ContextError {
                message: "context creation refused".to_string(),
            });
        }
        let inner = Arc::new(ContextInner {
            site: Arc::clone(&self.site),
            faults: Arc::clone(&self.faults),
            viewport: options.viewport,
            pages: Mutex::new(Vec::new()),
            waiters: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(0),
        });
        self.contexts
            .lock()
            .map_err(|_| ProbeError::invalid_state("mock browser poisoned"))?
            .push(Arc::clone(&inner));
        Ok(Box::new(MockContext { inner }))
    }

    async fn close(&self) -> ProbeResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        let contexts = self
            .contexts
            .lock()
            .map_err(|_| ProbeError::invalid_state("mock browser poisoned"))?
            .clone();
        for context in contexts {
            context.close_all();
        }
        Ok(())
    }
}

#[derive(Debug)]
struct ContextInner {
    site: Arc<MockSite>,
    faults: Arc<Faults>,
    viewport: ViewportPreset,
    pages: Mutex<Vec<Arc<MockPage>>>,
    waiters: Mutex<Vec<oneshot::Sender<PageRef>>>,
    opened: AtomicUsize,
}

impl ContextInner {
    fn open_page(self: &Arc<Self>, url: Option<&str>) -> Arc<MockPage> {
        let page = Arc::new(MockPage {
            id: uuid::Uuid::new_v4().to_string(),
            context: Arc::downgrade(self),
            state: Mutex::new(PageState {
                url: "about:blank".to_string(),
                document: MockDocument::default(),
                viewport: self.viewport,
                closed: false,
            }),
            subscribers: Mutex::new(Vec::new()),
        });
        if let Some(url) = url {
            page.load(url);
        }
        if let Ok(mut pages) = self.pages.lock() {
            pages.push(Arc::clone(&page));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        let waiters = self
            .waiters
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default();
        for waiter in waiters {
            let handle: PageRef = page.clone();
            let _ = waiter.send(handle);
        }
        page
    }

    fn open_pages(&self) -> Vec<Arc<MockPage>> {
        self.pages
            .lock()
            .map(|pages| pages.iter().filter(|p| !p.is_closed()).cloned().collect())
            .unwrap_or_default()
    }

    fn close_all(&self) {
        for page in self.open_pages() {
            page.mark_closed();
        }
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.clear();
        }
    }
}

/// Mock browsing context
#[derive(Debug)]
pub struct MockContext {
    inner: Arc<ContextInner>,
}

#[async_trait]
impl BrowsingContext for MockContext {
    async fn new_page(&self) -> ProbeResult<PageRef> {
        Ok(self.inner.open_page(None))
    }

    async fn expect_page(&self) -> ProbeResult<PageWaiter> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .waiters
            .lock()
            .map_err(|_| ProbeError::invalid_state("mock context poisoned"))?
            .push(tx);
        Ok(rx
            .map(|res| res.map_err(|_| ProbeError::invalid_state("context closed while awaiting a page")))
            .boxed())
    }

    async fn pages(&self) -> ProbeResult<Vec<PageRef>> {
        Ok(self
            .inner
            .open_pages()
            .into_iter()
            .map(|p| p as PageRef)
            .collect())
    }

    async fn close(&self) -> ProbeResult<()> {
        self.inner.close_all();
        Ok(())
    }
}

#[derive(Debug)]
struct PageState {
    url: String,
    document: MockDocument,
    viewport: ViewportPreset,
    closed: bool,
}

/// Mock page
#[derive(Debug)]
pub struct MockPage {
    id: String,
    context: Weak<ContextInner>,
    state: Mutex<PageState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<PageEvent>>>,
}

impl MockPage {
    fn is_closed(&self) -> bool {
        self.state.lock().map_or(true, |s| s.closed)
    }

    fn mark_closed(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        // Dropping the senders ends every subscriber stream.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.clear();
        }
    }

    /// Current viewport
    #[must_use]
    pub fn viewport(&self) -> Option<ViewportPreset> {
        self.state.lock().ok().map(|s| s.viewport)
    }

    fn load(&self, url: &str) -> bool {
        let Some(context) = self.context.upgrade() else {
            return false;
        };
        let document = context.site.document(url);
        let stall = document.stall;
        let events = document.events.clone();
        if let Ok(mut state) = self.state.lock() {
            state.url = url.to_string();
            state.document = document;
        }
        self.emit(&PageEvent::Request {
            method: "GET".to_string(),
            url: url.to_string(),
        });
        for event in &events {
            self.emit(event);
        }
        !stall
    }

    fn emit(&self, event: &PageEvent) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn ensure_open(&self) -> ProbeResult<()> {
        if self.is_closed() {
            Err(ProbeError::page(format!("page {} is closed", self.id)))
        } else {
            Ok(())
        }
    }

    fn with_nth<T>(
        &self,
        selector: &Selector,
        index: usize,
        f: impl FnOnce(&MockElement) -> T,
    ) -> ProbeResult<Option<T>> {
        self.ensure_open()?;
        let state = self
            .state
            .lock()
            .map_err(|_| ProbeError::invalid_state("mock page poisoned"))?;
        Ok(state.document.matching(selector).get(index).copied().map(f))
    }
}

#[async_trait]
impl PageHandle for MockPage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn set_viewport(&self, preset: ViewportPreset) -> ProbeResult<()> {
        self.ensure_open()?;
        if let Ok(mut state) = self.state.lock() {
            state.viewport = preset;
        }
        Ok(())
    }

    async fn goto(&self, url: &str, _wait: &WaitOptions) -> ProbeResult<()> {
        self.ensure_open()?;
        if !self.load(url) {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn wait_for_load_state(&self, _wait: &WaitOptions) -> ProbeResult<()> {
        self.ensure_open()?;
        let stalled = self.state.lock().map_or(false, |s| s.document.stall);
        if stalled {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn url(&self) -> ProbeResult<Option<String>> {
        self.ensure_open()?;
        Ok(self.state.lock().ok().map(|s| s.url.clone()))
    }

    async fn count(&self, selector: &Selector) -> ProbeResult<usize> {
        self.ensure_open()?;
        let state = self
            .state
            .lock()
            .map_err(|_| ProbeError::invalid_state("mock page poisoned"))?;
        Ok(state.document.matching(selector).len())
    }

    async fn text_content(&self, selector: &Selector, index: usize) -> ProbeResult<Option<String>> {
        self.with_nth(selector, index, |el| el.text.clone())
    }

    async fn attribute(
        &self,
        selector: &Selector,
        index: usize,
        name: &str,
    ) -> ProbeResult<Option<String>> {
        Ok(self
            .with_nth(selector, index, |el| el.attrs.get(name).cloned())?
            .flatten())
    }

    async fn click(&self, selector: &Selector, index: usize) -> ProbeResult<()> {
        let behavior = self
            .with_nth(selector, index, |el| el.on_click.clone())?
            .ok_or_else(|| ProbeError::ElementError {
                selector: selector.to_string(),
                message: format!("no element at index {index}"),
            })?;
        match behavior {
            ClickBehavior::Nothing => {}
            ClickBehavior::OpenTab(url) => {
                let context = self
                    .context
                    .upgrade()
                    .ok_or_else(|| ProbeError::invalid_state("context dropped"))?;
                context.open_page(Some(&url));
            }
            ClickBehavior::Navigate(url) => {
                self.load(&url);
            }
            ClickBehavior::Fail(message) => {
                return Err(ProbeError::InputError { message });
            }
            ClickBehavior::Hang => std::future::pending::<()>().await,
        }
        Ok(())
    }

    async fn screenshot(&self, path: &Path, _full_page: bool) -> ProbeResult<()> {
        self.ensure_open()?;
        write_placeholder(path).await
    }

    async fn subscribe(&self) -> ProbeResult<PageEventStream> {
        self.ensure_open()?;
        let faulty = self
            .context
            .upgrade()
            .is_some_and(|c| c.faults.subscription.load(Ordering::SeqCst));
        if faulty {
            return Err(ProbeError::SubscriptionError {
                message: "event source unavailable".to_string(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .map_err(|_| ProbeError::invalid_state("mock page poisoned"))?
            .push(tx);
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }

    async fn close(&self) -> ProbeResult<()> {
        self.mark_closed();
        Ok(())
    }
}

async fn write_placeholder(path: &Path) -> ProbeResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, b"").await?;
    Ok(())
}
