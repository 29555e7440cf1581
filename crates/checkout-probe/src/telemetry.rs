//! Telemetry collector.
//!
//! Subscribes to the primary page's console, page-error and request events
//! and buffers them in two append-only logs owned by one background task.
//! The task is the only writer; [`TelemetryHandle::finish`] stops it and hands
//! the logs to the reader, so no lock is shared between them.

use crate::engine::{PageEvent, PageEventStream, PageRef};
use crate::result::ProbeResult;
use futures::StreamExt;
use serde::Serialize;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

/// Characters of a request URL kept in a network log entry
pub const URL_PREFIX_CHARS: usize = 100;

/// Entries shown per log at the end of a run
pub const DEFAULT_TAIL: usize = 5;

/// Path fragment that marks a request as checkout-related
pub const CHECKOUT_PATH_MARKER: &str = "checkout";

/// Kind of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LogKind {
    /// Console API message
    Console,
    /// Outgoing request that passed the filter
    Network,
    /// Uncaught page error
    Error,
}

/// One buffered telemetry record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Kind of record
    pub kind: LogKind,
    /// Milliseconds since the collector attached
    pub at_ms: u64,
    /// Short rendered form
    pub rendered: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// Decides which outgoing requests are logged.
///
/// A request matches when its parsed host equals one of the monitored domains
/// or is a subdomain of one, or when its URL path contains `checkout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkFilter {
    domains: Vec<String>,
}

impl NetworkFilter {
    /// Filter monitoring `domains`
    #[must_use]
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| normalize_host(&d.into()))
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    /// Monitored domains
    #[must_use]
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Whether `url` should be logged
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let host_hit = parsed.host_str().is_some_and(|host| {
            let host = normalize_host(host);
            self.domains.iter().any(|d| host_matches(&host, d))
        });
        host_hit || parsed.path().contains(CHECKOUT_PATH_MARKER)
    }
}

/// Whether `host` is `domain` or one of its subdomains
#[must_use]
pub fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|rest| rest.ends_with('.'))
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// First `max` characters of `s`
#[must_use]
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// `[METHOD] url-prefix`
#[must_use]
pub fn render_request(method: &str, url: &str) -> String {
    format!("[{method}] {}", truncate_chars(url, URL_PREFIX_CHARS))
}

/// `[level] text`
#[must_use]
pub fn render_console(level: &str, text: &str) -> String {
    format!("[{level}] {text}")
}

/// Buffered telemetry of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TelemetryLogs {
    /// Console messages and page errors in arrival order
    pub console: Vec<LogEntry>,
    /// Filtered network requests in arrival order
    pub network: Vec<LogEntry>,
}

impl TelemetryLogs {
    /// Last `n` console entries
    #[must_use]
    pub fn console_tail(&self, n: usize) -> &[LogEntry] {
        tail(&self.console, n)
    }

    /// Last `n` network entries
    #[must_use]
    pub fn network_tail(&self, n: usize) -> &[LogEntry] {
        tail(&self.network, n)
    }

    /// Page errors seen during the run
    pub fn errors(&self) -> impl Iterator<Item = &LogEntry> {
        self.console.iter().filter(|e| e.kind == LogKind::Error)
    }

    fn record(&mut self, event: PageEvent, filter: &NetworkFilter, started: Instant) {
        let at_ms = started.elapsed().as_millis() as u64;
        match event {
            PageEvent::Console { level, text } => {
                let rendered = render_console(&level, &text);
                tracing::info!(target: "checkout_probe::telemetry", "Console: {rendered}");
                self.console.push(LogEntry {
                    kind: LogKind::Console,
                    at_ms,
                    rendered,
                });
            }
            PageEvent::PageError { message } => {
                tracing::warn!(target: "checkout_probe::telemetry", "ERROR: {message}");
                self.console.push(LogEntry {
                    kind: LogKind::Error,
                    at_ms,
                    rendered: format!("[pageerror] {message}"),
                });
            }
            PageEvent::Request { method, url } => {
                if !filter.matches(&url) {
                    return;
                }
                let rendered = render_request(&method, &url);
                tracing::info!(target: "checkout_probe::telemetry", "Network: {rendered}");
                self.network.push(LogEntry {
                    kind: LogKind::Network,
                    at_ms,
                    rendered,
                });
            }
        }
    }
}

fn tail(entries: &[LogEntry], n: usize) -> &[LogEntry] {
    &entries[entries.len().saturating_sub(n)..]
}

/// Attaches collectors to pages
#[derive(Debug, Clone)]
pub struct TelemetryCollector {
    filter: NetworkFilter,
}

impl TelemetryCollector {
    /// Collector logging requests that pass `filter`
    #[must_use]
    pub const fn new(filter: NetworkFilter) -> Self {
        Self { filter }
    }

    /// Subscribe to `page` and start buffering.
    ///
    /// Subscription failure is returned as is; a run cannot proceed unobserved.
    pub async fn attach(&self, page: &PageRef) -> ProbeResult<TelemetryHandle> {
        let events = page.subscribe().await?;
        tracing::debug!(page = page.id(), "telemetry attached");
        Ok(TelemetryHandle::spawn(events, self.filter.clone()))
    }
}

/// Running collector; owns the background task that writes the logs
#[derive(Debug)]
pub struct TelemetryHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<TelemetryLogs>>,
}

impl TelemetryHandle {
    fn spawn(mut events: PageEventStream, filter: NetworkFilter) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let started = Instant::now();
        let task = tokio::spawn(async move {
            let mut logs = TelemetryLogs::default();
            loop {
                tokio::select! {
                    biased;
                    event = events.next() => match event {
                        Some(event) => logs.record(event, &filter, started),
                        None => break,
                    },
                    _ = &mut stop_rx => break,
                }
            }
            logs
        });
        Self {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Stop collecting and return everything buffered so far.
    ///
    /// Events already delivered to the collector are drained before it stops.
    pub async fn finish(mut self) -> TelemetryLogs {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|err| {
                tracing::warn!("telemetry task ended abnormally: {err}");
                TelemetryLogs::default()
            }),
            None => TelemetryLogs::default(),
        }
    }
}

impl Drop for TelemetryHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::{BrowsingContext, ContextOptions, Driver};
    use crate::mock::{MockBrowser, MockDocument, MockSite};
    use crate::wait::WaitOptions;
    use proptest::prelude::*;

    fn filter() -> NetworkFilter {
        NetworkFilter::new(["example-processor.com"])
    }

    mod filter_tests {
        use super::*;

        #[test]
        fn test_exact_and_subdomain_hosts_match() {
            let f = filter();
            assert!(f.matches("https://example-processor.com/v1/x"));
            assert!(f.matches("https://pay.example-processor.com/session"));
            assert!(f.matches("https://a.b.example-processor.com/"));
            assert!(f.matches("https://PAY.Example-Processor.COM/x"));
        }

        #[test]
        fn test_lookalike_hosts_do_not_match() {
            let f = filter();
            assert!(!f.matches("https://notexample-processor.com.evil.tld/"));
            assert!(!f.matches("https://notexample-processor.com/"));
            assert!(!f.matches("https://evil.tld/?next=example-processor.com"));
            assert!(!f.matches("https://evil.tld/example-processor.com/pixel.gif"));
        }

        #[test]
        fn test_checkout_path_matches_any_host() {
            let f = filter();
            assert!(f.matches("http://localhost:3000/checkout?product=loom"));
            assert!(f.matches("http://localhost:3000/api/checkout/session"));
            assert!(!f.matches("http://localhost:3000/api/cart?step=checkout"));
        }

        #[test]
        fn test_unparseable_urls_are_ignored() {
            assert!(!filter().matches("not a url"));
            assert!(!filter().matches(""));
        }

        #[test]
        fn test_multiple_domains() {
            let f = NetworkFilter::new(["stripe.com", "paypal.com."]);
            assert_eq!(f.domains(), ["stripe.com", "paypal.com"]);
            assert!(f.matches("https://www.paypal.com/sdk/js"));
            assert!(f.matches("https://js.stripe.com/v3"));
            assert!(!f.matches("https://example.com/"));
        }
    }

    mod render_tests {
        use super::*;

        #[test]
        fn test_request_rendering_truncates_url() {
            let url = format!("https://pay.example-processor.com/{}", "x".repeat(200));
            let rendered = render_request("POST", &url);
            assert!(rendered.starts_with("[POST] https://pay.example-processor.com/"));
            assert_eq!(rendered.chars().count(), "[POST] ".len() + URL_PREFIX_CHARS);
        }

        #[test]
        fn test_console_rendering() {
            assert_eq!(render_console("warning", "slow"), "[warning] slow");
        }

        #[test]
        fn test_truncate_respects_char_boundaries() {
            assert_eq!(truncate_chars("héllo", 2), "hé");
            assert_eq!(truncate_chars("abc", 10), "abc");
        }

        #[test]
        fn test_tail() {
            let mut logs = TelemetryLogs::default();
            for i in 0..8 {
                logs.record(
                    PageEvent::Console {
                        level: "log".into(),
                        text: format!("m{i}"),
                    },
                    &filter(),
                    Instant::now(),
                );
            }
            let tail: Vec<_> = logs.console_tail(5).iter().map(|e| e.rendered.as_str()).collect();
            assert_eq!(tail, ["[log] m3", "[log] m4", "[log] m5", "[log] m6", "[log] m7"]);
            assert!(logs.network_tail(5).is_empty());
        }
    }

    mod collector_tests {
        use super::*;

        #[tokio::test]
        async fn test_collects_console_errors_and_filtered_requests() {
            let site = MockSite::new().route(
                "http://shop.test/p",
                MockDocument::new()
                    .with_event(PageEvent::Console {
                        level: "log".into(),
                        text: "ready".into(),
                    })
                    .with_event(PageEvent::PageError {
                        message: "TypeError: x is undefined".into(),
                    })
                    .with_event(PageEvent::Request {
                        method: "GET".into(),
                        url: "https://js.example-processor.com/v3".into(),
                    })
                    .with_event(PageEvent::Request {
                        method: "GET".into(),
                        url: "https://notexample-processor.com.evil.tld/t.js".into(),
                    }),
            );
            let browser = MockBrowser::new(site);
            let context = browser.new_context(&ContextOptions::default()).await.unwrap();
            let page = context.new_page().await.unwrap();
            let handle = TelemetryCollector::new(filter()).attach(&page).await.unwrap();

            page.goto("http://shop.test/p", &WaitOptions::default())
                .await
                .unwrap();
            page.close().await.unwrap();
            let logs = handle.finish().await;

            let console: Vec<_> = logs.console.iter().map(|e| e.kind).collect();
            assert_eq!(console, [LogKind::Console, LogKind::Error]);
            assert_eq!(logs.errors().count(), 1);
            assert_eq!(logs.network.len(), 1);
            assert_eq!(logs.network[0].rendered, "[GET] https://js.example-processor.com/v3");
        }

        #[tokio::test]
        async fn test_subscription_failure_is_surfaced() {
            let browser = MockBrowser::new(MockSite::new()).failing_subscription();
            let context = browser.new_context(&ContextOptions::default()).await.unwrap();
            let page = context.new_page().await.unwrap();
            let err = TelemetryCollector::new(filter())
                .attach(&page)
                .await
                .unwrap_err();
            assert!(err.is_fatal());
        }
    }

    proptest! {
        #[test]
        fn prop_subdomains_always_match(label in "[a-z][a-z0-9-]{0,15}") {
            let url = format!("https://{label}.example-processor.com/path");
            prop_assert!(filter().matches(&url));
        }

        #[test]
        fn prop_prefixed_lookalikes_never_match(label in "[a-z][a-z0-9]{0,15}", tld in "[a-z]{2,6}") {
            let url = format!("https://{label}example-processor.com.evil.{tld}/path");
            prop_assert!(!filter().matches(&url));
        }

        #[test]
        fn prop_truncation_is_bounded_prefix(s in ".{0,300}") {
            let cut = truncate_chars(&s, URL_PREFIX_CHARS);
            prop_assert!(cut.chars().count() <= URL_PREFIX_CHARS);
            prop_assert!(s.starts_with(cut));
        }
    }
}
