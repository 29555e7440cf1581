//! Flow orchestrator.
//!
//! Runs the scenario once per viewport preset against a single session:
//!
//! 1. load the entry URL under the preset
//! 2. assert the legacy controls are gone and the checkout CTA is present
//! 3. screenshot the product page
//! 4. follow the first CTA and check where it lands
//!
//! A failed step that leaves the pass unable to continue aborts only that
//! pass. Resource failures abort the run. The session is closed on every
//! path out of [`FlowOrchestrator::run`].

use crate::assertion::{AssertionResult, Verdict};
use crate::dom;
use crate::engine::{ContextOptions, Driver, PageRef};
use crate::result::{FailureKind, ProbeError, ProbeResult};
use crate::scenario::{screenshot_name, Invariant, ScenarioConfig, ScenarioKind, ShotStage};
use crate::session::Session;
use crate::telemetry::{LogEntry, TelemetryCollector, TelemetryLogs, DEFAULT_TAIL};
use crate::tracker;
use crate::viewport::ViewportPreset;
use crate::wait::{
    DEFAULT_NAVIGATION_TIMEOUT_MS, DEFAULT_NEW_PAGE_TIMEOUT_MS, DEFAULT_SETTLE_MS,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Run-time knobs
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Budget for each navigation to reach network idle
    pub navigation_timeout: Duration,
    /// Budget for a new tab to appear and reach `DOMContentLoaded`
    pub new_page_timeout: Duration,
    /// Delay after network idle
    pub settle: Duration,
    /// Directory receiving the named screenshots
    pub screenshot_dir: PathBuf,
    /// Capture full-page screenshots
    pub full_page: bool,
    /// Session recording directory
    pub record_dir: Option<PathBuf>,
    /// Delay before teardown
    pub hold: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_millis(DEFAULT_NAVIGATION_TIMEOUT_MS),
            new_page_timeout: Duration::from_millis(DEFAULT_NEW_PAGE_TIMEOUT_MS),
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            screenshot_dir: PathBuf::from("screenshots"),
            full_page: true,
            record_dir: None,
            hold: None,
        }
    }
}

impl RunOptions {
    /// Set the navigation budget
    #[must_use]
    pub const fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    /// Set the new-tab budget
    #[must_use]
    pub const fn with_new_page_timeout(mut self, timeout: Duration) -> Self {
        self.new_page_timeout = timeout;
        self
    }

    /// Set the settle delay
    #[must_use]
    pub const fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Set the screenshot directory
    #[must_use]
    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = dir.into();
        self
    }

    /// Record the session into `dir`
    #[must_use]
    pub fn with_record_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.record_dir = Some(dir.into());
        self
    }

    /// Hold the browser open before teardown
    #[must_use]
    pub const fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = Some(hold);
        self
    }
}

/// One assertion outcome within a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// Invariant the step feeds, if any
    pub invariant: Option<Invariant>,
    /// Outcome
    pub result: AssertionResult,
}

/// Why a pass stopped early
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbortRecord {
    /// Failure category
    pub kind: FailureKind,
    /// Error text
    pub message: String,
}

/// Outcome of one viewport pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Preset the pass ran under
    pub preset: ViewportPreset,
    /// Steps in execution order
    pub steps: Vec<StepRecord>,
    /// Screenshots written
    pub screenshots: Vec<PathBuf>,
    /// Non-fatal problems (failed screenshots, cleanup)
    pub warnings: Vec<String>,
    /// Set when the pass stopped on an error
    pub aborted: Option<AbortRecord>,
    /// Whether every step of the pass ran
    pub complete: bool,
}

impl PassReport {
    fn new(preset: ViewportPreset) -> Self {
        Self {
            preset,
            steps: Vec::new(),
            screenshots: Vec::new(),
            warnings: Vec::new(),
            aborted: None,
            complete: true,
        }
    }

    /// Verdicts recorded for `invariant`
    pub fn verdicts(&self, invariant: Invariant) -> impl Iterator<Item = Verdict> + '_ {
        self.steps
            .iter()
            .filter(move |s| s.invariant == Some(invariant))
            .map(|s| s.result.verdict())
    }

    /// Whether any step failed or the pass aborted
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.aborted.is_some() || self.steps.iter().any(|s| s.result.verdict().is_fail())
    }
}

/// Run-level verdict for one invariant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantSummary {
    /// Invariant
    pub invariant: Invariant,
    /// Report label
    pub label: String,
    /// Verdict across passes
    pub verdict: Verdict,
    /// Which passes decided the verdict
    pub detail: String,
}

/// Complete outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Scenario variant
    pub scenario: ScenarioKind,
    /// URL each pass started from
    pub entry_url: String,
    /// Passes in run order
    pub passes: Vec<PassReport>,
    /// One line per invariant
    pub summary: Vec<InvariantSummary>,
    /// Buffered telemetry
    pub telemetry: TelemetryLogs,
}

impl RunReport {
    /// Whether every invariant passed; a skipped invariant is not a pass
    #[must_use]
    pub fn passed(&self) -> bool {
        !self.summary.is_empty() && self.summary.iter().all(|s| s.verdict.is_pass())
    }

    /// Every screenshot written, in run order
    pub fn screenshots(&self) -> impl Iterator<Item = &PathBuf> {
        self.passes.iter().flat_map(|p| p.screenshots.iter())
    }

    /// Last console entries
    #[must_use]
    pub fn console_tail(&self) -> &[LogEntry] {
        self.telemetry.console_tail(DEFAULT_TAIL)
    }

    /// Last network entries
    #[must_use]
    pub fn network_tail(&self) -> &[LogEntry] {
        self.telemetry.network_tail(DEFAULT_TAIL)
    }
}

/// Progress callbacks, invoked in run order
pub trait RunObserver: Send + Sync + std::fmt::Debug {
    /// A pass is starting
    fn pass_started(&self, _index: usize, _preset: ViewportPreset) {}

    /// A step was recorded
    fn step(&self, _preset: ViewportPreset, _step: &StepRecord) {}

    /// A pass ended
    fn pass_finished(&self, _pass: &PassReport) {}
}

/// Observer that ignores every callback
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Drives the scenario across both viewport presets
#[derive(Debug, Clone)]
pub struct FlowOrchestrator {
    scenario: ScenarioConfig,
    options: RunOptions,
    observer: Arc<dyn RunObserver>,
}

impl FlowOrchestrator {
    /// Create an orchestrator
    #[must_use]
    pub fn new(scenario: ScenarioConfig, options: RunOptions) -> Self {
        Self {
            scenario,
            options,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Report progress to `observer`
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Scenario being run
    #[must_use]
    pub const fn scenario(&self) -> &ScenarioConfig {
        &self.scenario
    }

    /// Run both passes on `driver`, then close it.
    ///
    /// Returns `Err` only for failures that abort the run; everything else is
    /// in the report.
    pub async fn run(&self, driver: Arc<dyn Driver>) -> ProbeResult<RunReport> {
        let mut context_options = ContextOptions::default().with_viewport(ViewportPreset::Desktop);
        if let Some(dir) = &self.options.record_dir {
            context_options = context_options.with_record_dir(dir);
        }

        let session = match Session::open(
            Arc::clone(&driver),
            &context_options,
            self.options.navigation_timeout,
            self.options.settle,
        )
        .await
        {
            Ok(session) => session,
            Err(err) => {
                if let Err(close_err) = driver.close().await {
                    tracing::warn!("browser close failed: {close_err}");
                }
                return Err(err);
            }
        };

        let outcome = self.drive(&session).await;

        if let Some(hold) = self.options.hold {
            tracing::info!("holding browser open for {}s", hold.as_secs());
            tokio::time::sleep(hold).await;
        }
        if let Err(err) = session.close().await {
            tracing::warn!("teardown failed: {err}");
        }
        outcome
    }

    async fn drive(&self, session: &Session) -> ProbeResult<RunReport> {
        let telemetry = TelemetryCollector::new(self.scenario.network_filter())
            .attach(session.primary())
            .await?;
        let entry_url = self.scenario.entry_url();

        let mut passes = Vec::with_capacity(ViewportPreset::ALL.len());
        for (index, preset) in ViewportPreset::ALL.into_iter().enumerate() {
            self.observer.pass_started(index, preset);
            let mut pass = PassReport::new(preset);
            if let Err(err) = self.run_pass(session, &entry_url, index, &mut pass).await {
                if err.is_fatal() {
                    return Err(err);
                }
                tracing::warn!(%preset, "pass aborted: {err}");
                pass.complete = false;
                pass.aborted = Some(AbortRecord {
                    kind: err.kind(),
                    message: err.to_string(),
                });
                if let Err(cleanup) = session.close_secondary_pages().await {
                    pass.warnings.push(format!("cleanup after abort failed: {cleanup}"));
                }
            }
            self.observer.pass_finished(&pass);
            passes.push(pass);
        }

        let telemetry = telemetry.finish().await;
        let summary = summarize(self.scenario.kind, &passes);
        Ok(RunReport {
            scenario: self.scenario.kind,
            entry_url,
            passes,
            summary,
            telemetry,
        })
    }

    async fn run_pass(
        &self,
        session: &Session,
        entry_url: &str,
        index: usize,
        pass: &mut PassReport,
    ) -> ProbeResult<()> {
        let kind = self.scenario.kind;
        let page = session.with_viewport(pass.preset, entry_url).await?;

        for query in self.scenario.legacy_queries() {
            let result = dom::check(&page, &query).await?;
            self.record(pass, Some(Invariant::LegacyRemoved), result);
        }

        let cta = self.scenario.cta_query();
        let mut cta_result = dom::check_and_extract(&page, &cta).await?;
        let cta_count = cta_result.count().unwrap_or(0);
        if cta_count == 0 {
            cta_result = AssertionResult::fail(&cta.label, missing_cta_message(kind)).with_count(0);
        }
        self.record(pass, Some(Invariant::CtaPresent), cta_result);

        self.screenshot(&page, index, ShotStage::Product, pass).await;

        if cta_count == 0 {
            pass.complete = false;
            for invariant in &kind.invariants()[2..] {
                self.record(
                    pass,
                    Some(*invariant),
                    AssertionResult::skipped(invariant.label(kind), "no CTA to follow"),
                );
            }
            return Ok(());
        }

        let first = dom::first_matching(&page, &cta.selector)
            .await?
            .ok_or_else(|| ProbeError::invalid_state("CTA disappeared before the click"))?;

        match kind {
            ScenarioKind::PaymentLink => self.follow_payment_link(session, &first, index, pass).await,
            ScenarioKind::InlineCheckout => self.follow_inline(session, &first, index, pass).await,
        }
    }

    async fn follow_payment_link(
        &self,
        session: &Session,
        cta: &dom::ElementHandle,
        index: usize,
        pass: &mut PassReport,
    ) -> ProbeResult<()> {
        let label = Invariant::DestinationReached.label(ScenarioKind::PaymentLink);
        let opened = tracker::click_and_await_new_page(
            session.context(),
            || cta.click(),
            self.options.new_page_timeout,
        )
        .await;
        session.record("click").await;
        let secondary = match opened {
            Ok(page) => page,
            Err(err) => {
                if err.kind() == FailureKind::CrossTabTimeout {
                    self.record(
                        pass,
                        Some(Invariant::DestinationReached),
                        AssertionResult::fail(label, err.to_string()),
                    );
                }
                return Err(err);
            }
        };

        let inspected = self.inspect_destination(&secondary, index, pass).await;
        if let Err(err) = secondary.close().await {
            pass.warnings.push(format!("closing processor page failed: {err}"));
        }
        inspected
    }

    async fn inspect_destination(
        &self,
        secondary: &PageRef,
        index: usize,
        pass: &mut PassReport,
    ) -> ProbeResult<()> {
        let label = Invariant::DestinationReached.label(ScenarioKind::PaymentLink);
        let expected = &self.scenario.checkout_host;
        let url = secondary.url().await?.unwrap_or_default();
        let host = Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
        let result = match host {
            Some(host) => AssertionResult::check(
                host == expected.to_ascii_lowercase(),
                label,
                format!("opened {host} (expected {expected})"),
            ),
            None => AssertionResult::fail(label, format!("opened unparseable URL `{url}`")),
        };
        self.record(pass, Some(Invariant::DestinationReached), result.with_href(Some(url)));
        self.screenshot(secondary, index, ShotStage::Destination, pass).await;
        Ok(())
    }

    async fn follow_inline(
        &self,
        session: &Session,
        cta: &dom::ElementHandle,
        index: usize,
        pass: &mut PassReport,
    ) -> ProbeResult<()> {
        let kind = ScenarioKind::InlineCheckout;
        cta.click().await?;
        session.record("click").await;
        session.wait_for_network_idle().await?;

        let page = session.primary();
        let url = page.url().await?.unwrap_or_default();
        let reached = url.contains(crate::scenario::CHECKOUT_PATH);
        self.record(
            pass,
            Some(Invariant::DestinationReached),
            AssertionResult::check(reached, Invariant::DestinationReached.label(kind), format!("at {url}"))
                .with_href(Some(url)),
        );

        if reached {
            session.settle().await;
            for query in self.scenario.widget_queries() {
                let result = dom::check(page, &query).await?;
                self.record(pass, Some(Invariant::WidgetsPresent), result);
            }
        } else {
            self.record(
                pass,
                Some(Invariant::WidgetsPresent),
                AssertionResult::skipped(
                    Invariant::WidgetsPresent.label(kind),
                    "checkout page not reached",
                ),
            );
        }
        self.screenshot(page, index, ShotStage::Destination, pass).await;
        Ok(())
    }

    fn record(&self, pass: &mut PassReport, invariant: Option<Invariant>, result: AssertionResult) {
        tracing::debug!(
            preset = %pass.preset,
            label = result.label(),
            verdict = %result.verdict(),
            "{}",
            result.message()
        );
        let step = StepRecord { invariant, result };
        self.observer.step(pass.preset, &step);
        pass.steps.push(step);
    }

    async fn screenshot(&self, page: &PageRef, index: usize, stage: ShotStage, pass: &mut PassReport) {
        let name = screenshot_name(self.scenario.kind, index, stage, pass.preset);
        let path = self.options.screenshot_dir.join(name);
        match page.screenshot(&path, self.options.full_page).await {
            Ok(()) => pass.screenshots.push(path),
            Err(err) => {
                tracing::warn!(path = %path.display(), "screenshot failed: {err}");
                pass.warnings.push(format!("screenshot {} failed: {err}", path.display()));
            }
        }
    }
}

fn missing_cta_message(kind: ScenarioKind) -> &'static str {
    match kind {
        ScenarioKind::PaymentLink => {
            "no payment CTA detected — verify upstream product configuration"
        }
        ScenarioKind::InlineCheckout => {
            "no checkout link detected — verify upstream product configuration"
        }
    }
}

/// Reduce the passes to one verdict per invariant of `kind`
#[must_use]
pub fn summarize(kind: ScenarioKind, passes: &[PassReport]) -> Vec<InvariantSummary> {
    kind.invariants()
        .iter()
        .map(|&invariant| {
            let mut passed = Vec::new();
            let mut failed = Vec::new();
            let mut missing = Vec::new();
            for pass in passes {
                let verdicts: Vec<_> = pass.verdicts(invariant).collect();
                if verdicts.iter().any(|v| v.is_fail()) {
                    failed.push(pass.preset.name());
                } else if verdicts.iter().any(|v| v.is_pass()) {
                    passed.push(pass.preset.name());
                } else if invariant.required_every_pass() {
                    missing.push(pass.preset.name());
                }
            }
            let (verdict, detail) = if !failed.is_empty() {
                (Verdict::Fail, format!("failed in {}", failed.join(", ")))
            } else if !missing.is_empty() {
                (Verdict::Fail, format!("not evaluated in {}", missing.join(", ")))
            } else if passed.is_empty() {
                (Verdict::Skipped, "never ran".to_string())
            } else {
                (Verdict::Pass, format!("passed in {}", passed.join(", ")))
            };
            InvariantSummary {
                invariant,
                label: invariant.label(kind).to_string(),
                verdict,
                detail,
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::PageEvent;
    use crate::mock::{ClickBehavior, MockBrowser, MockDocument, MockElement, MockSite};
    use std::sync::Mutex;

    const BASE: &str = "http://shop.test";
    const PRODUCT: &str = "http://shop.test/loom";
    const HOSTED: &str = "https://buy.example-processor.com/abc123";

    fn scenario(kind: ScenarioKind) -> ScenarioConfig {
        ScenarioConfig::new(kind)
            .with_base_url(BASE)
            .with_product("loom")
            .with_processor_domain("example-processor.com")
            .with_checkout_host("buy.example-processor.com")
    }

    fn options(dir: &std::path::Path) -> RunOptions {
        RunOptions::default()
            .with_settle(Duration::ZERO)
            .with_navigation_timeout(Duration::from_millis(200))
            .with_new_page_timeout(Duration::from_millis(100))
            .with_screenshot_dir(dir)
    }

    fn product_page(cta: Option<MockElement>) -> MockDocument {
        let doc = MockDocument::new()
            .with_element(MockElement::anchor("/about", "About"))
            .with_event(PageEvent::Request {
                method: "GET".into(),
                url: "https://js.example-processor.com/v3".into(),
            })
            .with_event(PageEvent::Console {
                level: "log".into(),
                text: "hydrated".into(),
            });
        match cta {
            Some(cta) => doc.with_element(cta),
            None => doc,
        }
    }

    fn verdict(report: &RunReport, invariant: Invariant) -> Verdict {
        report
            .summary
            .iter()
            .find(|s| s.invariant == invariant)
            .map(|s| s.verdict)
            .unwrap()
    }

    async fn run(site: MockSite, kind: ScenarioKind, dir: &std::path::Path) -> (MockBrowser, ProbeResult<RunReport>) {
        let browser = MockBrowser::new(site);
        let report = FlowOrchestrator::new(scenario(kind), options(dir))
            .run(Arc::new(browser.clone()))
            .await;
        (browser, report)
    }

    #[derive(Debug, Default)]
    struct Recording(Mutex<Vec<String>>);

    impl RunObserver for Recording {
        fn pass_started(&self, index: usize, preset: ViewportPreset) {
            self.0.lock().unwrap().push(format!("start {index} {}", preset.name()));
        }

        fn step(&self, _preset: ViewportPreset, step: &StepRecord) {
            self.0
                .lock()
                .unwrap()
                .push(format!("{} {}", step.result.verdict(), step.result.label()));
        }
    }

    /// Open pages in the browser at the end of each pass
    #[derive(Debug)]
    struct OpenPages {
        browser: MockBrowser,
        seen: Mutex<Vec<usize>>,
    }

    impl OpenPages {
        fn new(browser: &MockBrowser) -> Arc<Self> {
            Arc::new(Self {
                browser: browser.clone(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl RunObserver for OpenPages {
        fn pass_finished(&self, _pass: &PassReport) {
            self.seen.lock().unwrap().push(self.browser.open_page_count());
        }
    }

    async fn run_counting_pages(site: MockSite, dir: &std::path::Path) -> (Vec<usize>, RunReport) {
        let browser = MockBrowser::new(site);
        let pages = OpenPages::new(&browser);
        let report = FlowOrchestrator::new(scenario(ScenarioKind::PaymentLink), options(dir))
            .with_observer(pages.clone())
            .run(Arc::new(browser))
            .await
            .unwrap();
        let seen = pages.seen.lock().unwrap().clone();
        (seen, report)
    }

    mod payment_link {
        use super::*;

        fn site() -> MockSite {
            MockSite::new()
                .route(
                    PRODUCT,
                    product_page(Some(MockElement::new_tab_anchor(HOSTED, "Get Instant Access"))),
                )
                .route(HOSTED, MockDocument::new())
        }

        #[tokio::test]
        async fn test_single_cta_passes_both_viewports() {
            let dir = tempfile::tempdir().unwrap();
            let (browser, report) = run(site(), ScenarioKind::PaymentLink, dir.path()).await;
            let report = report.unwrap();

            assert!(report.passed());
            assert_eq!(report.entry_url, PRODUCT);
            assert_eq!(report.passes.len(), 2);
            for pass in &report.passes {
                assert!(pass.complete);
                assert!(pass.aborted.is_none());
                let cta = pass
                    .steps
                    .iter()
                    .find(|s| s.invariant == Some(Invariant::CtaPresent))
                    .unwrap();
                assert_eq!(cta.result.count(), Some(1));
                assert_eq!(cta.result.text(), Some("Get Instant Access"));
                assert_eq!(cta.result.href(), Some(HOSTED));
            }
            assert_eq!(verdict(&report, Invariant::LegacyRemoved), Verdict::Pass);
            assert_eq!(verdict(&report, Invariant::CtaPresent), Verdict::Pass);
            assert_eq!(verdict(&report, Invariant::DestinationReached), Verdict::Pass);

            let names: Vec<_> = report
                .screenshots()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect();
            assert_eq!(
                names,
                [
                    "1-product-page-desktop.png",
                    "2-processor-page-desktop.png",
                    "3-product-page-mobile.png",
                    "4-processor-page-mobile.png",
                ]
            );
            assert!(report.screenshots().all(|p| p.exists()));

            assert_eq!(browser.pages_opened(), 3);
            assert!(browser.is_closed());
            assert_eq!(report.telemetry.network.len(), 2);
            assert_eq!(report.console_tail().len(), 2);
        }

        #[tokio::test]
        async fn test_zero_ctas_skips_destination() {
            let dir = tempfile::tempdir().unwrap();
            let site = MockSite::new().route(PRODUCT, product_page(None));
            let (browser, report) = run(site, ScenarioKind::PaymentLink, dir.path()).await;
            let report = report.unwrap();

            assert!(!report.passed());
            assert_eq!(verdict(&report, Invariant::LegacyRemoved), Verdict::Pass);
            assert_eq!(verdict(&report, Invariant::CtaPresent), Verdict::Fail);
            assert_eq!(verdict(&report, Invariant::DestinationReached), Verdict::Skipped);
            for pass in &report.passes {
                assert!(!pass.complete);
                assert!(pass.aborted.is_none());
                let failures: Vec<_> = pass
                    .steps
                    .iter()
                    .filter(|s| s.result.verdict().is_fail())
                    .collect();
                assert_eq!(failures.len(), 1);
                assert!(failures[0].result.message().starts_with("no payment CTA detected"));
            }
            assert_eq!(browser.pages_opened(), 1);
            assert!(browser.is_closed());
        }

        #[tokio::test]
        async fn test_duplicate_ctas_fail_with_count() {
            let dir = tempfile::tempdir().unwrap();
            let doc = product_page(Some(MockElement::new_tab_anchor(HOSTED, "Buy")))
                .with_element(MockElement::new_tab_anchor(HOSTED, "Buy again"));
            let site = MockSite::new().route(PRODUCT, doc);
            let (_browser, report) = run(site, ScenarioKind::PaymentLink, dir.path()).await;
            let report = report.unwrap();

            assert_eq!(verdict(&report, Invariant::CtaPresent), Verdict::Fail);
            let cta = &report.passes[0].steps[1];
            assert_eq!(cta.result.count(), Some(2));
            assert!(cta.result.message().contains("found 2"));
            // The first CTA is still followed.
            assert_eq!(verdict(&report, Invariant::DestinationReached), Verdict::Pass);
        }

        #[tokio::test]
        async fn test_suppressed_popup_aborts_each_pass() {
            let dir = tempfile::tempdir().unwrap();
            let cta = MockElement::new("a")
                .with_attr("href", HOSTED)
                .on_click(ClickBehavior::Nothing);
            let site = MockSite::new().route(PRODUCT, product_page(Some(cta)));
            let (browser, report) = run(site, ScenarioKind::PaymentLink, dir.path()).await;
            let report = report.unwrap();

            assert_eq!(report.passes.len(), 2);
            for pass in &report.passes {
                let aborted = pass.aborted.as_ref().unwrap();
                assert_eq!(aborted.kind, FailureKind::CrossTabTimeout);
                assert!(!pass.complete);
                assert_eq!(pass.screenshots.len(), 1);
            }
            assert_eq!(verdict(&report, Invariant::CtaPresent), Verdict::Pass);
            assert_eq!(verdict(&report, Invariant::DestinationReached), Verdict::Fail);
            assert!(browser.is_closed());
        }

        #[tokio::test]
        async fn test_unexpected_destination_is_recorded_not_aborted() {
            let dir = tempfile::tempdir().unwrap();
            let cta = MockElement::new_tab_anchor(HOSTED, "Buy")
                .on_click(ClickBehavior::OpenTab("https://pay.other-processor.com/x".into()));
            let site = MockSite::new().route(PRODUCT, product_page(Some(cta)));
            let (browser, report) = run(site, ScenarioKind::PaymentLink, dir.path()).await;
            let report = report.unwrap();

            assert_eq!(verdict(&report, Invariant::DestinationReached), Verdict::Fail);
            assert!(report.passes.iter().all(|p| p.complete && p.aborted.is_none()));
            assert!(browser.is_closed());
        }

        #[tokio::test]
        async fn test_processor_tab_closed_before_pass_ends() {
            let dir = tempfile::tempdir().unwrap();
            let (seen, report) = run_counting_pages(site(), dir.path()).await;
            assert!(report.passed());
            assert_eq!(seen, [1, 1]);

            let cta = MockElement::new_tab_anchor(HOSTED, "Buy")
                .on_click(ClickBehavior::OpenTab("https://pay.other-processor.com/x".into()));
            let other = MockSite::new().route(PRODUCT, product_page(Some(cta)));
            let (seen, report) = run_counting_pages(other, dir.path()).await;
            assert_eq!(verdict(&report, Invariant::DestinationReached), Verdict::Fail);
            assert_eq!(seen, [1, 1]);
        }

        #[tokio::test]
        async fn test_rejected_click_fails_run() {
            let dir = tempfile::tempdir().unwrap();
            let cta = MockElement::new_tab_anchor(HOSTED, "Buy")
                .on_click(ClickBehavior::Fail("element is obscured".into()));
            let site = MockSite::new()
                .route(PRODUCT, product_page(Some(cta)))
                .route(HOSTED, MockDocument::new());
            let (browser, report) = run(site, ScenarioKind::PaymentLink, dir.path()).await;
            let report = report.unwrap();

            for pass in &report.passes {
                assert_eq!(pass.aborted.as_ref().map(|a| a.kind), Some(FailureKind::Step));
                assert!(!pass.complete);
            }
            assert_eq!(verdict(&report, Invariant::LegacyRemoved), Verdict::Pass);
            assert_eq!(verdict(&report, Invariant::CtaPresent), Verdict::Pass);
            assert_eq!(verdict(&report, Invariant::DestinationReached), Verdict::Skipped);
            assert!(!report.passed());
            assert!(browser.is_closed());
        }

        #[tokio::test]
        async fn test_navigation_timeout_aborts_pass_only() {
            let dir = tempfile::tempdir().unwrap();
            let site = MockSite::new().route(PRODUCT, MockDocument::new().stalled());
            let (browser, report) = run(site, ScenarioKind::PaymentLink, dir.path()).await;
            let report = report.unwrap();

            assert_eq!(report.passes.len(), 2);
            assert!(report
                .passes
                .iter()
                .all(|p| p.aborted.as_ref().map(|a| a.kind) == Some(FailureKind::NavigationTimeout)));
            assert_eq!(verdict(&report, Invariant::LegacyRemoved), Verdict::Fail);
            assert_eq!(verdict(&report, Invariant::DestinationReached), Verdict::Skipped);
            assert!(browser.is_closed());
        }

        #[tokio::test]
        async fn test_observer_sees_steps_in_order() {
            let dir = tempfile::tempdir().unwrap();
            let observer = Arc::new(Recording::default());
            let browser = MockBrowser::new(site());
            FlowOrchestrator::new(scenario(ScenarioKind::PaymentLink), options(dir.path()))
                .with_observer(observer.clone())
                .run(Arc::new(browser))
                .await
                .unwrap();

            let events = observer.0.lock().unwrap().clone();
            assert_eq!(
                &events[..4],
                [
                    "start 0 desktop",
                    "pass legacy links removed",
                    "pass payment CTA present",
                    "pass destination host correct",
                ]
            );
            assert_eq!(events[4], "start 1 mobile");
        }
    }

    mod failures {
        use super::*;

        #[tokio::test]
        async fn test_context_failure_is_fatal_and_closes_browser() {
            let dir = tempfile::tempdir().unwrap();
            let browser = MockBrowser::new(MockSite::new()).failing_context_creation();
            let err = FlowOrchestrator::new(scenario(ScenarioKind::PaymentLink), options(dir.path()))
                .run(Arc::new(browser.clone()))
                .await
                .unwrap_err();
            assert!(err.is_fatal());
            assert!(browser.is_closed());
        }

        #[tokio::test]
        async fn test_subscription_failure_is_fatal_and_closes_browser() {
            let dir = tempfile::tempdir().unwrap();
            let browser = MockBrowser::new(MockSite::new()).failing_subscription();
            let err = FlowOrchestrator::new(scenario(ScenarioKind::PaymentLink), options(dir.path()))
                .run(Arc::new(browser.clone()))
                .await
                .unwrap_err();
            assert!(matches!(err, ProbeError::SubscriptionError { .. }));
            assert!(browser.is_closed());
            assert_eq!(browser.open_page_count(), 0);
        }
    }

    mod inline_checkout {
        use super::*;

        const CHECKOUT: &str = "http://shop.test/checkout?product=loom";

        fn checkout_page() -> MockDocument {
            MockDocument::new()
                .with_element(MockElement::button("Pay with Stripe"))
                .with_element(MockElement::button("Pay with PayPal"))
                .with_element(MockElement::new("div").with_id("checkout"))
                .with_element(MockElement::new("iframe").inside("checkout"))
        }

        #[tokio::test]
        async fn test_same_tab_checkout_passes() {
            let dir = tempfile::tempdir().unwrap();
            let site = MockSite::new()
                .route(
                    PRODUCT,
                    product_page(Some(MockElement::anchor(CHECKOUT, " Buy now "))),
                )
                .route(CHECKOUT, checkout_page());
            let (browser, report) = run(site, ScenarioKind::InlineCheckout, dir.path()).await;
            let report = report.unwrap();

            assert!(report.passed(), "{:#?}", report.summary);
            assert_eq!(verdict(&report, Invariant::WidgetsPresent), Verdict::Pass);
            assert_eq!(browser.pages_opened(), 1);
            let names: Vec<_> = report
                .screenshots()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect();
            assert_eq!(names[1], "2-checkout-page-desktop.png");
        }

        #[tokio::test]
        async fn test_legacy_buttons_and_missing_widgets_fail() {
            let dir = tempfile::tempdir().unwrap();
            let site = MockSite::new()
                .route(
                    PRODUCT,
                    product_page(Some(MockElement::anchor(CHECKOUT, "Buy now")))
                        .with_element(MockElement::button("Pay with PayPal")),
                )
                .route(CHECKOUT, MockDocument::new().with_element(MockElement::button("Pay with Stripe")));
            let (_browser, report) = run(site, ScenarioKind::InlineCheckout, dir.path()).await;
            let report = report.unwrap();

            assert_eq!(verdict(&report, Invariant::LegacyRemoved), Verdict::Fail);
            assert_eq!(verdict(&report, Invariant::DestinationReached), Verdict::Pass);
            assert_eq!(verdict(&report, Invariant::WidgetsPresent), Verdict::Fail);
        }
    }

    mod summary {
        use super::*;

        fn pass_with(preset: ViewportPreset, steps: &[(Invariant, Verdict)]) -> PassReport {
            let mut pass = PassReport::new(preset);
            for &(invariant, verdict) in steps {
                let result = match verdict {
                    Verdict::Pass => AssertionResult::pass("x", "ok"),
                    Verdict::Fail => AssertionResult::fail("x", "bad"),
                    Verdict::Skipped => AssertionResult::skipped("x", "n/a"),
                };
                pass.steps.push(StepRecord {
                    invariant: Some(invariant),
                    result,
                });
            }
            pass
        }

        #[test]
        fn test_destination_only_counts_passes_where_it_ran() {
            let passes = [
                pass_with(
                    ViewportPreset::Desktop,
                    &[
                        (Invariant::LegacyRemoved, Verdict::Pass),
                        (Invariant::CtaPresent, Verdict::Pass),
                        (Invariant::DestinationReached, Verdict::Pass),
                    ],
                ),
                pass_with(
                    ViewportPreset::Mobile,
                    &[
                        (Invariant::LegacyRemoved, Verdict::Pass),
                        (Invariant::CtaPresent, Verdict::Pass),
                        (Invariant::DestinationReached, Verdict::Skipped),
                    ],
                ),
            ];
            let summary = summarize(ScenarioKind::PaymentLink, &passes);
            assert!(summary.iter().all(|s| s.verdict == Verdict::Pass));
            assert_eq!(summary[2].detail, "passed in desktop");
        }

        #[test]
        fn test_required_invariant_missing_from_a_pass_fails() {
            let passes = [
                pass_with(ViewportPreset::Desktop, &[(Invariant::LegacyRemoved, Verdict::Pass)]),
                pass_with(ViewportPreset::Mobile, &[]),
            ];
            let summary = summarize(ScenarioKind::PaymentLink, &passes);
            assert_eq!(summary[0].verdict, Verdict::Fail);
            assert_eq!(summary[0].detail, "not evaluated in mobile");
            assert_eq!(summary[2].verdict, Verdict::Skipped);
        }

        #[test]
        fn test_skipped_invariant_is_not_a_pass() {
            let passes: Vec<_> = ViewportPreset::ALL
                .into_iter()
                .map(|preset| {
                    let mut pass = pass_with(
                        preset,
                        &[
                            (Invariant::LegacyRemoved, Verdict::Pass),
                            (Invariant::CtaPresent, Verdict::Pass),
                        ],
                    );
                    pass.complete = false;
                    pass.aborted = Some(AbortRecord {
                        kind: FailureKind::Step,
                        message: "click rejected".into(),
                    });
                    pass
                })
                .collect();
            let summary = summarize(ScenarioKind::PaymentLink, &passes);
            assert_eq!(summary[2].verdict, Verdict::Skipped);

            let report = RunReport {
                scenario: ScenarioKind::PaymentLink,
                entry_url: PRODUCT.into(),
                passes,
                summary,
                telemetry: TelemetryLogs::default(),
            };
            assert!(!report.passed());
        }

        #[test]
        fn test_empty_summary_is_not_a_pass() {
            let report = RunReport {
                scenario: ScenarioKind::PaymentLink,
                entry_url: PRODUCT.into(),
                passes: Vec::new(),
                summary: Vec::new(),
                telemetry: TelemetryLogs::default(),
            };
            assert!(!report.passed());
        }
    }
}
