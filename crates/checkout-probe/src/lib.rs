//! checkout-probe: browser-driven verification of a checkout funnel
//!
//! Loads a product page under a desktop and a mobile viewport, asserts that
//! the legacy checkout controls are gone and that exactly one payment CTA is
//! present, follows the CTA into the payment processor's tab and checks where
//! it lands. Console output, page errors and checkout-related requests are
//! captured alongside for diagnostics.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      FlowOrchestrator                         │
//! │   for preset in [desktop, mobile]                             │
//! │   ┌───────────┐   ┌────────────┐   ┌──────────────────────┐   │
//! │   │ Session   │──►│ dom::check │──►│ tracker::click_and_  │   │
//! │   │ viewport  │   │ queries    │   │ await_new_page       │   │
//! │   └───────────┘   └────────────┘   └──────────────────────┘   │
//! │         │                                                     │
//! │         ▼ events                                              │
//! │   ┌─────────────────────┐                                     │
//! │   │ TelemetryCollector  │  console / errors / network logs    │
//! │   └─────────────────────┘                                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │   Driver / BrowsingContext / PageHandle                       │
//! │   ChromiumBrowser (CDP)            MockBrowser (in-process)   │
//! └───────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

mod assertion;
mod engine;
mod orchestrator;
mod result;
mod scenario;
mod selector;
mod session;
mod telemetry;
mod viewport;
mod wait;

/// Chromium engine over CDP
#[cfg(feature = "browser")]
pub mod browser;

/// DOM assertion engine
pub mod dom;

/// Scripted in-process engine for tests
#[allow(clippy::missing_errors_doc)]
pub mod mock;

/// Cross-tab navigation tracker
pub mod tracker;

pub use assertion::{AssertionResult, Cardinality, ElementQuery, Verdict};
#[cfg(feature = "browser")]
pub use browser::ChromiumBrowser;
pub use engine::{
    BrowsingContext, ContextOptions, Driver, LaunchOptions, PageEvent, PageEventStream,
    PageHandle, PageRef, PageWaiter,
};
pub use orchestrator::{
    summarize, AbortRecord, FlowOrchestrator, InvariantSummary, NoopObserver, PassReport,
    RunObserver, RunOptions, RunReport, StepRecord,
};
pub use result::{FailureKind, ProbeError, ProbeResult};
pub use scenario::{
    screenshot_name, Invariant, ScenarioConfig, ScenarioKind, ShotStage, CHECKOUT_PATH,
    DEFAULT_BASE_URL, DEFAULT_CHECKOUT_HOST, DEFAULT_EXTRA_DOMAINS, DEFAULT_PROCESSOR_DOMAIN,
    DEFAULT_PRODUCT, LEGACY_CHECKOUT_PATTERN,
};
pub use selector::{AttrFilter, AttrMatch, Selector};
pub use session::{Recorder, Session};
pub use telemetry::{
    host_matches, render_console, render_request, truncate_chars, LogEntry, LogKind,
    NetworkFilter, TelemetryCollector, TelemetryHandle, TelemetryLogs, DEFAULT_TAIL,
    URL_PREFIX_CHARS,
};
pub use tracker::{click_and_await_new_page, NavigationExpectation, TrackerState};
pub use viewport::ViewportPreset;
pub use wait::{
    LoadState, WaitOptions, DEFAULT_NAVIGATION_TIMEOUT_MS, DEFAULT_NEW_PAGE_TIMEOUT_MS,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_SETTLE_MS, NETWORK_IDLE_THRESHOLD_MS,
};
