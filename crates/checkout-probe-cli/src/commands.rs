//! CLI command definitions using clap

use checkout_probe::{
    LaunchOptions, RunOptions, ScenarioConfig, ScenarioKind, DEFAULT_BASE_URL,
    DEFAULT_CHECKOUT_HOST, DEFAULT_NAVIGATION_TIMEOUT_MS, DEFAULT_NEW_PAGE_TIMEOUT_MS,
    DEFAULT_PROCESSOR_DOMAIN, DEFAULT_PRODUCT, DEFAULT_SETTLE_MS,
};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Verify a product page's checkout funnel in a real browser
#[derive(Parser, Debug)]
#[command(name = "checkout-probe")]
#[command(author, version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto")]
    pub color: ColorArg,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Scenario variant
    #[arg(long, default_value = "payment-link", env = "CHECKOUT_PROBE_SCENARIO")]
    pub scenario: ScenarioArg,

    /// Base URL of the application under test
    #[arg(long, default_value = DEFAULT_BASE_URL, env = "CHECKOUT_PROBE_BASE_URL")]
    pub base_url: String,

    /// Product slug appended to the base URL
    #[arg(long, default_value = DEFAULT_PRODUCT, env = "CHECKOUT_PROBE_PRODUCT")]
    pub product: String,

    /// Payment-processor domain watched in network telemetry
    #[arg(long, default_value = DEFAULT_PROCESSOR_DOMAIN, env = "CHECKOUT_PROBE_PROCESSOR_DOMAIN")]
    pub processor_domain: String,

    /// Host the payment link must open
    #[arg(long, default_value = DEFAULT_CHECKOUT_HOST, env = "CHECKOUT_PROBE_CHECKOUT_HOST")]
    pub checkout_host: String,

    /// Further domains watched in network telemetry
    #[arg(
        long = "monitor-domain",
        value_delimiter = ',',
        default_value = "paypal.com",
        env = "CHECKOUT_PROBE_MONITOR_DOMAINS"
    )]
    pub monitor_domains: Vec<String>,

    /// Show the browser window
    #[arg(long, env = "CHECKOUT_PROBE_HEADED")]
    pub headed: bool,

    /// Delay before each navigation and click, in milliseconds
    #[arg(long, default_value = "0", env = "CHECKOUT_PROBE_SLOW_MO_MS")]
    pub slow_mo_ms: u64,

    /// Path to the chromium binary
    #[arg(long, env = "CHROMIUM_PATH")]
    pub chromium_path: Option<PathBuf>,

    /// Disable the chromium sandbox (containers/CI)
    #[arg(long)]
    pub no_sandbox: bool,

    /// Directory for the named screenshots
    #[arg(long, default_value = "screenshots", env = "CHECKOUT_PROBE_SCREENSHOT_DIR")]
    pub screenshot_dir: PathBuf,

    /// Capture the viewport only instead of the full page
    #[arg(long)]
    pub viewport_only: bool,

    /// Record numbered frames of the session into this directory
    #[arg(long, env = "CHECKOUT_PROBE_RECORD_DIR")]
    pub record_dir: Option<PathBuf>,

    /// Budget for each navigation to reach network idle, in milliseconds
    #[arg(long, default_value_t = DEFAULT_NAVIGATION_TIMEOUT_MS)]
    pub navigation_timeout_ms: u64,

    /// Budget for the payment tab to open and load, in milliseconds
    #[arg(long, default_value_t = DEFAULT_NEW_PAGE_TIMEOUT_MS)]
    pub new_page_timeout_ms: u64,

    /// Delay after network idle for late rendering, in milliseconds
    #[arg(long, default_value_t = DEFAULT_SETTLE_MS)]
    pub settle_ms: u64,

    /// Keep the browser open this many seconds before teardown
    #[arg(long, env = "CHECKOUT_PROBE_HOLD_SECS")]
    pub hold_secs: Option<u64>,
}

impl Cli {
    /// Scenario to run
    #[must_use]
    pub fn scenario_config(&self) -> ScenarioConfig {
        ScenarioConfig::new(self.scenario.into())
            .with_base_url(&self.base_url)
            .with_product(&self.product)
            .with_processor_domain(&self.processor_domain)
            .with_checkout_host(&self.checkout_host)
            .with_extra_domains(self.monitor_domains.iter().filter(|d| !d.is_empty()))
    }

    /// Browser launch options
    #[must_use]
    pub fn launch_options(&self) -> LaunchOptions {
        let mut options = LaunchOptions::default()
            .with_headless(!self.headed)
            .with_slow_mo(Duration::from_millis(self.slow_mo_ms));
        if let Some(path) = &self.chromium_path {
            options = options.with_chromium_path(path);
        }
        if self.no_sandbox {
            options = options.with_no_sandbox();
        }
        options
    }

    /// Timeouts, output locations and teardown behaviour
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        let mut options = RunOptions::default()
            .with_navigation_timeout(Duration::from_millis(self.navigation_timeout_ms))
            .with_new_page_timeout(Duration::from_millis(self.new_page_timeout_ms))
            .with_settle(Duration::from_millis(self.settle_ms))
            .with_screenshot_dir(&self.screenshot_dir);
        options.full_page = !self.viewport_only;
        if let Some(dir) = &self.record_dir {
            options = options.with_record_dir(dir);
        }
        if let Some(secs) = self.hold_secs {
            options = options.with_hold(Duration::from_secs(secs));
        }
        options
    }
}

/// Scenario variant argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScenarioArg {
    /// CTA opens the processor's hosted checkout in a new tab
    #[default]
    PaymentLink,
    /// CTA navigates the same tab to the site's checkout page
    InlineCheckout,
}

impl From<ScenarioArg> for ScenarioKind {
    fn from(arg: ScenarioArg) -> Self {
        match arg {
            ScenarioArg::PaymentLink => Self::PaymentLink,
            ScenarioArg::InlineCheckout => Self::InlineCheckout,
        }
    }
}

/// Color argument
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}
