//! Probe runner: launches the engine, drives the flow and renders the outcome

use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::{render_report, report_json, ProgressReporter};
use checkout_probe::{Driver, FlowOrchestrator, LaunchOptions, RunOptions, RunReport, ScenarioConfig};
use std::sync::Arc;
use std::time::Instant;

/// Runs one probe and reports on it
#[derive(Debug)]
pub struct ProbeRunner {
    config: CliConfig,
    reporter: Arc<ProgressReporter>,
}

impl ProbeRunner {
    /// Create a runner with output settings from `config`
    #[must_use]
    pub fn new(config: CliConfig) -> Self {
        let reporter = ProgressReporter::new(config.color.should_color(), config.suppress_progress());
        Self {
            config,
            reporter: Arc::new(reporter),
        }
    }

    /// Launch chromium and run `scenario` on it
    pub async fn run(
        &self,
        scenario: ScenarioConfig,
        options: RunOptions,
        launch: LaunchOptions,
    ) -> CliResult<RunReport> {
        validate_base_url(&scenario.base_url)?;
        self.reporter.start_spinner("launching browser");
        let driver = launch_driver(launch).await;
        self.reporter.finish();
        self.run_with_driver(driver?, scenario, options).await
    }

    /// Run `scenario` on an already launched engine
    pub async fn run_with_driver(
        &self,
        driver: Arc<dyn Driver>,
        scenario: ScenarioConfig,
        options: RunOptions,
    ) -> CliResult<RunReport> {
        let started = Instant::now();
        let report = FlowOrchestrator::new(scenario, options)
            .with_observer(self.reporter.clone())
            .run(driver)
            .await;
        self.reporter.finish();
        let report = report?;

        if self.config.json {
            println!("{}", report_json(&report)?);
        } else {
            render_report(&self.reporter, &report, started.elapsed());
        }
        Ok(report)
    }
}

/// Fail with [`CliError::RunFailed`] unless every invariant passed
pub fn check_outcome(report: &RunReport) -> CliResult<()> {
    if report.passed() {
        return Ok(());
    }
    let failed = report.summary.iter().filter(|s| !s.verdict.is_pass()).count();
    Err(CliError::run_failed(failed.max(1), report.summary.len()))
}

/// Reject base URLs the browser cannot load directly
pub fn validate_base_url(base_url: &str) -> CliResult<()> {
    if base_url.starts_with("http://") || base_url.starts_with("https://") {
        Ok(())
    } else {
        Err(CliError::invalid_argument(format!(
            "base URL must start with http:// or https://, got {base_url:?}"
        )))
    }
}

#[cfg(feature = "browser")]
async fn launch_driver(launch: LaunchOptions) -> CliResult<Arc<dyn Driver>> {
    let browser = checkout_probe::ChromiumBrowser::launch(launch).await?;
    Ok(Arc::new(browser))
}

#[cfg(not(feature = "browser"))]
#[allow(clippy::unused_async)]
async fn launch_driver(_launch: LaunchOptions) -> CliResult<Arc<dyn Driver>> {
    Err(CliError::config(
        "checkout-probe was built without the `browser` feature",
    ))
}
