//! Output formatting and progress reporting

use crate::error::CliResult;
use checkout_probe::{
    LogEntry, PassReport, RunObserver, RunReport, StepRecord, Verdict, ViewportPreset,
};
use console::{style, Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Progress reporter for a probe run
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    spinner: Mutex<Option<ProgressBar>>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            spinner: Mutex::new(None),
            use_color,
            quiet,
        }
    }

    /// Start a spinner, replacing any running one
    pub fn start_spinner(&self, message: &str) {
        if self.quiet {
            return;
        }

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg} ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        if let Some(previous) = self.slot().replace(pb) {
            previous.finish_and_clear();
        }
    }

    /// Update spinner message
    pub fn set_message(&self, message: &str) {
        if let Some(pb) = self.slot().as_ref() {
            pb.set_message(message.to_string());
        }
    }

    /// Stop and clear the spinner
    pub fn finish(&self) {
        if let Some(pb) = self.slot().take() {
            pb.finish_and_clear();
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.prefixed(style("✓").green().bold().to_string(), "PASS", message);
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // Always print failures, even in quiet mode
        self.prefixed(style("✗").red().bold().to_string(), "FAIL", message);
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.prefixed(style("⚠").yellow().bold().to_string(), "WARN", message);
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.prefixed(style("ℹ").blue().bold().to_string(), "INFO", message);
    }

    /// Print a skipped check
    pub fn skipped(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.prefixed(style("-").dim().to_string(), "SKIP", message);
    }

    /// Print an indented detail line
    pub fn detail(&self, message: &str) {
        if self.quiet {
            return;
        }
        self.emit(&format!("    {message}"));
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }

        let styled = if self.use_color {
            style(title).bold().underlined().to_string()
        } else {
            format!("=== {title} ===")
        };

        self.emit("");
        self.emit(&styled);
    }

    /// Print the overall invariant tally
    pub fn summary(&self, passed: usize, failed: usize, skipped: usize, duration: Duration) {
        if self.quiet && failed == 0 {
            return;
        }

        self.emit("");

        let total = passed + failed + skipped;
        let duration_secs = duration.as_secs_f64();

        if self.use_color {
            let passed_style = Style::new().green().bold();
            let failed_style = Style::new().red().bold();
            let skipped_style = Style::new().yellow();

            let status = if failed > 0 {
                failed_style.apply_to("FAILED")
            } else {
                passed_style.apply_to("PASSED")
            };

            self.emit(&format!(
                "{} {} invariants in {:.2}s ({} passed, {} failed, {} skipped)",
                status,
                total,
                duration_secs,
                passed_style.apply_to(passed),
                if failed > 0 {
                    failed_style.apply_to(failed).to_string()
                } else {
                    failed.to_string()
                },
                skipped_style.apply_to(skipped)
            ));
        } else {
            self.emit(&summary_line(passed, failed, skipped, duration));
        }
    }

    fn prefixed(&self, colored: String, plain: &str, message: &str) {
        let prefix = if self.use_color {
            colored
        } else {
            plain.to_string()
        };
        self.emit(&format!("{prefix} {message}"));
    }

    fn emit(&self, line: &str) {
        match self.slot().as_ref() {
            Some(pb) => pb.suspend(|| {
                let _ = self.term.write_line(line);
            }),
            None => {
                let _ = self.term.write_line(line);
            }
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<ProgressBar>> {
        self.spinner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn verdict_line(&self, verdict: Verdict, message: &str) {
        match verdict {
            Verdict::Pass => self.success(message),
            Verdict::Fail => self.failure(message),
            Verdict::Skipped => self.skipped(message),
        }
    }
}

impl RunObserver for ProgressReporter {
    fn pass_started(&self, index: usize, preset: ViewportPreset) {
        self.header(&format!(
            "Pass {}: {preset} ({}x{})",
            index + 1,
            preset.width(),
            preset.height()
        ));
        self.start_spinner(&format!("checking {preset} viewport"));
    }

    fn step(&self, _preset: ViewportPreset, step: &StepRecord) {
        self.verdict_line(step.result.verdict(), &format_step(step));
        if let Some(text) = step.result.text() {
            self.detail(&format!("text: {text:?}"));
        }
        if let Some(href) = step.result.href() {
            self.detail(&format!("href: {href}"));
        }
    }

    fn pass_finished(&self, pass: &PassReport) {
        self.finish();
        for warning in &pass.warnings {
            self.warning(warning);
        }
        if let Some(abort) = &pass.aborted {
            self.failure(&format!("{} pass aborted: {}", pass.preset, abort.message));
        }
    }
}

/// One line for a recorded step
#[must_use]
pub fn format_step(step: &StepRecord) -> String {
    format!("{}: {}", step.result.label(), step.result.message())
}

/// Uncolored tally line
#[must_use]
pub fn summary_line(passed: usize, failed: usize, skipped: usize, duration: Duration) -> String {
    let total = passed + failed + skipped;
    let status = if failed > 0 { "FAILED" } else { "PASSED" };
    format!(
        "{status} {total} invariants in {:.2}s ({passed} passed, {failed} failed, {skipped} skipped)",
        duration.as_secs_f64()
    )
}

/// Section title for a log tail
#[must_use]
pub fn tail_title(name: &str, shown: usize, total: usize) -> String {
    if shown < total {
        format!("{name} (last {shown} of {total})")
    } else {
        format!("{name} ({total})")
    }
}

/// Print the end-of-run summary, telemetry tails and screenshot list
pub fn render_report(reporter: &ProgressReporter, report: &RunReport, duration: Duration) {
    reporter.header(&format!("Summary: {} ({})", report.scenario, report.entry_url));
    let mut tally = (0, 0, 0);
    for entry in &report.summary {
        let line = format!("{}: {}", entry.label, entry.detail);
        reporter.verdict_line(entry.verdict, &line);
        match entry.verdict {
            Verdict::Pass => tally.0 += 1,
            Verdict::Fail => tally.1 += 1,
            Verdict::Skipped => tally.2 += 1,
        }
    }

    render_tail(reporter, "Console", report.console_tail(), report.telemetry.console.len());
    render_tail(reporter, "Network", report.network_tail(), report.telemetry.network.len());
    let errors = report.telemetry.errors().count();
    if errors > 0 {
        reporter.warning(&format!("{errors} uncaught page error(s) captured"));
    }

    let screenshots: Vec<_> = report.screenshots().collect();
    if !screenshots.is_empty() {
        reporter.header(&format!("Screenshots ({})", screenshots.len()));
        for path in screenshots {
            reporter.info(&path.display().to_string());
        }
    }

    reporter.summary(tally.0, tally.1, tally.2, duration);
}

fn render_tail(reporter: &ProgressReporter, name: &str, tail: &[LogEntry], total: usize) {
    reporter.header(&tail_title(name, tail.len(), total));
    if tail.is_empty() {
        reporter.detail("(none)");
    }
    for entry in tail {
        reporter.detail(&entry.to_string());
    }
}

/// Pretty-printed JSON for the report
pub fn report_json(report: &RunReport) -> CliResult<String> {
    Ok(serde_json::to_string_pretty(report)?)
}
