//! checkout-probe: verify a product page's checkout funnel in a real browser
//!
//! Usage:
//!   checkout-probe                                  # payment-link flow against localhost:3000
//!   checkout-probe --scenario inline-checkout       # same-tab checkout page flow
//!   checkout-probe --base-url https://staging.test --headed --hold-secs 30
//!   checkout-probe --json > report.json             # machine-readable report

use checkout_probe_cli::{check_outcome, Cli, CliConfig, CliResult, ProbeRunner, Verbosity};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_tracing(config.verbosity);

    let scenario = cli.scenario_config();
    tracing::debug!(scenario = %scenario.kind, url = %scenario.entry_url(), "starting probe");

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(ProbeRunner::new(config).run(
        scenario,
        cli.run_options(),
        cli.launch_options(),
    ))?;
    check_outcome(&report)
}

fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(cli.color.clone().into())
        .with_json(cli.json)
}

fn init_tracing(verbosity: Verbosity) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.log_filter())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
