//! checkout-probe CLI library
//!
//! Command-line front end for [`checkout_probe`]: argument parsing, output
//! settings, progress reporting and the run/report cycle.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // Error types are self-documenting

mod commands;
mod config;
mod error;
mod output;
mod runner;

pub use commands::{Cli, ColorArg, ScenarioArg};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{
    format_step, render_report, report_json, summary_line, tail_title, ProgressReporter,
};
pub use runner::{check_outcome, validate_base_url, ProbeRunner};
