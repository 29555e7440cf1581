//! CLI configuration

use std::io::IsTerminal;

/// Verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only
    Quiet,
    /// Progress, summary and telemetry entries
    #[default]
    Normal,
    /// Adds engine activity
    Verbose,
    /// Everything, including wait polling
    Debug,
}

impl Verbosity {
    /// Map `-q` and the `-v` count to a level
    #[must_use]
    pub const fn from_flags(quiet: bool, verbose: u8) -> Self {
        if quiet {
            return Self::Quiet;
        }
        match verbose {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Debug,
        }
    }

    /// Check if quiet mode
    #[must_use]
    pub const fn is_quiet(self) -> bool {
        matches!(self, Self::Quiet)
    }

    /// Default `tracing` filter directive when `RUST_LOG` is unset.
    ///
    /// Telemetry entries are logged at info under their own target so they
    /// stream as they arrive at normal verbosity.
    #[must_use]
    pub const fn log_filter(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "warn,checkout_probe::telemetry=info",
            Self::Verbose => "info",
            Self::Debug => "debug",
        }
    }
}

/// Color output choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorChoice {
    /// Always use colors
    Always,
    /// Use colors when stderr is a terminal
    #[default]
    Auto,
    /// Never use colors
    Never,
}

impl ColorChoice {
    /// Resolve against the current terminal
    #[must_use]
    pub fn should_color(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => std::io::stderr().is_terminal(),
        }
    }
}

/// Output settings derived from the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct CliConfig {
    /// Verbosity level
    pub verbosity: Verbosity,
    /// Color choice
    pub color: ColorChoice,
    /// Emit the report as JSON on stdout
    pub json: bool,
}

impl CliConfig {
    /// Create a default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity
    #[must_use]
    pub const fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set color choice
    #[must_use]
    pub const fn with_color(mut self, color: ColorChoice) -> Self {
        self.color = color;
        self
    }

    /// Set JSON output
    #[must_use]
    pub const fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Whether human-oriented progress output is suppressed
    #[must_use]
    pub const fn suppress_progress(&self) -> bool {
        self.json || self.verbosity.is_quiet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_from_flags() {
        assert_eq!(Verbosity::from_flags(false, 0), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(false, 1), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, 5), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(true, 2), Verbosity::Quiet);
    }

    #[test]
    fn test_log_filter_streams_telemetry_by_default() {
        assert!(Verbosity::Normal
            .log_filter()
            .contains("checkout_probe::telemetry=info"));
        assert_eq!(Verbosity::Quiet.log_filter(), "error");
        assert_eq!(Verbosity::Debug.log_filter(), "debug");
    }

    #[test]
    fn test_color_choice() {
        assert!(ColorChoice::Always.should_color());
        assert!(!ColorChoice::Never.should_color());
    }

    #[test]
    fn test_suppress_progress() {
        assert!(!CliConfig::new().suppress_progress());
        assert!(CliConfig::new().with_json(true).suppress_progress());
        assert!(CliConfig::new()
            .with_verbosity(Verbosity::Quiet)
            .suppress_progress());
    }
}
