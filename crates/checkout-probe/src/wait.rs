//! Load states and wait budgets.

use std::time::Duration;

/// Default budget for a navigation to reach its load state (30 seconds)
pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 30_000;

/// Default budget for a new tab to appear and reach `DOMContentLoaded`
pub const DEFAULT_NEW_PAGE_TIMEOUT_MS: u64 = 15_000;

/// Default polling interval (50ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Network idle threshold (500ms without requests)
pub const NETWORK_IDLE_THRESHOLD_MS: u64 = 500;

/// Settle delay after network idle for late client-side rendering
pub const DEFAULT_SETTLE_MS: u64 = 2_000;

/// Page load states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub enum LoadState {
    /// Wait for the `load` event to fire
    #[default]
    Load,
    /// Wait for `DOMContentLoaded` event
    DomContentLoaded,
    /// Wait for network to be idle (no requests for 500ms)
    NetworkIdle,
}

impl LoadState {
    /// Get the event name for this load state
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "DOMContentLoaded",
            Self::NetworkIdle => "networkidle",
        }
    }

    /// Whether a `document.readyState` value satisfies this state.
    ///
    /// Network idle is tracked from request events, so only the document part
    /// of it is answered here.
    #[must_use]
    pub fn satisfied_by_ready_state(&self, ready_state: &str) -> bool {
        match self {
            Self::DomContentLoaded => matches!(ready_state, "interactive" | "complete"),
            Self::Load | Self::NetworkIdle => ready_state == "complete",
        }
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.event_name())
    }
}

/// Options for a navigation or load-state wait
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Timeout in milliseconds
    pub timeout_ms: u64,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Quiet window that counts as network idle
    pub idle_threshold_ms: u64,
    /// State to wait for
    pub wait_until: LoadState,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            idle_threshold_ms: NETWORK_IDLE_THRESHOLD_MS,
            wait_until: LoadState::Load,
        }
    }
}

impl WaitOptions {
    /// Create new wait options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout in milliseconds
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set load state to wait for
    #[must_use]
    pub const fn with_wait_until(mut self, state: LoadState) -> Self {
        self.wait_until = state;
        self
    }

    /// Set the network idle quiet window
    #[must_use]
    pub const fn with_idle_threshold(mut self, idle_threshold_ms: u64) -> Self {
        self.idle_threshold_ms = idle_threshold_ms;
        self
    }

    /// Get timeout as Duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get poll interval as Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get the idle window as Duration
    #[must_use]
    pub const fn idle_threshold(&self) -> Duration {
        Duration::from_millis(self.idle_threshold_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_load_state_event_names() {
        assert_eq!(LoadState::Load.event_name(), "load");
        assert_eq!(LoadState::DomContentLoaded.event_name(), "DOMContentLoaded");
        assert_eq!(LoadState::NetworkIdle.to_string(), "networkidle");
    }

    #[test]
    fn test_ready_state_mapping() {
        assert!(LoadState::DomContentLoaded.satisfied_by_ready_state("interactive"));
        assert!(LoadState::DomContentLoaded.satisfied_by_ready_state("complete"));
        assert!(!LoadState::DomContentLoaded.satisfied_by_ready_state("loading"));
        assert!(!LoadState::Load.satisfied_by_ready_state("interactive"));
        assert!(LoadState::NetworkIdle.satisfied_by_ready_state("complete"));
    }

    #[test]
    fn test_wait_options_builder() {
        let opts = WaitOptions::new()
            .with_timeout(1_000)
            .with_wait_until(LoadState::NetworkIdle)
            .with_idle_threshold(250);
        assert_eq!(opts.timeout(), Duration::from_secs(1));
        assert_eq!(opts.wait_until, LoadState::NetworkIdle);
        assert_eq!(opts.idle_threshold(), Duration::from_millis(250));
        assert_eq!(opts.poll_interval(), Duration::from_millis(50));
    }
}
