//! Result and error types for checkout-probe.

use thiserror::Error;

/// Result type for checkout-probe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Failure category an error belongs to.
///
/// Assertion failures and unexpected destinations are recorded as
/// [`crate::AssertionResult`] values and never show up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum FailureKind {
    /// Network-idle or load state not reached within budget
    NavigationTimeout,
    /// The expected new page never appeared
    CrossTabTimeout,
    /// A step against an existing page failed (query, click, screenshot)
    Step,
    /// Browser, context or page creation failed, or events cannot be observed
    ResourceAcquisition,
}

/// Errors that can occur while probing a checkout funnel
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Browser executable not found
    #[error("Browser not found. Install Chromium or set CHROMIUM_PATH")]
    BrowserNotFound,

    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunchError {
        /// Error message
        message: String,
    },

    /// Browsing context could not be created or disposed
    #[error("Browsing context error: {message}")]
    ContextError {
        /// Error message
        message: String,
    },

    /// Page error
    #[error("Page error: {message}")]
    PageError {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    NavigationError {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Load state not reached in time
    #[error("Navigation to {url} did not reach {state} within {ms}ms")]
    NavigationTimeout {
        /// URL being loaded
        url: String,
        /// Load state that was awaited
        state: crate::LoadState,
        /// Timeout in milliseconds
        ms: u64,
    },

    /// No new page appeared after the triggering action
    #[error("No new page appeared within {ms}ms")]
    NewPageTimeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Element query or extraction failed
    #[error("Element query `{selector}` failed: {message}")]
    ElementError {
        /// Selector that was evaluated
        selector: String,
        /// Error message
        message: String,
    },

    /// Input simulation error
    #[error("Input simulation failed: {message}")]
    InputError {
        /// Error message
        message: String,
    },

    /// Screenshot error
    #[error("Screenshot failed: {message}")]
    ScreenshotError {
        /// Error message
        message: String,
    },

    /// Event subscription error
    #[error("Event subscription failed: {message}")]
    SubscriptionError {
        /// Error message
        message: String,
    },

    /// Invalid state error (operation called in wrong state)
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError {
    /// Failure category of this error
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::BrowserNotFound
            | Self::BrowserLaunchError { .. }
            | Self::ContextError { .. }
            | Self::SubscriptionError { .. } => FailureKind::ResourceAcquisition,
            Self::NavigationTimeout { .. } => FailureKind::NavigationTimeout,
            Self::NewPageTimeout { .. } => FailureKind::CrossTabTimeout,
            Self::PageError { .. }
            | Self::NavigationError { .. }
            | Self::ElementError { .. }
            | Self::InputError { .. }
            | Self::ScreenshotError { .. }
            | Self::InvalidState { .. }
            | Self::Io(_) => FailureKind::Step,
        }
    }

    /// Whether this error aborts the whole run rather than one viewport pass
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind(), FailureKind::ResourceAcquisition)
    }

    /// Create a page error
    #[must_use]
    pub fn page(message: impl Into<String>) -> Self {
        Self::PageError {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::LoadState;

    #[test]
    fn test_resource_errors_are_fatal() {
        let err = ProbeError::BrowserLaunchError {
            message: "no chrome".into(),
        };
        assert_eq!(err.kind(), FailureKind::ResourceAcquisition);
        assert!(err.is_fatal());

        let err = ProbeError::SubscriptionError {
            message: "closed".into(),
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn test_timeouts_are_not_fatal() {
        let nav = ProbeError::NavigationTimeout {
            url: "http://localhost:3000/p".into(),
            state: LoadState::NetworkIdle,
            ms: 100,
        };
        assert_eq!(nav.kind(), FailureKind::NavigationTimeout);
        assert!(!nav.is_fatal());
        assert!(nav.to_string().contains("networkidle"));

        let tab = ProbeError::NewPageTimeout { ms: 250 };
        assert_eq!(tab.kind(), FailureKind::CrossTabTimeout);
        assert!(tab.to_string().contains("250ms"));
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ProbeError = io_err.into();
        assert_eq!(err.kind(), FailureKind::Step);
        assert!(err.to_string().contains("I/O"));
    }
}
