//! Error types for vahan-harvest

use thiserror::Error;

use crate::role::Role;

/// Result type for vahan-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for vahan-harvest
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to launch Chrome
    #[error("Failed to launch Chrome: {0}")]
    Launch(String),

    /// Transport error
    #[error("Transport error: {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// CDP protocol error
    #[error("CDP error in {method}: {message} (code {code})")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    /// Script evaluation raised inside the page
    #[error("JavaScript error: {0}")]
    Script(String),

    /// Navigation error
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// Element not found in DOM
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Element exists in DOM but is not rendered
    #[error("Element not visible: '{selector}' exists in DOM but is not rendered")]
    ElementNotVisible { selector: String },

    /// Element exists but a click would not reach it
    #[error("Element not interactive: '{selector}' is {reason}")]
    ElementNotInteractive { selector: String, reason: String },

    /// No locator strategy resolved the role
    #[error("No control found for role '{role}'")]
    NotFound { role: Role },

    /// Every rung of the click ladder failed
    #[error("Could not click control for role '{role}': {reason}")]
    Interaction {
        role: Role,
        reason: String,
        markup: String,
    },

    /// Option panel never became visible
    #[error("Option panel for role '{role}' not visible")]
    PanelNotFound { role: Role },

    /// No visible option matched the requested text
    #[error("No option for role '{role}' matches '{target}' (saw {options:?})")]
    NoMatchingOption {
        role: Role,
        target: String,
        options: Vec<String>,
    },

    /// Liveness probe failed or no session could be created
    #[error("Browser session lost: {0}")]
    SessionLost(String),

    /// No completed download appeared in time
    #[error("No download appeared in {dir} within {waited_ms}ms")]
    DownloadTimeout { waited_ms: u64, dir: String },

    /// Configuration file missing or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Decode error (e.g., base64)
    #[error("Decode error: {0}")]
    Decode(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Chrome not found
    #[error("Chrome not found")]
    ChromeNotFound,

    /// Retry exhausted
    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// A dashboard task is already running
    #[error("Task '{0}' is already running")]
    TaskRunning(String),
}

impl Error {
    /// Create a transport error with context
    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
            source: None,
        }
    }

    /// Create a transport error with IO source
    pub fn transport_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source: Some(source),
        }
    }

    /// Create a CDP error with full context
    pub fn cdp(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Create an element not visible error
    pub fn not_visible(selector: impl Into<String>) -> Self {
        Self::ElementNotVisible {
            selector: selector.into(),
        }
    }

    /// Create an element not interactive error
    pub fn not_interactive(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ElementNotInteractive {
            selector: selector.into(),
            reason: reason.into(),
        }
    }

    /// Convert CDP box model errors to friendlier ElementNotVisible
    pub fn clarify(self, selector: &str) -> Self {
        match &self {
            Error::Cdp { message, .. } if message.contains("box model") => {
                Error::not_visible(selector)
            }
            _ => self,
        }
    }

    /// True when the browser connection itself is gone.
    ///
    /// A closed response channel or a failed socket write means Chrome exited
    /// or the tab crashed; the caller has to replace the whole session.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            Error::SessionLost(_) | Error::Transport { .. } | Error::Launch(_)
        )
    }

    /// True for failures that only cost the current control or work item.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::Interaction { .. }
                | Error::PanelNotFound { .. }
                | Error::NoMatchingOption { .. }
                | Error::ElementNotFound(_)
                | Error::ElementNotVisible { .. }
                | Error::ElementNotInteractive { .. }
                | Error::DownloadTimeout { .. }
                | Error::Script(_)
                | Error::Cdp { .. }
                | Error::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_model_errors_clarify_to_not_visible() {
        let err = Error::cdp("DOM.getBoxModel", -32000, "Could not compute box model.");
        let err = err.clarify("#yaxisVar");
        assert!(matches!(err, Error::ElementNotVisible { ref selector } if selector == "#yaxisVar"));
    }

    #[test]
    fn test_transport_failures_count_as_session_loss() {
        assert!(Error::transport("Response channel closed").is_session_lost());
        assert!(Error::SessionLost("Runtime.evaluate got no response within 30000ms".into()).is_session_lost());
        assert!(!Error::NotFound { role: Role::State }.is_session_lost());
    }

    #[test]
    fn test_locator_and_download_failures_are_recoverable() {
        assert!(Error::NotFound { role: Role::Month }.is_recoverable());
        assert!(Error::DownloadTimeout {
            waited_ms: 15_000,
            dir: "downloads".into()
        }
        .is_recoverable());
        assert!(!Error::SessionLost("probe failed".into()).is_recoverable());
        assert!(!Error::Config("missing".into()).is_recoverable());
    }
}
