//! Error types shared across the warden crates.

use thiserror::Error;

/// Fault returned (or caught) from a rule callback body.
///
/// Never propagates past the Callback Executor: it is converted into an
/// exception telemetry entry and an exception-cap tick.
#[derive(Debug, Error)]
#[error("callback fault: {message}")]
pub struct CallbackError {
    /// Fault description.
    pub message: String,
    /// Stack trace captured where the fault surfaced, when available.
    pub backtrace: Vec<String>,
}

impl CallbackError {
    /// Fault with a message and no captured backtrace.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            backtrace: Vec::new(),
        }
    }
}

/// Errors from the foundation crate itself.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The tracing subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_error_display() {
        let err = CallbackError::new("boom");
        assert_eq!(err.to_string(), "callback fault: boom");
    }
}
