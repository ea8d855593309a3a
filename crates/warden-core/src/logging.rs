//! Tracing bootstrap.
//!
//! Hosts embed the pipeline inside their own process, so logging is opt-in:
//! nothing is installed unless the host calls [`init_logging`].

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::errors::CoreError;

/// Install a global tracing subscriber.
///
/// `default_level` seeds the filter (e.g. `"info"`, `"warden_runtime=debug"`)
/// and is overridden by `RUST_LOG` when set. Errors if a subscriber is
/// already installed.
pub fn init_logging(default_level: &str) -> Result<(), CoreError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| CoreError::Logging(e.to_string()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| CoreError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_errors() {
        // First call may fail if another test installed a subscriber; the
        // second call must fail either way.
        let _ = init_logging("info");
        assert!(init_logging("info").is_err());
    }
}
