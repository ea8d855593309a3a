//! Settings error types.

use thiserror::Error;

/// Errors surfaced while loading or parsing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Settings file could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file is not valid JSON.
    #[error("failed to parse settings JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Home directory could not be resolved.
    #[error("could not resolve home directory")]
    NoHome,
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, SettingsError>;
