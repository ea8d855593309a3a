//! # warden-settings
//!
//! Configuration management with layered sources for the warden pipeline.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`WardenSettings::default()`]
//! 2. **User file** — `~/.warden/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `WARDEN_*` overrides (highest priority)
//!
//! The global singleton is reloadable: when the host rewrites the settings
//! file, [`reload_settings_from_path`] swaps the cached value so all
//! subsequent [`get_settings`] calls return fresh data. In-flight dispatch
//! keeps the `Arc` snapshot it already holds.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

/// Global settings singleton.
///
/// `RwLock<Option<Arc<WardenSettings>>>` rather than `OnceLock` so the
/// cached value can be swapped on reload. Reads are cheap (shared lock +
/// `Arc::clone`); writes only happen on reload, which is rare.
static SETTINGS: RwLock<Option<Arc<WardenSettings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// On first call, loads from `~/.warden/settings.json` with env overrides.
/// If loading fails, compiled defaults are used. Returns an `Arc` so callers
/// hold a consistent snapshot even if another thread reloads concurrently.
pub fn get_settings() -> Arc<WardenSettings> {
    // Fast path: read lock
    {
        let guard = SETTINGS.read();
        if let Some(ref s) = *guard {
            return Arc::clone(s);
        }
    }

    // Slow path: first access, take write lock
    let mut guard = SETTINGS.write();
    // Double-check after acquiring write lock (another thread may have initialized)
    if let Some(ref s) = *guard {
        return Arc::clone(s);
    }

    let settings = Arc::new(match load_settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            WardenSettings::default()
        }
    });
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Initialize the global settings with a specific value.
///
/// Replaces any previously cached settings. Useful for tests and for hosts
/// that assemble settings themselves.
pub fn init_settings(settings: WardenSettings) {
    let mut guard = SETTINGS.write();
    *guard = Some(Arc::new(settings));
}

/// Reload settings from a specific file path.
///
/// Reads the file, deep-merges over defaults, applies env overrides, and
/// atomically swaps the global cache. All subsequent [`get_settings`] calls
/// return the new values.
pub fn reload_settings_from_path(path: &Path) {
    let new = Arc::new(match load_settings_from_path(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, ?path, "failed to reload settings, falling back to defaults");
            WardenSettings::default()
        }
    });
    let mut guard = SETTINGS.write();
    *guard = Some(new);
    tracing::info!(?path, "settings reloaded from disk");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
