//! Settings loading: defaults → user file deep-merge → env overrides.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::WardenSettings;

/// Path of the user settings file (`~/.warden/settings.json`).
pub fn settings_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").ok_or(SettingsError::NoHome)?;
    Ok(PathBuf::from(home).join(".warden").join("settings.json"))
}

/// Deep-merge `overlay` into `base`.
///
/// Objects merge recursively; any other JSON type in `overlay` replaces the
/// corresponding `base` value. Arrays replace wholesale (no element merge).
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => {
                        let _ = base_map.insert(key.clone(), overlay_val.clone());
                    }
                }
            }
        }
        (base_slot, _) => *base_slot = overlay.clone(),
    }
}

/// Load settings from the default path with env overrides applied.
///
/// A missing file is not an error — compiled defaults are used.
pub fn load_settings() -> Result<WardenSettings> {
    let path = settings_path()?;
    load_settings_from_path(&path)
}

/// Load settings from `path`, deep-merged over defaults, then apply
/// `WARDEN_*` env overrides and validate.
pub fn load_settings_from_path(path: &Path) -> Result<WardenSettings> {
    let mut merged = serde_json::to_value(WardenSettings::default())?;

    if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&raw)?;
        deep_merge(&mut merged, &user);
    }

    let mut settings: WardenSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate();
    Ok(settings)
}

/// Apply `WARDEN_*` environment variable overrides (highest priority).
fn apply_env_overrides(settings: &mut WardenSettings) {
    fn env_f64(name: &str) -> Option<f64> {
        std::env::var(name).ok().and_then(|v| match v.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::warn!(var = name, value = %v, "ignoring unparseable env override");
                None
            }
        })
    }
    fn env_bool(name: &str) -> Option<bool> {
        std::env::var(name)
            .ok()
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
    }

    if let Some(v) = env_f64("WARDEN_BUDGET_STANDARD_MS") {
        settings.budget.standard_ms = Some(v);
    }
    if let Some(v) = env_f64("WARDEN_BUDGET_MONITORING_MS") {
        settings.budget.monitoring_ms = Some(v);
    }
    if let Some(v) = env_bool("WARDEN_BLOCK_ALL_RULES") {
        settings.rules.block_all_rules = v;
    }
    if let Some(v) = env_bool("WARDEN_CALL_COUNT_SAMPLING") {
        settings.rules.call_count_sampling = v;
    }
    if let Ok(v) = std::env::var("WARDEN_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn deep_merge_nested_objects() {
        let mut base = json!({"budget": {"standardMs": 30.0, "monitoringMs": 10.0}});
        let overlay = json!({"budget": {"standardMs": 5.0}});
        deep_merge(&mut base, &overlay);
        assert_eq!(base["budget"]["standardMs"], 5.0);
        assert_eq!(base["budget"]["monitoringMs"], 10.0);
    }

    #[test]
    fn deep_merge_adds_missing_keys() {
        let mut base = json!({"a": 1});
        deep_merge(&mut base, &json!({"b": {"c": 2}}));
        assert_eq!(base["a"], 1);
        assert_eq!(base["b"]["c"], 2);
    }

    #[test]
    fn deep_merge_scalar_replaces() {
        let mut base = json!({"a": {"deep": true}});
        deep_merge(&mut base, &json!({"a": 3}));
        assert_eq!(base["a"], 3);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert!(settings.budget.standard_ms.is_none());
    }

    #[test]
    fn user_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, r#"{{"rules":{{"blockAllRules":true}}}}"#).unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert!(settings.rules.block_all_rules);
        // Untouched sections keep defaults
        assert_eq!(settings.rules.exception_cap_max_failures, 5);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }
}
