//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production default values. Types carry
//! `#[serde(default)]` so partial JSON is accepted — missing fields get
//! their default value during deserialization.

use serde::{Deserialize, Serialize};

/// Root settings type for the warden pipeline.
///
/// Loaded from `~/.warden/settings.json` with defaults applied for missing
/// fields; `WARDEN_*` environment variables override specific values.
///
/// # JSON Format
///
/// ```json
/// {
///   "budget": { "standardMs": 30.0, "monitoringMs": 10.0 },
///   "rules": { "blockAllRules": false }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WardenSettings {
    /// Per-request time budgets.
    pub budget: BudgetSettings,
    /// Rule dispatch behavior.
    pub rules: RuleSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl WardenSettings {
    /// Correct invalid values in place rather than rejecting the file.
    pub fn validate(&mut self) {
        fn clamp_budget(val: &mut Option<f64>, name: &str) {
            if let Some(v) = val.as_mut()
                && *v < 0.0
            {
                tracing::warn!("{name} is negative ({v}), treating as 0");
                *v = 0.0;
            }
        }
        clamp_budget(&mut self.budget.standard_ms, "budget.standardMs");
        clamp_budget(&mut self.budget.monitoring_ms, "budget.monitoringMs");

        if self.rules.exception_cap_max_failures == 0 {
            tracing::warn!("rules.exceptionCapMaxFailures must be >= 1, correcting");
            self.rules.exception_cap_max_failures = 1;
        }
    }
}

/// Per-request time budgets, in milliseconds. Absent means unlimited.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BudgetSettings {
    /// Budget shared by protection-purpose rules for one request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard_ms: Option<f64>,
    /// Budget shared by monitoring-purpose rules for one request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitoring_ms: Option<f64>,
}

/// Rule dispatch behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSettings {
    /// Force blocking side effects even for dry-run (`test`) rules.
    pub block_all_rules: bool,
    /// Faults tolerated per rule inside the cap window before auto-disable.
    pub exception_cap_max_failures: u32,
    /// Exception-cap window, in seconds.
    pub exception_cap_window_secs: u64,
    /// Emit aggregated call-count observations instead of per-call logging.
    pub call_count_sampling: bool,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            block_all_rules: false,
            exception_cap_max_failures: 5,
            exception_cap_window_secs: 60,
            call_count_sampling: true,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default tracing filter, overridden by `RUST_LOG`.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = WardenSettings::default();
        assert!(s.budget.standard_ms.is_none());
        assert!(!s.rules.block_all_rules);
        assert_eq!(s.rules.exception_cap_max_failures, 5);
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: WardenSettings =
            serde_json::from_str(r#"{"budget":{"standardMs":25.5}}"#).unwrap();
        assert_eq!(s.budget.standard_ms, Some(25.5));
        assert!(s.budget.monitoring_ms.is_none());
        assert!(s.rules.call_count_sampling);
    }

    #[test]
    fn validate_corrects_negative_budget() {
        let mut s = WardenSettings::default();
        s.budget.standard_ms = Some(-3.0);
        s.validate();
        assert_eq!(s.budget.standard_ms, Some(0.0));
    }

    #[test]
    fn validate_corrects_zero_cap() {
        let mut s = WardenSettings::default();
        s.rules.exception_cap_max_failures = 0;
        s.validate();
        assert_eq!(s.rules.exception_cap_max_failures, 1);
    }
}
