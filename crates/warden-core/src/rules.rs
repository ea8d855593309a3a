//! Rule model — the unit of security logic the pipeline dispatches.
//!
//! A [`Rule`] is an opaque descriptor from the pipeline's point of view:
//! authoring and compilation happen elsewhere. The pipeline reads its flags,
//! debits the budget class matching its [`RulePurpose`], and mutates exactly
//! one thing in place: `enabled`, driven by the [`ExceptionCap`] auto-disable
//! policy. Re-enabling only happens through a fresh rule-set snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Closed enums
// ─────────────────────────────────────────────────────────────────────────────

/// What a rule is for. Selects which budget class its execution debits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RulePurpose {
    /// Blocks or overrides attacks. Debits the standard budget.
    Protection,
    /// Observes only. Debits the monitoring budget so it never starves
    /// protection rules (and vice versa).
    Monitoring,
    /// Introspection for the replay path. Skipped during normal dispatch
    /// of a replayed request; unlimited budget when replay invokes it.
    Reveal,
}

/// Dispatch stage around a monitored call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Runs before the original operation; may skip it entirely.
    Before,
    /// Runs when the original operation faults; may replace the fault
    /// with an override return value.
    OnFailure,
    /// Runs after a successful synchronous completion.
    After,
    /// Continuation scheduled on an asynchronous settlement.
    AsyncAfter,
}

impl Phase {
    /// Short label used in budget attribution and call-count observations.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Before => "pre",
            Phase::OnFailure => "fail",
            Phase::After => "post",
            Phase::AsyncAfter => "async_post",
        }
    }

    /// Dense index, for per-phase counter arrays.
    pub fn index(self) -> usize {
        match self {
            Phase::Before => 0,
            Phase::OnFailure => 1,
            Phase::After => 2,
            Phase::AsyncAfter => 3,
        }
    }
}

/// Control-flow status a rule may attach to its outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Skip the original operation (or replace its result).
    Skip,
    /// Attack detected: drop the request, then degrade to a skip.
    Raise,
}

// ─────────────────────────────────────────────────────────────────────────────
// Exception cap
// ─────────────────────────────────────────────────────────────────────────────

/// Windowed auto-disable policy for a faulty rule.
///
/// Counts callback faults inside a sliding window; once the threshold is
/// crossed the cap latches disabled and [`tick`](ExceptionCap::tick) returns
/// `false` forever after. Only a fresh rule-set snapshot re-enables the rule.
#[derive(Debug)]
pub struct ExceptionCap {
    max_failures: u32,
    window: Duration,
    failures: u32,
    window_start: Option<Instant>,
    disabled: bool,
}

impl ExceptionCap {
    /// Cap that disables the rule after `max_failures` faults within `window`.
    pub fn new(max_failures: u32, window: Duration) -> Self {
        Self {
            max_failures: max_failures.max(1),
            window,
            failures: 0,
            window_start: None,
            disabled: false,
        }
    }

    /// Record one execution and return whether the rule stays enabled.
    ///
    /// `failed = false` ticks never re-enable a latched cap.
    pub fn tick(&mut self, failed: bool) -> bool {
        if self.disabled {
            return false;
        }
        if failed {
            let now = Instant::now();
            match self.window_start {
                Some(start) if now.duration_since(start) <= self.window => {
                    self.failures += 1;
                }
                _ => {
                    self.window_start = Some(now);
                    self.failures = 1;
                }
            }
            if self.failures >= self.max_failures {
                self.disabled = true;
                return false;
            }
        }
        true
    }

    /// Whether the cap has latched disabled.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rule
// ─────────────────────────────────────────────────────────────────────────────

/// One security rule, as installed by a rule-set snapshot.
///
/// Shared behind `Arc` inside immutable phase lists. All fields are fixed at
/// snapshot construction except `enabled`, which the Callback Executor writes
/// back from the exception cap.
#[derive(Debug)]
pub struct Rule {
    /// Rule name, unique within its pack.
    pub name: String,
    /// Identifier of the rules pack this rule came from.
    pub rules_pack_id: String,
    /// Budget class / dispatch category.
    pub purpose: RulePurpose,
    /// Dry-run: the rule reports but never blocks (unless the global
    /// block-all override is set).
    pub test: bool,
    /// Whether a raised attack should block (carried as attack metadata).
    pub block: bool,
    /// Beta rule, reported as such in attack metadata.
    pub beta: bool,
    /// Learning-mode rule, reported as such in attack metadata.
    pub learning: bool,
    /// Emit one aggregated counter observation every N invocations per
    /// phase instead of logging every call.
    pub call_count_interval: Option<u32>,
    /// Auto-disable policy, ticked once per executed callback.
    pub exception_cap: Option<Mutex<ExceptionCap>>,
    enabled: AtomicBool,
}

impl Rule {
    /// New enabled rule with all flags off.
    pub fn new(
        name: impl Into<String>,
        rules_pack_id: impl Into<String>,
        purpose: RulePurpose,
    ) -> Self {
        Self {
            name: name.into(),
            rules_pack_id: rules_pack_id.into(),
            purpose,
            test: false,
            block: false,
            beta: false,
            learning: false,
            call_count_interval: None,
            exception_cap: None,
            enabled: AtomicBool::new(true),
        }
    }

    /// Whether the rule is currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Write back the enabled state (exception cap outcome).
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}
