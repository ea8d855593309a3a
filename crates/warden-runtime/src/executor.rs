//! Callback Executor — runs one rule body under fault isolation.
//!
//! Budget attribution, precondition gating, exception-cap ticking, and
//! call-count sampling all happen here. A fault from one rule never aborts
//! the remaining rules in the list: it becomes exception telemetry on the
//! returned (otherwise empty) outcome.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use metrics::counter;
use tracing::{debug, warn};
use warden_core::rules::{Phase, RulePurpose};
use warden_core::telemetry::{ExceptionEvent, Observation};

use crate::budget::Budget;
use crate::filter::fills_preconditions;
use crate::session::Session;
use crate::types::{CallEnv, CallbackDescriptor, RuleOutcome};

/// Metric category for sampled call counts.
pub const CALL_COUNTS_CATEGORY: &str = "call_counts";

/// Execute one callback for one phase.
///
/// `budget_override` replaces purpose-based budget selection (the replay
/// path passes an unlimited budget). Always returns an outcome; a fault is
/// reported through the outcome's `exception` field, never propagated.
pub fn run_one(
    descriptor: &CallbackDescriptor,
    env: &CallEnv,
    session: &Arc<Session>,
    phase: Phase,
    sampling: bool,
    budget_override: Option<&Budget>,
) -> RuleOutcome {
    let rule = &descriptor.rule;

    // 1. Disabled rules cost nothing: no telemetry, no time debited.
    if !rule.is_enabled() {
        return RuleOutcome::none();
    }

    // 2. Purpose selects the budget class.
    let effective: &Budget = budget_override.unwrap_or_else(|| match rule.purpose {
        RulePurpose::Monitoring => session.monitoring_budget.as_ref(),
        RulePurpose::Protection | RulePurpose::Reveal => session.budget.as_ref(),
    });

    // 3. Exhausted budget is a soft skip, unless the check is mandatory.
    if effective.is_exhausted() && !descriptor.no_budget {
        counter!("rule_budget_skips_total", "rule" => rule.name.clone()).increment(1);
        return RuleOutcome::none();
    }

    // 4. Cheap eligibility gate, before any per-callback debit.
    if !fills_preconditions(descriptor, phase, env, session) {
        return RuleOutcome::none();
    }

    // 5. Bracketed execution with the remaining budget as advisory timeout.
    effective.start();
    let result = (descriptor.body)(env, session, effective.remaining());
    effective.stop(&rule.name, phase);

    counter!("rule_executions_total", "rule" => rule.name.clone()).increment(1);

    let mut outcome = match result {
        Ok(mut outcome) => {
            if let Some(cap) = &rule.exception_cap {
                rule.set_enabled(cap.lock().tick(false));
            }
            let _ = outcome.rule.get_or_insert_with(|| Arc::clone(rule));
            let _ = outcome.session.get_or_insert_with(|| Arc::clone(session));
            let _ = outcome.call.get_or_insert_with(|| env.clone());
            outcome
        }
        Err(fault) => {
            // 6. Contain the fault: telemetry + cap tick, remaining rules
            // in the list are unaffected.
            warn!(
                rule = %rule.name,
                phase = phase.as_str(),
                error = %fault,
                "rule callback faulted"
            );
            counter!("rule_faults_total", "rule" => rule.name.clone()).increment(1);
            if let Some(cap) = &rule.exception_cap {
                let enabled = cap.lock().tick(true);
                if !enabled {
                    debug!(rule = %rule.name, "rule auto-disabled by exception cap");
                }
                rule.set_enabled(enabled);
            }
            RuleOutcome {
                exception: Some(ExceptionEvent {
                    message: fault.message,
                    rule_name: Some(rule.name.clone()),
                    phase: Some(phase.as_str().to_string()),
                    time: Utc::now(),
                }),
                rule: Some(Arc::clone(rule)),
                session: Some(Arc::clone(session)),
                ..RuleOutcome::none()
            }
        }
    };

    if sampling {
        sample_call_count(descriptor, phase, &mut outcome);
    }
    outcome
}

/// Every `call_count_interval`-th executed invocation emits one aggregated
/// counter observation instead of logging every call.
fn sample_call_count(descriptor: &CallbackDescriptor, phase: Phase, outcome: &mut RuleOutcome) {
    let Some(interval) = descriptor.rule.call_count_interval else {
        return;
    };
    if interval == 0 {
        return;
    }
    let counter = &descriptor.call_counts[phase.index()];
    let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
    if count >= interval {
        counter.store(0, Ordering::Relaxed);
        outcome.observations.push(Observation::new(
            CALL_COUNTS_CATEGORY,
            format!(
                "{}/{}/{}",
                descriptor.rule.rules_pack_id,
                descriptor.rule.name,
                phase.as_str()
            ),
            f64::from(interval),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use warden_core::errors::CallbackError;
    use warden_core::rules::{ExceptionCap, Rule, Status};

    use crate::session::RequestHandle;
    use crate::types::CallbackFn;

    struct Req;
    impl RequestHandle for Req {
        fn identity(&self) -> Option<String> {
            Some("req-1".into())
        }
    }

    fn session(standard_ms: f64) -> Arc<Session> {
        Arc::new(Session::for_request(
            Arc::new(Req),
            None,
            Budget::new(standard_ms),
            Budget::new(standard_ms),
        ))
    }

    fn counting_body(calls: Arc<AtomicUsize>) -> CallbackFn {
        Arc::new(move |_, _, _| {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            Ok(RuleOutcome::none())
        })
    }

    #[test]
    fn disabled_rule_runs_nothing() {
        let rule = Rule::new("r", "p", RulePurpose::Protection);
        rule.set_enabled(false);
        let calls = Arc::new(AtomicUsize::new(0));
        let d = CallbackDescriptor::new(Arc::new(rule), counting_body(Arc::clone(&calls)));

        let outcome = run_one(&d, &CallEnv::default(), &session(100.0), Phase::Before, false, None);
        assert!(outcome.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exhausted_budget_soft_skips() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = CallbackDescriptor::new(
            Arc::new(Rule::new("r", "p", RulePurpose::Protection)),
            counting_body(Arc::clone(&calls)),
        );
        let session = session(0.0);

        let outcome = run_one(&d, &CallEnv::default(), &session, Phase::Before, false, None);
        assert!(outcome.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // No time debited either.
        assert_eq!(session.budget.remaining(), 0.0);
    }

    #[test]
    fn mandatory_callback_runs_on_zero_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = CallbackDescriptor::new(
            Arc::new(Rule::new("r", "p", RulePurpose::Protection)),
            counting_body(Arc::clone(&calls)),
        )
        .mandatory();

        let _ = run_one(&d, &CallEnv::default(), &session(0.0), Phase::Before, false, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn monitoring_purpose_uses_monitoring_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = CallbackDescriptor::new(
            Arc::new(Rule::new("r", "p", RulePurpose::Monitoring)),
            counting_body(Arc::clone(&calls)),
        );
        // Standard exhausted, monitoring available.
        let s = Arc::new(Session::for_request(
            Arc::new(Req),
            None,
            Budget::zero(),
            Budget::new(100.0),
        ));

        let _ = run_one(&d, &CallEnv::default(), &s, Phase::Before, false, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn budget_override_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = CallbackDescriptor::new(
            Arc::new(Rule::new("r", "p", RulePurpose::Reveal)),
            counting_body(Arc::clone(&calls)),
        );
        let unlimited = Budget::infinite();

        let _ = run_one(
            &d,
            &CallEnv::default(),
            &session(0.0),
            Phase::Before,
            false,
            Some(&unlimited),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn success_attaches_rule_session_and_call() {
        let body: CallbackFn = Arc::new(|_, _, _| Ok(RuleOutcome::skip(json!(1))));
        let d = CallbackDescriptor::new(Arc::new(Rule::new("r", "p", RulePurpose::Protection)), body);
        let s = session(100.0);
        let env = CallEnv::entering(vec![json!("a")], json!(null));

        let outcome = run_one(&d, &env, &s, Phase::Before, false, None);
        assert_eq!(outcome.rule.as_ref().unwrap().name, "r");
        assert!(outcome.session.is_some());
        assert_eq!(outcome.call.as_ref().unwrap().args, vec![json!("a")]);
        assert_matches!(outcome.status, Some(Status::Skip));
    }

    #[test]
    fn callback_sees_remaining_budget() {
        let body: CallbackFn = Arc::new(|_, _, remaining| {
            assert!(remaining > 0.0);
            assert!(remaining <= 50.0);
            Ok(RuleOutcome::none())
        });
        let d = CallbackDescriptor::new(Arc::new(Rule::new("r", "p", RulePurpose::Protection)), body);
        let _ = run_one(&d, &CallEnv::default(), &session(50.0), Phase::Before, false, None);
    }

    #[test]
    fn fault_is_contained_as_exception_outcome() {
        let body: CallbackFn = Arc::new(|_, _, _| Err(CallbackError::new("boom")));
        let d = CallbackDescriptor::new(Arc::new(Rule::new("r", "p", RulePurpose::Protection)), body);

        let outcome = run_one(&d, &CallEnv::default(), &session(100.0), Phase::After, false, None);
        assert!(outcome.status.is_none());
        let ex = outcome.exception.as_ref().unwrap();
        assert_eq!(ex.rule_name.as_deref(), Some("r"));
        assert_eq!(ex.phase.as_deref(), Some("post"));
    }

    #[test]
    fn fault_ticks_cap_exactly_once_and_disables_at_threshold() {
        let mut rule = Rule::new("r", "p", RulePurpose::Protection);
        rule.exception_cap = Some(parking_lot::Mutex::new(ExceptionCap::new(
            2,
            Duration::from_secs(60),
        )));
        let rule = Arc::new(rule);
        let body: CallbackFn = Arc::new(|_, _, _| Err(CallbackError::new("boom")));
        let d = CallbackDescriptor::new(Arc::clone(&rule), body);
        let s = session(100.0);

        let _ = run_one(&d, &CallEnv::default(), &s, Phase::Before, false, None);
        assert!(rule.is_enabled());

        let _ = run_one(&d, &CallEnv::default(), &s, Phase::Before, false, None);
        assert!(!rule.is_enabled());

        // Disabled rule no longer executes at all.
        let outcome = run_one(&d, &CallEnv::default(), &s, Phase::Before, false, None);
        assert!(outcome.is_empty());
    }

    #[test]
    fn success_tick_does_not_reenable_latched_cap() {
        let mut rule = Rule::new("r", "p", RulePurpose::Protection);
        rule.exception_cap = Some(parking_lot::Mutex::new(ExceptionCap::new(
            1,
            Duration::from_secs(60),
        )));
        let rule = Arc::new(rule);
        let body: CallbackFn = Arc::new(|_, _, _| Err(CallbackError::new("boom")));
        let d = CallbackDescriptor::new(Arc::clone(&rule), body);
        let s = session(100.0);

        let _ = run_one(&d, &CallEnv::default(), &s, Phase::Before, false, None);
        assert!(!rule.is_enabled());
    }

    // --- Call-count sampling ---

    #[test]
    fn call_count_emits_on_exact_interval_and_resets() {
        let mut rule = Rule::new("ruleA", "packA", RulePurpose::Protection);
        rule.call_count_interval = Some(5);
        let body: CallbackFn = Arc::new(|_, _, _| Ok(RuleOutcome::none()));
        let d = CallbackDescriptor::new(Arc::new(rule), body);
        let s = session(100.0);

        for i in 1..=4 {
            let outcome = run_one(&d, &CallEnv::default(), &s, Phase::Before, true, None);
            assert!(outcome.observations.is_empty(), "no emission at call {i}");
        }
        let outcome = run_one(&d, &CallEnv::default(), &s, Phase::Before, true, None);
        assert_eq!(
            outcome.observations,
            vec![Observation::new("call_counts", "packA/ruleA/pre", 5.0)]
        );

        // Counter reset: the next four calls emit nothing again.
        for _ in 1..=4 {
            let outcome = run_one(&d, &CallEnv::default(), &s, Phase::Before, true, None);
            assert!(outcome.observations.is_empty());
        }
        let outcome = run_one(&d, &CallEnv::default(), &s, Phase::Before, true, None);
        assert_eq!(outcome.observations.len(), 1);
    }

    #[test]
    fn call_counts_are_per_phase() {
        let mut rule = Rule::new("r", "p", RulePurpose::Protection);
        rule.call_count_interval = Some(2);
        let body: CallbackFn = Arc::new(|_, _, _| Ok(RuleOutcome::none()));
        let d = CallbackDescriptor::new(Arc::new(rule), body);
        let s = session(100.0);

        let _ = run_one(&d, &CallEnv::default(), &s, Phase::Before, true, None);
        // Different phase: counter independent, still below interval.
        let outcome = run_one(&d, &CallEnv::default(), &s, Phase::After, true, None);
        assert!(outcome.observations.is_empty());
    }

    #[test]
    fn sampling_disabled_emits_nothing() {
        let mut rule = Rule::new("r", "p", RulePurpose::Protection);
        rule.call_count_interval = Some(1);
        let body: CallbackFn = Arc::new(|_, _, _| Ok(RuleOutcome::none()));
        let d = CallbackDescriptor::new(Arc::new(rule), body);

        let outcome = run_one(&d, &CallEnv::default(), &session(100.0), Phase::Before, false, None);
        assert!(outcome.observations.is_empty());
    }
}
