//! Precondition Filter — cheap eligibility check before a rule body runs.
//!
//! Deliberately cheaper than any rule body: a disabled flag load plus an
//! optional host-supplied predicate. Runs before any per-callback budget
//! is debited (the phase-level bracket already covers its cost).

use warden_core::rules::Phase;

use crate::session::Session;
use crate::types::{CallEnv, CallbackDescriptor};

/// Whether `descriptor` is eligible to run for this call.
///
/// `false` when the rule is disabled or its declared precondition over the
/// call arguments/return value/owner/session is not met.
pub fn fills_preconditions(
    descriptor: &CallbackDescriptor,
    phase: Phase,
    env: &CallEnv,
    session: &Session,
) -> bool {
    if !descriptor.rule.is_enabled() {
        return false;
    }
    match &descriptor.precondition {
        Some(precondition) => precondition(phase, env, session),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use warden_core::rules::{Rule, RulePurpose};

    use crate::types::{CallbackFn, PreconditionFn, RuleOutcome};

    fn descriptor(rule: Rule) -> CallbackDescriptor {
        let body: CallbackFn = Arc::new(|_, _, _| Ok(RuleOutcome::none()));
        CallbackDescriptor::new(Arc::new(rule), body)
    }

    #[test]
    fn enabled_rule_without_precondition_passes() {
        let d = descriptor(Rule::new("r", "p", RulePurpose::Protection));
        let session = Session::degraded();
        assert!(fills_preconditions(
            &d,
            Phase::Before,
            &CallEnv::default(),
            &session
        ));
    }

    #[test]
    fn disabled_rule_is_filtered() {
        let rule = Rule::new("r", "p", RulePurpose::Protection);
        rule.set_enabled(false);
        let d = descriptor(rule);
        let session = Session::degraded();
        assert!(!fills_preconditions(
            &d,
            Phase::Before,
            &CallEnv::default(),
            &session
        ));
    }

    #[test]
    fn precondition_sees_call_arguments() {
        let pre: PreconditionFn =
            Arc::new(|_, env, _| env.args.first() == Some(&json!("interesting")));
        let d = descriptor(Rule::new("r", "p", RulePurpose::Protection)).with_precondition(pre);
        let session = Session::degraded();

        let hit = CallEnv::entering(vec![json!("interesting")], json!(null));
        let miss = CallEnv::entering(vec![json!("boring")], json!(null));
        assert!(fills_preconditions(&d, Phase::Before, &hit, &session));
        assert!(!fills_preconditions(&d, Phase::Before, &miss, &session));
    }

    #[test]
    fn precondition_sees_phase() {
        let pre: PreconditionFn = Arc::new(|phase, _, _| phase == Phase::After);
        let d = descriptor(Rule::new("r", "p", RulePurpose::Protection)).with_precondition(pre);
        let session = Session::degraded();
        let env = CallEnv::default();
        assert!(fills_preconditions(&d, Phase::After, &env, &session));
        assert!(!fills_preconditions(&d, Phase::Before, &env, &session));
    }
}
