//! Shared dispatch types: call snapshots, callback descriptors, outcomes.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

use serde_json::Value;
use warden_core::errors::CallbackError;
use warden_core::rules::{ExceptionCap, Phase, Rule, Status};
use warden_core::telemetry::{DataPoint, ExceptionEvent, Observation};

use crate::session::Session;

/// Snapshot of one monitored invocation, handed to every rule callback.
#[derive(Clone, Debug, Default)]
pub struct CallEnv {
    /// Arguments of the monitored call.
    pub args: Vec<Value>,
    /// Return value (AFTER phases) or fault description (ON-FAILURE).
    /// `Null` during BEFORE.
    pub value: Value,
    /// Object the monitored method was invoked on, when any.
    pub owner: Value,
}

impl CallEnv {
    /// Environment for a BEFORE dispatch.
    pub fn entering(args: Vec<Value>, owner: Value) -> Self {
        Self {
            args,
            value: Value::Null,
            owner,
        }
    }

    /// The same call with `value` replaced (AFTER / ON-FAILURE dispatch).
    pub fn with_value(&self, value: Value) -> Self {
        Self {
            args: self.args.clone(),
            value,
            owner: self.owner.clone(),
        }
    }
}

/// A rule callback body.
///
/// Pure function of the call snapshot, the session, and the remaining
/// budget in milliseconds (advisory — the body is expected to self-enforce
/// it). Faults are returned, never panicked.
pub type CallbackFn =
    Arc<dyn Fn(&CallEnv, &Session, f64) -> Result<RuleOutcome, CallbackError> + Send + Sync>;

/// A rule-declared precondition: cheap eligibility check over the call.
pub type PreconditionFn = Arc<dyn Fn(Phase, &CallEnv, &Session) -> bool + Send + Sync>;

/// Rule-provided attack evidence; the router synthesizes the full
/// [`warden_core::telemetry::Attack`] from this plus the rule's flags.
#[derive(Clone, Debug, Default)]
pub struct AttackIntent {
    /// Payload describing the match.
    pub infos: Value,
}

/// One rule bound to one callback body for one call site.
pub struct CallbackDescriptor {
    /// The rule this callback belongs to.
    pub rule: Arc<Rule>,
    /// The callback body.
    pub body: CallbackFn,
    /// Mandatory check: runs even with a zero budget.
    pub no_budget: bool,
    /// Rule-declared precondition, checked before the body runs and before
    /// any per-callback budget is debited.
    pub precondition: Option<PreconditionFn>,
    /// Per-phase invocation counters for call-count sampling.
    pub(crate) call_counts: [AtomicU32; 4],
}

impl CallbackDescriptor {
    /// Descriptor with no precondition and budget enforcement on.
    pub fn new(rule: Arc<Rule>, body: CallbackFn) -> Self {
        Self {
            rule,
            body,
            no_budget: false,
            precondition: None,
            call_counts: Default::default(),
        }
    }

    /// Mark this callback mandatory (runs on a zero budget).
    pub fn mandatory(mut self) -> Self {
        self.no_budget = true;
        self
    }

    /// Attach a precondition.
    pub fn with_precondition(mut self, precondition: PreconditionFn) -> Self {
        self.precondition = Some(precondition);
        self
    }
}

/// Exception cap sized from the loaded settings.
pub fn default_exception_cap() -> ExceptionCap {
    let settings = warden_settings::get_settings();
    ExceptionCap::new(
        settings.rules.exception_cap_max_failures,
        Duration::from_secs(settings.rules.exception_cap_window_secs),
    )
}

impl std::fmt::Debug for CallbackDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDescriptor")
            .field("rule", &self.rule.name)
            .field("no_budget", &self.no_budget)
            .field("has_precondition", &self.precondition.is_some())
            .finish()
    }
}

/// Result of one rule callback for one phase. Produced once, consumed once
/// by the Result Aggregator.
#[derive(Clone, Debug, Default)]
pub struct RuleOutcome {
    /// Control-flow status, if the rule wants one.
    pub status: Option<Status>,
    /// Override return value accompanying a SKIP/RAISE.
    pub new_return_value: Option<Value>,
    /// Counter observations to route.
    pub observations: Vec<Observation>,
    /// Opaque data points to route.
    pub data_points: Vec<DataPoint>,
    /// Attack evidence, if the rule detected one.
    pub attack: Option<AttackIntent>,
    /// Contained fault to route as exception telemetry.
    pub exception: Option<ExceptionEvent>,
    /// Mark the active record as "must report full payload".
    pub report_payload: bool,
    /// Attached by the executor: the rule that produced this outcome.
    pub rule: Option<Arc<Rule>>,
    /// Attached by the executor: the original call parameters.
    pub call: Option<CallEnv>,
    /// Session override — takes precedence over the dispatch session when
    /// the callback fired before tracing context was established.
    pub session: Option<Arc<Session>>,
}

impl RuleOutcome {
    /// Empty outcome: no status, no telemetry.
    pub fn none() -> Self {
        Self::default()
    }

    /// SKIP with an override return value.
    pub fn skip(new_return_value: Value) -> Self {
        Self {
            status: Some(Status::Skip),
            new_return_value: Some(new_return_value),
            ..Self::default()
        }
    }

    /// RAISE with attack evidence.
    pub fn raise(infos: Value) -> Self {
        Self {
            status: Some(Status::Raise),
            attack: Some(AttackIntent { infos }),
            ..Self::default()
        }
    }

    /// Whether this outcome carries nothing to route and no status.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.new_return_value.is_none()
            && self.observations.is_empty()
            && self.data_points.is_empty()
            && self.attack.is_none()
            && self.exception.is_none()
            && !self.report_payload
    }
}

/// The single control action arbitrated from one phase's outcomes.
///
/// Semantically always a "skip": the original operation must not run, or
/// its result must be replaced. A RAISE degrades to this once the
/// drop-request side effect has been performed.
#[derive(Clone, Debug, PartialEq)]
pub struct Action {
    /// Replacement return value, when the rule supplied one.
    pub new_return_value: Option<Value>,
    /// Name of the rule whose status won.
    pub rule_name: String,
    /// Whether this action originated from a RAISE (request was dropped).
    pub raised: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_core::rules::RulePurpose;

    #[test]
    fn empty_outcome_is_empty() {
        assert!(RuleOutcome::none().is_empty());
    }

    #[test]
    fn skip_outcome_carries_value() {
        let o = RuleOutcome::skip(json!("replacement"));
        assert_eq!(o.status, Some(Status::Skip));
        assert_eq!(o.new_return_value, Some(json!("replacement")));
        assert!(!o.is_empty());
    }

    #[test]
    fn raise_outcome_carries_attack() {
        let o = RuleOutcome::raise(json!({"found": "x"}));
        assert_eq!(o.status, Some(Status::Raise));
        assert!(o.attack.is_some());
    }

    #[test]
    fn call_env_with_value_keeps_args() {
        let env = CallEnv::entering(vec![json!(1), json!(2)], Value::Null);
        let after = env.with_value(json!("ret"));
        assert_eq!(after.args, env.args);
        assert_eq!(after.value, json!("ret"));
    }

    #[test]
    fn descriptor_builders() {
        let rule = Arc::new(Rule::new("r", "p", RulePurpose::Protection));
        let body: CallbackFn = Arc::new(|_, _, _| Ok(RuleOutcome::none()));
        let d = CallbackDescriptor::new(rule, body).mandatory();
        assert!(d.no_budget);
        assert!(d.precondition.is_none());
    }

    #[test]
    fn default_cap_tolerates_failures_below_the_configured_threshold() {
        let mut cap = default_exception_cap();
        assert!(cap.tick(true));
        assert!(!cap.is_disabled());
    }
}
