//! Rule pipeline — phase dispatch state machine and rule-set hot-swap.
//!
//! One [`RulePipeline`] exists per monitored call site. The interception
//! installer swaps in immutable [`PhaseLists`] snapshots (full replacement,
//! never incremental); in-flight dispatch iterates the snapshot it already
//! resolved, so an update never mutates a list a concurrent call is
//! walking.
//!
//! Per monitored call:
//! `BEFORE → {original} → (fault: ON-FAILURE, success: AFTER) → (async: ASYNC-AFTER)`.
//! BEFORE may short-circuit to an override value; ON-FAILURE may replace a
//! fault; AFTER/ASYNC-AFTER may replace the produced value. Budget
//! accounting brackets each phase; the same two budgets are shared and
//! cumulative across all phases of one call.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use warden_core::rules::{Phase, RulePurpose};

use crate::aggregator::ResultAggregator;
use crate::budget::Budget;
use crate::executor::run_one;
use crate::router::{TelemetryRouter, capture_backtrace};
use crate::session::Session;
use crate::types::{Action, CallEnv, CallbackDescriptor, RuleOutcome};

/// Immutable snapshot of the four ordered rule lists for one call site.
#[derive(Debug, Default)]
pub struct PhaseLists {
    before: Vec<Arc<CallbackDescriptor>>,
    on_failure: Vec<Arc<CallbackDescriptor>>,
    after: Vec<Arc<CallbackDescriptor>>,
    async_after: Vec<Arc<CallbackDescriptor>>,
    has_mandatory: bool,
}

impl PhaseLists {
    /// Snapshot from the four ordered lists; derives the mandatory flag.
    pub fn new(
        before: Vec<Arc<CallbackDescriptor>>,
        on_failure: Vec<Arc<CallbackDescriptor>>,
        after: Vec<Arc<CallbackDescriptor>>,
        async_after: Vec<Arc<CallbackDescriptor>>,
    ) -> Self {
        let has_mandatory = before
            .iter()
            .chain(&on_failure)
            .chain(&after)
            .chain(&async_after)
            .any(|d| d.no_budget);
        Self {
            before,
            on_failure,
            after,
            async_after,
            has_mandatory,
        }
    }

    /// The ordered list for `phase`.
    pub fn list(&self, phase: Phase) -> &[Arc<CallbackDescriptor>] {
        match phase {
            Phase::Before => &self.before,
            Phase::OnFailure => &self.on_failure,
            Phase::After => &self.after,
            Phase::AsyncAfter => &self.async_after,
        }
    }

    /// Whether any list carries a mandatory (`no_budget`) callback.
    pub fn has_mandatory(&self) -> bool {
        self.has_mandatory
    }
}

/// Dispatch engine for one monitored call site.
pub struct RulePipeline {
    snapshot: RwLock<Arc<PhaseLists>>,
    aggregator: ResultAggregator,
    router: Arc<TelemetryRouter>,
}

impl RulePipeline {
    /// Pipeline with an empty rule set, routing through `router`.
    pub fn new(router: Arc<TelemetryRouter>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(PhaseLists::default())),
            aggregator: ResultAggregator::new(Arc::clone(&router)),
            router,
        }
    }

    /// Replace the installed rule set (atomic snapshot swap).
    pub fn install(&self, lists: PhaseLists) {
        *self.snapshot.write() = Arc::new(lists);
        debug!("rule set snapshot installed");
    }

    /// The current snapshot. In-flight dispatch holds its own clone.
    pub fn snapshot(&self) -> Arc<PhaseLists> {
        Arc::clone(&self.snapshot.read())
    }

    /// Whether the installed set carries a mandatory callback.
    pub fn has_mandatory(&self) -> bool {
        self.snapshot.read().has_mandatory()
    }

    /// Run one phase's rule list, collecting every outcome.
    ///
    /// Returns an empty list — no telemetry, no budget debited — when the
    /// session's dispatch gate is already held (nested invocation) or when
    /// a degraded session meets a rule set with no mandatory callback.
    #[instrument(skip_all, fields(phase = phase.as_str()))]
    pub fn dispatch(&self, phase: Phase, env: &CallEnv, session: &Arc<Session>) -> Vec<RuleOutcome> {
        let snapshot = self.snapshot();
        let list = snapshot.list(phase);
        if list.is_empty() {
            return Vec::new();
        }
        if session.is_degraded() && !snapshot.has_mandatory() {
            debug!("degraded session without mandatory rules, skipping dispatch");
            return Vec::new();
        }
        let Some(_guard) = session.gate().try_acquire() else {
            debug!("nested dispatch dropped");
            return Vec::new();
        };

        let settings = warden_settings::get_settings();
        let sampling = settings.rules.call_count_sampling;

        session.budget.start_count(phase);
        let mut results = Vec::with_capacity(list.len());
        for descriptor in list {
            // Reveal rules belong to the replay path once the request is
            // marked as a replay.
            if descriptor.rule.purpose == RulePurpose::Reveal && session.replay.is_some() {
                continue;
            }
            results.push(run_one(descriptor, env, session, phase, sampling, None));
        }
        session.budget.stop_count(&session.monitoring_budget);
        results
    }

    /// Run one phase and arbitrate its outcomes into at most one action.
    pub fn dispatch_and_act(
        &self,
        phase: Phase,
        env: &CallEnv,
        session: &Arc<Session>,
    ) -> Option<Action> {
        let results = self.dispatch(phase, env, session);
        let block_all = warden_settings::get_settings().rules.block_all_rules;
        self.aggregator.act_on_results(&results, session, block_all)
    }

    /// Replay path: explicitly invoke reveal rules with an unlimited
    /// budget, redirecting their metrics into the replay's own store and
    /// recording phase markers against the replayed request.
    pub fn dispatch_replay(
        &self,
        phase: Phase,
        env: &CallEnv,
        session: &Arc<Session>,
    ) -> Vec<RuleOutcome> {
        let Some(replay) = session.replay.clone() else {
            warn!("dispatch_replay on a session not marked as replay");
            return Vec::new();
        };
        let Some(_guard) = session.gate().try_acquire() else {
            return Vec::new();
        };
        let snapshot = self.snapshot();
        let unlimited = Budget::infinite();

        let mut results = Vec::new();
        for descriptor in snapshot.list(phase) {
            if descriptor.rule.purpose != RulePurpose::Reveal {
                continue;
            }
            let mut outcome = run_one(descriptor, env, session, phase, false, Some(&unlimited));
            replay.record_marker(phase, &descriptor.rule.name, capture_backtrace());
            replay.record_observations(std::mem::take(&mut outcome.observations));
            // Non-metric telemetry still follows record-or-global routing.
            self.router.route(&outcome, session);
            results.push(outcome);
        }
        results
    }

    /// Drive the full state machine around a synchronous operation.
    ///
    /// BEFORE may skip `op` entirely; ON-FAILURE may replace a fault with
    /// an override value; AFTER may replace the produced value. The
    /// original fault is rethrown unchanged when no callback overrides it.
    pub fn run_monitored<E: std::fmt::Display>(
        &self,
        session: &Arc<Session>,
        args: Vec<Value>,
        owner: Value,
        op: impl FnOnce() -> Result<Value, E>,
    ) -> Result<Value, E> {
        let env = CallEnv::entering(args, owner);
        if let Some(action) = self.dispatch_and_act(Phase::Before, &env, session) {
            return Ok(action.new_return_value.unwrap_or(Value::Null));
        }
        match op() {
            Ok(value) => {
                let env = env.with_value(value.clone());
                match self.dispatch_and_act(Phase::After, &env, session) {
                    Some(action) => Ok(action.new_return_value.unwrap_or(value)),
                    None => Ok(value),
                }
            }
            Err(fault) => {
                let env = env.with_value(Value::String(fault.to_string()));
                match self.dispatch_and_act(Phase::OnFailure, &env, session) {
                    Some(action) => Ok(action.new_return_value.unwrap_or(Value::Null)),
                    None => Err(fault),
                }
            }
        }
    }

    /// Drive the full state machine around an asynchronous operation.
    ///
    /// BEFORE runs inline and may skip creating the future at all. AFTER
    /// also runs inline, on the still-pending result (`value` is `Null`),
    /// and may short-circuit the settlement with an override. The
    /// ASYNC-AFTER continuation is attached to the settlement: the success
    /// and failure paths are mutually exclusive and exactly-once by
    /// construction of the `await`. A rejection runs ON-FAILURE first
    /// (override chance), then the same ASYNC-AFTER aggregation as the
    /// success path.
    pub async fn run_monitored_async<E, Fut>(
        &self,
        session: &Arc<Session>,
        args: Vec<Value>,
        owner: Value,
        op: impl FnOnce() -> Fut,
    ) -> Result<Value, E>
    where
        E: std::fmt::Display,
        Fut: Future<Output = Result<Value, E>>,
    {
        let env = CallEnv::entering(args, owner);
        if let Some(action) = self.dispatch_and_act(Phase::Before, &env, session) {
            return Ok(action.new_return_value.unwrap_or(Value::Null));
        }
        let future = op();
        if let Some(action) = self.dispatch_and_act(Phase::After, &env, session) {
            return Ok(action.new_return_value.unwrap_or(Value::Null));
        }
        match future.await {
            Ok(value) => {
                let settled = env.with_value(value.clone());
                match self.dispatch_and_act(Phase::AsyncAfter, &settled, session) {
                    Some(action) => Ok(action.new_return_value.unwrap_or(value)),
                    None => Ok(value),
                }
            }
            Err(fault) => {
                let failed = env.with_value(Value::String(fault.to_string()));
                if let Some(action) = self.dispatch_and_act(Phase::OnFailure, &failed, session) {
                    let value = action.new_return_value.unwrap_or(Value::Null);
                    let settled = env.with_value(value.clone());
                    return match self.dispatch_and_act(Phase::AsyncAfter, &settled, session) {
                        Some(action) => Ok(action.new_return_value.unwrap_or(value)),
                        None => Ok(value),
                    };
                }
                // No override: the continuation still observes the failure,
                // then the rejection propagates unchanged.
                match self.dispatch_and_act(Phase::AsyncAfter, &failed, session) {
                    Some(action) => Ok(action.new_return_value.unwrap_or(Value::Null)),
                    None => Err(fault),
                }
            }
        }
    }
}
