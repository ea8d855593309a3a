//! Session Context — per-call carrier of request handles and budgets.
//!
//! Supplied by the host's session provider at the start of a monitored
//! call; read-only from the pipeline's perspective except for budget
//! mutation. The session also carries the dispatch gate for its call
//! chain and an arbitrary continuation-local map. A session without a
//! context map is *degraded*: the pipeline runs pessimistically (zero
//! standard budget, mandatory rules only).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::budget::Budget;
use crate::errors::RuntimeError;
use crate::lock::DispatchGate;
use crate::replay::ReplayContext;
use crate::types::RuleOutcome;

/// Opaque host request handle.
pub trait RequestHandle: Send + Sync {
    /// Stable request identity, once assigned by the host's tracer.
    /// `None` means telemetry cannot be attributed to a record yet.
    fn identity(&self) -> Option<String>;

    /// Remote client address, when known.
    fn client_address(&self) -> Option<String> {
        None
    }

    /// Selected header claims (host, user-agent, forwarding chain).
    fn header_claims(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Mapped request parameters (query/body/path) as structured JSON.
    fn parameters(&self) -> Value {
        Value::Null
    }
}

/// Opaque host response handle.
pub trait ResponseHandle: Send + Sync {
    /// Terminate the response with `status`, dropping the request.
    fn terminate(&self, status: u16) -> Result<(), RuntimeError>;
}

/// Side effect subscribed on a session, invoked when a rule raises.
pub type RaiseListener = Arc<dyn Fn(&RuleOutcome) + Send + Sync>;

/// Per-call, per-request execution context.
pub struct Session {
    /// Originating request, when the call is tied to one.
    pub request: Option<Arc<dyn RequestHandle>>,
    /// Response handle for the drop-request side effect.
    pub response: Option<Arc<dyn ResponseHandle>>,
    /// Standard budget (protection-purpose rules).
    pub budget: Arc<Budget>,
    /// Monitoring budget (monitoring-purpose rules).
    pub monitoring_budget: Arc<Budget>,
    /// Replay marker — present when the request is a replay.
    pub replay: Option<Arc<ReplayContext>>,
    /// Continuation-local map. Absent on degraded sessions.
    context: Option<Mutex<HashMap<String, Value>>>,
    gate: DispatchGate,
    raise_listeners: Mutex<Vec<RaiseListener>>,
}

impl Session {
    /// Session for a traced request.
    pub fn for_request(
        request: Arc<dyn RequestHandle>,
        response: Option<Arc<dyn ResponseHandle>>,
        budget: Budget,
        monitoring_budget: Budget,
    ) -> Self {
        Self {
            request: Some(request),
            response,
            budget: Arc::new(budget),
            monitoring_budget: Arc::new(monitoring_budget),
            replay: None,
            context: Some(Mutex::new(HashMap::new())),
            gate: DispatchGate::new(),
            raise_listeners: Mutex::new(Vec::new()),
        }
    }

    /// Session for a traced request with budgets sized from the loaded
    /// settings (absent caps mean unlimited).
    pub fn for_request_with_default_budgets(
        request: Arc<dyn RequestHandle>,
        response: Option<Arc<dyn ResponseHandle>>,
    ) -> Self {
        let settings = warden_settings::get_settings();
        Self::for_request(
            request,
            response,
            Budget::from_cap(settings.budget.standard_ms),
            Budget::from_cap(settings.budget.monitoring_ms),
        )
    }

    /// Degraded session: no traceable request, pessimistic zero budgets.
    ///
    /// Mandatory (`no_budget`) callbacks still run; everything else is
    /// soft-skipped on the exhausted budget.
    pub fn degraded() -> Self {
        Self {
            request: None,
            response: None,
            budget: Arc::new(Budget::zero()),
            monitoring_budget: Arc::new(Budget::zero()),
            replay: None,
            context: None,
            gate: DispatchGate::new(),
            raise_listeners: Mutex::new(Vec::new()),
        }
    }

    /// Whether this session lacks request-tracing context.
    pub fn is_degraded(&self) -> bool {
        self.context.is_none()
    }

    /// The request identity, when the request has been assigned one.
    pub fn request_identity(&self) -> Option<String> {
        self.request.as_ref().and_then(|r| r.identity())
    }

    /// Mark this session's request as a replay.
    pub fn mark_replayed(&mut self, replay: Arc<ReplayContext>) {
        self.replay = Some(replay);
    }

    /// Dispatch gate for this call chain.
    pub fn gate(&self) -> &DispatchGate {
        &self.gate
    }

    /// Read a continuation-local value. `None` on degraded sessions.
    pub fn context_get(&self, key: &str) -> Option<Value> {
        self.context.as_ref()?.lock().get(key).cloned()
    }

    /// Store a continuation-local value. No-op on degraded sessions.
    pub fn context_set(&self, key: impl Into<String>, value: Value) {
        if let Some(map) = self.context.as_ref() {
            let _ = map.lock().insert(key.into(), value);
        }
    }

    /// Subscribe an on-raise side effect.
    pub fn subscribe_raise(&self, listener: RaiseListener) {
        self.raise_listeners.lock().push(listener);
    }

    /// Invoke all on-raise listeners with the raising outcome.
    pub(crate) fn notify_raise(&self, outcome: &RuleOutcome) {
        for listener in self.raise_listeners.lock().iter() {
            listener(outcome);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("has_request", &self.request.is_some())
            .field("has_response", &self.response.is_some())
            .field("degraded", &self.is_degraded())
            .field("replayed", &self.replay.is_some())
            .finish()
    }
}
