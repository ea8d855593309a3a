//! Telemetry Router — record-or-global routing for rule outcomes.
//!
//! Exactly one of two destinations holds per call: either a [`Record`]
//! exists for the originating request (telemetry is buffered against it),
//! or everything goes to the global sink immediately — never both, never
//! neither. Attacks reported globally are enriched with request metadata,
//! since no record will carry it later.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;
use warden_core::telemetry::{
    Attack, DataPoint, ExceptionEvent, Observation, RequestMetadata,
};

use crate::record::{Record, RecordStore};
use crate::session::Session;
use crate::types::{AttackIntent, RuleOutcome};

/// Global telemetry entry points, consumed when no record exists.
pub trait TelemetrySink: Send + Sync {
    /// Report one standalone attack.
    fn report_attack(&self, attack: Attack);
    /// Add observations, all stamped with `time`.
    fn add_observations(&self, observations: Vec<Observation>, time: chrono::DateTime<Utc>);
    /// Report rule-tagged data points.
    fn report_data_points(&self, points: Vec<DataPoint>);
}

/// Receiver for faults not attributable to a request-scoped record.
pub trait ExceptionReporter: Send + Sync {
    /// Report one contained fault.
    fn report(&self, event: ExceptionEvent);
}

/// In-memory sink implementing both traits. Default backend for
/// stand-alone use and tests; production hosts plug their transport in.
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Attacks reported globally.
    pub attacks: Mutex<Vec<Attack>>,
    /// Observations reported globally.
    pub observations: Mutex<Vec<(chrono::DateTime<Utc>, Observation)>>,
    /// Data points reported globally.
    pub data_points: Mutex<Vec<DataPoint>>,
    /// Faults reported globally.
    pub exceptions: Mutex<Vec<ExceptionEvent>>,
}

impl TelemetrySink for MemorySink {
    fn report_attack(&self, attack: Attack) {
        self.attacks.lock().push(attack);
    }

    fn add_observations(&self, observations: Vec<Observation>, time: chrono::DateTime<Utc>) {
        self.observations
            .lock()
            .extend(observations.into_iter().map(|o| (time, o)));
    }

    fn report_data_points(&self, points: Vec<DataPoint>) {
        self.data_points.lock().extend(points);
    }
}

impl ExceptionReporter for MemorySink {
    fn report(&self, event: ExceptionEvent) {
        self.exceptions.lock().push(event);
    }
}

/// Routes one rule outcome to the record or the global sink.
pub struct TelemetryRouter {
    record_store: Arc<RecordStore>,
    sink: Arc<dyn TelemetrySink>,
    reporter: Arc<dyn ExceptionReporter>,
}

impl TelemetryRouter {
    /// Router over a record store, a global sink, and a fault reporter.
    pub fn new(
        record_store: Arc<RecordStore>,
        sink: Arc<dyn TelemetrySink>,
        reporter: Arc<dyn ExceptionReporter>,
    ) -> Self {
        Self {
            record_store,
            sink,
            reporter,
        }
    }

    /// The record store this router resolves against.
    pub fn record_store(&self) -> &Arc<RecordStore> {
        &self.record_store
    }

    /// Route everything one outcome carries.
    ///
    /// The four telemetry families are independent: a single outcome may
    /// trigger attack, observation, and data-point routing simultaneously.
    pub fn route(&self, outcome: &RuleOutcome, session: &Session) {
        if outcome.is_empty() {
            return;
        }
        let record = self.active_record(session);

        if let Some(intent) = &outcome.attack {
            self.route_attack(intent, outcome, session, record.as_deref());
        }

        if !outcome.observations.is_empty() {
            let time = Utc::now();
            match &record {
                Some(record) => record.push_observations(outcome.observations.clone(), time),
                None => self.sink.add_observations(outcome.observations.clone(), time),
            }
        }

        if !outcome.data_points.is_empty() {
            let points = self.tag_data_points(outcome);
            match &record {
                Some(record) => record.push_data_points(points),
                None => self.sink.report_data_points(points),
            }
        }

        if let Some(exception) = &outcome.exception {
            match &record {
                Some(record) => record.push_exception(exception.clone()),
                None => self.reporter.report(exception.clone()),
            }
        }

        if outcome.report_payload
            && let Some(record) = &record
        {
            record.mark_report_payload();
        }
    }

    /// Route one observation batch outside an outcome (synthetic
    /// observations from the aggregator).
    pub(crate) fn route_observations(&self, observations: Vec<Observation>, session: &Session) {
        match self.active_record(session) {
            Some(record) => record.push_observations(observations, Utc::now()),
            None => self.sink.add_observations(observations, Utc::now()),
        }
    }

    /// Route one fault: to the record when the request is tracked, else to
    /// the global exception reporter.
    pub(crate) fn report_exception(&self, event: ExceptionEvent, session: &Session) {
        match self.active_record(session) {
            Some(record) => record.push_exception(event),
            None => self.reporter.report(event),
        }
    }

    /// Resolve the record for the session's request. Lookup only — the
    /// router never creates records.
    fn active_record(&self, session: &Session) -> Option<Arc<Record>> {
        let identity = session.request_identity()?;
        self.record_store.lookup(&identity)
    }

    fn route_attack(
        &self,
        intent: &AttackIntent,
        outcome: &RuleOutcome,
        session: &Session,
        record: Option<&Record>,
    ) {
        let Some(rule) = &outcome.rule else {
            debug!("attack outcome without rule attribution, dropping");
            return;
        };
        metrics::counter!("attacks_total", "rule" => rule.name.clone()).increment(1);

        let mut attack = Attack {
            rule_name: rule.name.clone(),
            rules_pack_id: rule.rules_pack_id.clone(),
            test: rule.test,
            block: rule.block,
            beta: rule.beta,
            learning: rule.learning,
            infos: intent.infos.clone(),
            time: Utc::now(),
            backtrace: capture_backtrace(),
            request: None,
        };
        match record {
            Some(record) => record.push_attack(attack),
            None => {
                attack.request = session.request.as_ref().map(|r| RequestMetadata {
                    client_address: r.client_address(),
                    header_claims: r.header_claims(),
                    parameters: r.parameters(),
                });
                self.sink.report_attack(attack);
            }
        }
    }

    fn tag_data_points(&self, outcome: &RuleOutcome) -> Vec<DataPoint> {
        outcome
            .data_points
            .iter()
            .cloned()
            .map(|mut p| {
                if let Some(rule) = &outcome.rule {
                    p.rules_pack_id = rule.rules_pack_id.clone();
                    p.rule_name = rule.name.clone();
                }
                p
            })
            .collect()
    }
}

/// Capture a bounded stack trace for attack/marker attribution.
pub(crate) fn capture_backtrace() -> Vec<String> {
    std::backtrace::Backtrace::force_capture()
        .to_string()
        .lines()
        .take(32)
        .map(str::trim_start)
        .map(String::from)
        .collect()
}
