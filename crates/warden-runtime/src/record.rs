//! Per-request telemetry record and its store.
//!
//! A [`Record`] buffers attacks, observations, data points, and exceptions
//! for one request until the host flushes it at request completion. The
//! pipeline only ever *looks up* records — creation and eviction belong to
//! the host's request lifecycle (the [`RecordStore`] here implements that
//! lifecycle in-process so the crate is usable stand-alone).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::gauge;
use parking_lot::Mutex;
use warden_core::telemetry::{Attack, DataPoint, ExceptionEvent, Observation};

/// Buffered, not-yet-flushed telemetry for one request.
#[derive(Clone, Debug, Default)]
pub struct RecordData {
    /// Attacks raised against this request.
    pub attacks: Vec<Attack>,
    /// Timestamped counter observations.
    pub observations: Vec<(DateTime<Utc>, Observation)>,
    /// Rule-tagged data points.
    pub data_points: Vec<DataPoint>,
    /// Contained faults attributed to this request.
    pub exceptions: Vec<ExceptionEvent>,
    /// Whether the full request payload must be reported at flush.
    pub report_payload: bool,
}

/// Live per-request buffer. Exists only while the request is tracked.
#[derive(Debug, Default)]
pub struct Record {
    data: Mutex<RecordData>,
}

impl Record {
    /// Append one attack.
    pub fn push_attack(&self, attack: Attack) {
        self.data.lock().attacks.push(attack);
    }

    /// Append observations, all stamped with `time`.
    pub fn push_observations(&self, observations: Vec<Observation>, time: DateTime<Utc>) {
        let mut data = self.data.lock();
        data.observations
            .extend(observations.into_iter().map(|o| (time, o)));
    }

    /// Append data points.
    pub fn push_data_points(&self, points: Vec<DataPoint>) {
        self.data.lock().data_points.extend(points);
    }

    /// Append one contained fault.
    pub fn push_exception(&self, exception: ExceptionEvent) {
        self.data.lock().exceptions.push(exception);
    }

    /// Mark that the full payload must be reported at flush.
    pub fn mark_report_payload(&self) {
        self.data.lock().report_payload = true;
    }

    /// Snapshot the buffered data (flush reads this, then drops the record).
    pub fn snapshot(&self) -> RecordData {
        self.data.lock().clone()
    }
}

/// In-process record store keyed by request identity.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: DashMap<String, Arc<Record>>,
}

impl RecordStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or return the existing) record for `identity`.
    ///
    /// Host-side API: the pipeline itself never calls this.
    pub fn open(&self, identity: impl Into<String>) -> Arc<Record> {
        let record = self
            .records
            .entry(identity.into())
            .or_insert_with(|| Arc::new(Record::default()))
            .clone();
        gauge!("records_active").set(self.records.len() as f64);
        record
    }

    /// Look up the record for `identity`, if the request is tracked.
    pub fn lookup(&self, identity: &str) -> Option<Arc<Record>> {
        self.records.get(identity).map(|r| Arc::clone(&r))
    }

    /// Remove the record and return its buffered data for transport.
    pub fn flush(&self, identity: &str) -> Option<RecordData> {
        let (_, record) = self.records.remove(identity)?;
        gauge!("records_active").set(self.records.len() as f64);
        Some(record.snapshot())
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are live.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
