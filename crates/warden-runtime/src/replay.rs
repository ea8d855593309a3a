//! Replay coordination contract.
//!
//! A request marked as a replay gets its own metric store and execution
//! markers: reveal-purpose rules are skipped during normal dispatch and
//! explicitly invoked by the replay path with an unlimited budget, and
//! their metrics land here instead of global telemetry.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use warden_core::rules::Phase;
use warden_core::telemetry::Observation;

/// One replay phase marker: which rule ran where, with its stack trace.
#[derive(Clone, Debug)]
pub struct ReplayMarker {
    /// Dispatch phase label.
    pub phase: &'static str,
    /// Rule that ran.
    pub rule_name: String,
    /// Stack trace captured at dispatch.
    pub backtrace: Vec<String>,
    /// Capture timestamp.
    pub time: DateTime<Utc>,
}

/// Per-replayed-request store for redirected metrics and markers.
#[derive(Debug, Default)]
pub struct ReplayContext {
    observations: Mutex<Vec<(DateTime<Utc>, Observation)>>,
    markers: Mutex<Vec<ReplayMarker>>,
}

impl ReplayContext {
    /// Empty replay context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Redirect an observation batch into the replay's own store.
    pub fn record_observations(&self, observations: Vec<Observation>) {
        let time = Utc::now();
        self.observations
            .lock()
            .extend(observations.into_iter().map(|o| (time, o)));
    }

    /// Record one phase marker against the replayed request.
    pub fn record_marker(&self, phase: Phase, rule_name: &str, backtrace: Vec<String>) {
        self.markers.lock().push(ReplayMarker {
            phase: phase.as_str(),
            rule_name: rule_name.to_string(),
            backtrace,
            time: Utc::now(),
        });
    }

    /// Redirected observations, in emission order.
    pub fn observations(&self) -> Vec<(DateTime<Utc>, Observation)> {
        self.observations.lock().clone()
    }

    /// Recorded markers, in execution order.
    pub fn markers(&self) -> Vec<ReplayMarker> {
        self.markers.lock().clone()
    }
}
