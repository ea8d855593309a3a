//! Telemetry value types routed by the pipeline.
//!
//! Four families, all serde-serializable for downstream transport (the wire
//! format itself is out of scope here):
//!
//! - **[`Attack`]**: one detected attack, enriched with request metadata
//!   when reported outside a per-request record.
//! - **[`Observation`]**: a `(category, key, value)` counter triple.
//! - **[`DataPoint`]**: an opaque payload tagged with its owning rule.
//! - **[`ExceptionEvent`]**: a contained fault, attributed to a rule when
//!   one was executing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request metadata attached to telemetry reported without an active record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Remote client address, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_address: Option<String>,
    /// Selected request header claims (host, user-agent, forwarding chain).
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub header_claims: BTreeMap<String, String>,
    /// Mapped request parameters (query/body/path), as structured JSON.
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub parameters: Value,
}

/// One detected attack.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attack {
    /// Name of the rule that raised.
    pub rule_name: String,
    /// Pack the rule belongs to.
    pub rules_pack_id: String,
    /// Dry-run flag of the raising rule.
    pub test: bool,
    /// Blocking flag of the raising rule.
    pub block: bool,
    /// Beta flag of the raising rule.
    pub beta: bool,
    /// Learning flag of the raising rule.
    pub learning: bool,
    /// Rule-provided payload describing the match.
    pub infos: Value,
    /// Capture timestamp.
    pub time: DateTime<Utc>,
    /// Stack trace captured at raise time.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub backtrace: Vec<String>,
    /// Request context, present only when reported to the global sink.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestMetadata>,
}

/// A `(category, key, value)` counter triple.
///
/// The timestamp is attached at routing time, not construction time, so a
/// batch routed together shares one timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Metric category (e.g. `call_counts`).
    pub category: String,
    /// Metric key within the category (e.g. `pack/rule/pre`).
    pub key: String,
    /// Observed value or weight.
    pub value: f64,
}

impl Observation {
    /// Convenience constructor.
    pub fn new(category: impl Into<String>, key: impl Into<String>, value: f64) -> Self {
        Self {
            category: category.into(),
            key: key.into(),
            value,
        }
    }
}

/// Opaque payload reported by a rule, tagged with its owner at routing time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Pack of the owning rule (filled by the router).
    #[serde(default)]
    pub rules_pack_id: String,
    /// Name of the owning rule (filled by the router).
    #[serde(default)]
    pub rule_name: String,
    /// Rule-defined payload.
    pub payload: Value,
}

impl DataPoint {
    /// A data point carrying `payload`, owner filled in by the router.
    pub fn new(payload: Value) -> Self {
        Self {
            rules_pack_id: String::new(),
            rule_name: String::new(),
            payload,
        }
    }
}

/// A contained fault, reported as telemetry rather than propagated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExceptionEvent {
    /// Human-readable fault description.
    pub message: String,
    /// Rule that was executing, when attributable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    /// Dispatch phase label, when attributable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Capture timestamp.
    pub time: DateTime<Utc>,
}

impl ExceptionEvent {
    /// Fault with no rule attribution.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            rule_name: None,
            phase: None,
            time: Utc::now(),
        }
    }
}
