//! Dispatch runtime: budgets, sessions, rule execution, and telemetry
//! routing for monitored calls.
//!
//! The host instruments a call site with a [`pipeline::RulePipeline`] and
//! drives it through [`pipeline::RulePipeline::run_monitored`] (or the
//! async variant). Everything else hangs off that:
//!
//! | Module       | Responsibility                                        |
//! |--------------|-------------------------------------------------------|
//! | `budget`     | Shared per-request time budgets with sentinel values  |
//! | `session`    | Per-call context: request handles, budgets, gate      |
//! | `lock`       | Dispatch gate (drop-nested reentrancy guard)          |
//! | `filter`     | Precondition gating                                   |
//! | `executor`   | Single-callback execution under fault isolation       |
//! | `aggregator` | Outcome arbitration into at most one action           |
//! | `router`     | Record-or-global telemetry routing                    |
//! | `record`     | Per-request telemetry buffers and their store         |
//! | `replay`     | Replay redirection for reveal-purpose rules           |
//! | `pipeline`   | Phase state machine and rule-set hot-swap             |

#![deny(unsafe_code)]

pub mod aggregator;
pub mod budget;
pub mod errors;
pub mod executor;
pub mod filter;
pub mod lock;
pub mod pipeline;
pub mod record;
pub mod replay;
pub mod router;
pub mod session;
pub mod types;

pub use aggregator::{DROP_STATUS, ResultAggregator};
pub use budget::Budget;
pub use errors::RuntimeError;
pub use lock::{DispatchGate, DispatchGuard};
pub use pipeline::{PhaseLists, RulePipeline};
pub use record::{Record, RecordStore};
pub use replay::{ReplayContext, ReplayMarker};
pub use router::{ExceptionReporter, MemorySink, TelemetryRouter, TelemetrySink};
pub use session::{RaiseListener, RequestHandle, ResponseHandle, Session};
pub use types::{
    Action, AttackIntent, CallEnv, CallbackDescriptor, CallbackFn, PreconditionFn, RuleOutcome,
    default_exception_cap,
};
