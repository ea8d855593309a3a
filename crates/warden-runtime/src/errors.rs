//! Runtime error types.
//!
//! Almost nothing in this crate propagates errors to the monitored
//! application: callback faults are contained by the executor, aggregation
//! faults degrade to "no action". `RuntimeError` exists for the few
//! host-facing seams that can genuinely fail (response termination).

use thiserror::Error;

/// Errors surfaced at host-facing seams of the pipeline.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The response handle could not terminate the request.
    #[error("response termination failed: {0}")]
    ResponseTerminate(String),

    /// A fault occurred while merging phase results.
    #[error("aggregation fault: {0}")]
    Aggregation(String),
}
