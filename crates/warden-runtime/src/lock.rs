//! Dispatch Lock — reentrancy guard for one execution context.
//!
//! A rule body may itself touch a monitored resource (a rule doing network
//! I/O re-enters the pipeline through the instrumented client). The gate
//! makes the nested invocation short-circuit to "no rules ran": no
//! telemetry, no budget debited. Nested attempts never wait — they are
//! dropped, trading completeness for recursion safety.
//!
//! The gate is carried per execution context (one per session call chain)
//! rather than as process-global state, so it stays correct under OS-thread
//! parallelism while preserving the drop-nested semantics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::counter;

/// Mutual-exclusion gate for one logical call flow.
#[derive(Clone, Debug, Default)]
pub struct DispatchGate {
    held: Arc<AtomicBool>,
}

impl DispatchGate {
    /// A released gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the gate for the duration of one phase's rule list.
    ///
    /// Returns `None` when already held — the caller must treat the
    /// dispatch as "zero rules fired". Released by dropping the guard,
    /// including on unwind.
    pub fn try_acquire(&self) -> Option<DispatchGuard> {
        if self
            .held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(DispatchGuard {
                held: Arc::clone(&self.held),
            })
        } else {
            counter!("dispatch_nested_drops_total").increment(1);
            None
        }
    }

    /// Whether a dispatch is currently in progress on this gate.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// RAII guard — clears the gate when dropped.
#[derive(Debug)]
pub struct DispatchGuard {
    held: Arc<AtomicBool>,
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}
