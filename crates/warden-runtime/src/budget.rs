//! Budget Governor — shared, monotonically-decreasing time allowance.
//!
//! Two budgets exist per session: the standard budget debited by
//! protection-purpose rules, and the monitoring budget debited by
//! monitoring-purpose rules, so neither class can starve the other. Both
//! are cumulative across every phase of one monitored call.
//!
//! Two sentinels: [`Budget::infinite`] (never decreases) and
//! [`Budget::zero`] (already exhausted). Sub-millisecond remainders are
//! passed through to callbacks unrounded — a callback may refuse to act on
//! a near-zero budget, the governor does not round up.

use std::time::Instant;

use metrics::histogram;
use parking_lot::Mutex;
use warden_core::rules::Phase;

#[derive(Debug)]
struct BudgetState {
    /// Remaining milliseconds. `f64::INFINITY` is the unlimited sentinel.
    remaining: f64,
    /// Open per-callback bracket, if any.
    started: Option<Instant>,
    /// Open whole-phase bracket, if any.
    count_started: Option<Instant>,
}

/// A mutable time allowance, exclusively owned by one session's call chain.
#[derive(Debug)]
pub struct Budget {
    state: Mutex<BudgetState>,
}

impl Budget {
    /// Budget of `ms` milliseconds (clamped at zero).
    pub fn new(ms: f64) -> Self {
        Self {
            state: Mutex::new(BudgetState {
                remaining: ms.max(0.0),
                started: None,
                count_started: None,
            }),
        }
    }

    /// Unlimited budget. Never decreases.
    pub fn infinite() -> Self {
        Self::new(f64::INFINITY)
    }

    /// Already-exhausted budget.
    pub fn zero() -> Self {
        Self::new(0.0)
    }

    /// Budget from an optional millisecond cap (absent means unlimited).
    pub fn from_cap(ms: Option<f64>) -> Self {
        match ms {
            Some(ms) => Self::new(ms),
            None => Self::infinite(),
        }
    }

    /// Remaining milliseconds. Non-negative; `f64::INFINITY` when unlimited.
    pub fn remaining(&self) -> f64 {
        self.state.lock().remaining
    }

    /// Whether no time is left.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() <= 0.0
    }

    /// Whether this is the unlimited sentinel.
    pub fn is_infinite(&self) -> bool {
        self.remaining().is_infinite()
    }

    /// Open a per-callback bracket.
    pub fn start(&self) {
        self.state.lock().started = Some(Instant::now());
    }

    /// Close a per-callback bracket, debiting elapsed wall time.
    ///
    /// Safe without a matching [`start`](Budget::start) — a no-op. The
    /// elapsed duration is attributed to `rule_name`/`phase` in metrics.
    pub fn stop(&self, rule_name: &str, phase: Phase) {
        let mut state = self.state.lock();
        let Some(started) = state.started.take() else {
            return;
        };
        let elapsed = started.elapsed();
        state.remaining = (state.remaining - ms_of(elapsed)).max(0.0);
        drop(state);

        histogram!(
            "rule_execution_duration_seconds",
            "rule" => rule_name.to_owned(),
            "phase" => phase.as_str(),
        )
        .record(elapsed.as_secs_f64());
    }

    /// Open a whole-phase bracket.
    ///
    /// Covers precondition filtering and dispatch overhead, not just rule
    /// bodies. Closed by [`stop_count`](Budget::stop_count).
    pub fn start_count(&self, phase: Phase) {
        self.state.lock().count_started = Some(Instant::now());
        tracing::trace!(phase = phase.as_str(), "phase bracket opened");
    }

    /// Close a whole-phase bracket, debiting this budget **and** `other`.
    ///
    /// Safe without a matching [`start_count`](Budget::start_count) — a
    /// no-op.
    pub fn stop_count(&self, other: &Budget) {
        let elapsed = {
            let mut state = self.state.lock();
            let Some(started) = state.count_started.take() else {
                return;
            };
            let elapsed = ms_of(started.elapsed());
            state.remaining = (state.remaining - elapsed).max(0.0);
            elapsed
        };
        let mut other_state = other.state.lock();
        other_state.remaining = (other_state.remaining - elapsed).max(0.0);
    }

    /// Debit an externally-measured duration (test hook and replay path).
    #[cfg(test)]
    pub(crate) fn debit_ms(&self, ms: f64) {
        let mut state = self.state.lock();
        state.remaining = (state.remaining - ms.max(0.0)).max(0.0);
    }
}

fn ms_of(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn new_clamps_negative() {
        assert_eq!(Budget::new(-5.0).remaining(), 0.0);
    }

    #[test]
    fn zero_is_exhausted() {
        let b = Budget::zero();
        assert!(b.is_exhausted());
        assert!(!b.is_infinite());
    }

    #[test]
    fn infinite_never_decreases() {
        let b = Budget::infinite();
        b.start();
        std::thread::sleep(std::time::Duration::from_millis(2));
        b.stop("r", Phase::Before);
        assert!(b.is_infinite());
        assert!(!b.is_exhausted());
    }

    #[test]
    fn from_cap_none_is_infinite() {
        assert!(Budget::from_cap(None).is_infinite());
        assert_eq!(Budget::from_cap(Some(12.0)).remaining(), 12.0);
    }

    #[test]
    fn stop_without_start_is_noop() {
        let b = Budget::new(10.0);
        b.stop("r", Phase::After);
        assert_eq!(b.remaining(), 10.0);
    }

    #[test]
    fn stop_count_without_start_is_noop() {
        let b = Budget::new(10.0);
        let other = Budget::new(10.0);
        b.stop_count(&other);
        assert_eq!(b.remaining(), 10.0);
        assert_eq!(other.remaining(), 10.0);
    }

    #[test]
    fn bracket_debits_elapsed() {
        let b = Budget::new(1000.0);
        b.start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        b.stop("r", Phase::Before);
        assert!(b.remaining() < 1000.0);
        assert!(b.remaining() > 0.0);
    }

    #[test]
    fn remaining_clamps_at_zero() {
        let b = Budget::new(0.5);
        b.start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        b.stop("r", Phase::Before);
        assert_eq!(b.remaining(), 0.0);
    }

    #[test]
    fn phase_bracket_debits_both_budgets() {
        let standard = Budget::new(1000.0);
        let monitoring = Budget::new(1000.0);
        standard.start_count(Phase::Before);
        std::thread::sleep(std::time::Duration::from_millis(5));
        standard.stop_count(&monitoring);
        assert!(standard.remaining() < 1000.0);
        assert!(monitoring.remaining() < 1000.0);
    }

    #[test]
    fn sub_millisecond_remainder_passes_through() {
        let b = Budget::new(0.25);
        assert!(!b.is_exhausted());
        assert_eq!(b.remaining(), 0.25);
    }

    proptest! {
        /// remain == max(0, initial - sum(elapsed)) for any debit sequence.
        #[test]
        fn remaining_is_clamped_difference(
            initial in 0.0f64..10_000.0,
            debits in proptest::collection::vec(0.0f64..1_000.0, 0..16),
        ) {
            let b = Budget::new(initial);
            for d in &debits {
                b.debit_ms(*d);
            }
            let expected = (initial - debits.iter().sum::<f64>()).max(0.0);
            prop_assert!((b.remaining() - expected).abs() < 1e-6);
        }

        /// The unlimited sentinel survives any debit sequence.
        #[test]
        fn infinite_survives_debits(debits in proptest::collection::vec(0.0f64..1e9, 0..16)) {
            let b = Budget::infinite();
            for d in &debits {
                b.debit_ms(*d);
            }
            prop_assert!(b.is_infinite());
        }
    }
}
