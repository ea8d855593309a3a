//! Result Aggregator — merges one phase's outcomes into a single action.
//!
//! Telemetry is routed for *every* outcome before any control action is
//! evaluated, so later rules still report even when an earlier rule's
//! status wins. Action selection is first-match: the first actionable
//! status in list order decides, and a RAISE degrades to a SKIP-with-
//! override once the drop-request side effect has been performed.
//!
//! Aggregation is fail-open toward the original operation: any fault while
//! merging or dropping is reported and treated as "no action".

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};
use warden_core::rules::Status;
use warden_core::telemetry::{ExceptionEvent, Observation};

use crate::router::TelemetryRouter;
use crate::session::Session;
use crate::types::{Action, RuleOutcome};

/// Fixed status used to terminate a dropped request.
pub const DROP_STATUS: u16 = 500;

/// Arbitrates phase outcomes into telemetry side effects plus at most one
/// control action.
pub struct ResultAggregator {
    router: Arc<TelemetryRouter>,
}

impl ResultAggregator {
    /// Aggregator routing through `router`.
    pub fn new(router: Arc<TelemetryRouter>) -> Self {
        Self { router }
    }

    /// Merge one phase's outcomes.
    ///
    /// `block_all` is the global override that forces evaluation of
    /// blocking side effects even for dry-run (`test`) rules.
    pub fn act_on_results(
        &self,
        results: &[RuleOutcome],
        session: &Arc<Session>,
        block_all: bool,
    ) -> Option<Action> {
        if results.is_empty() {
            return None;
        }

        // Telemetry first, for every outcome, under its effective session.
        for outcome in results {
            let effective = outcome.session.as_ref().unwrap_or(session);
            self.router.route(outcome, effective);
        }

        // First actionable status wins.
        for outcome in results {
            let Some(status) = outcome.status else {
                continue;
            };
            let dry_run = outcome.rule.as_ref().is_some_and(|r| r.test);
            if dry_run && !block_all {
                debug!(
                    rule = outcome.rule.as_ref().map(|r| r.name.as_str()),
                    "dry-run status ignored"
                );
                continue;
            }
            let effective = outcome.session.as_ref().unwrap_or(session);
            let rule_name = outcome
                .rule
                .as_ref()
                .map_or_else(String::new, |r| r.name.clone());

            match status {
                Status::Raise => {
                    effective.notify_raise(outcome);
                    if let (Some(request), Some(response)) =
                        (&effective.request, &effective.response)
                    {
                        if let Err(e) = response.terminate(DROP_STATUS) {
                            // Aggregation fault: report, yield no action.
                            warn!(error = %e, "drop-request side effect failed");
                            self.router.report_exception(
                                ExceptionEvent::new(format!("drop-request failed: {e}")),
                                effective,
                            );
                            return None;
                        }
                        counter!("requests_dropped_total", "rule" => rule_name.clone())
                            .increment(1);
                        if request.identity().is_none() {
                            // The request was never assigned an identity, so
                            // no record will log its outcome: synthesize one.
                            self.router.route_observations(
                                vec![Observation::new(
                                    "http_code",
                                    DROP_STATUS.to_string(),
                                    1.0,
                                )],
                                effective,
                            );
                        }
                    }
                    // A RAISE always degrades to a SKIP-with-override once
                    // the drop has been performed.
                    return Some(Action {
                        new_return_value: outcome.new_return_value.clone(),
                        rule_name,
                        raised: true,
                    });
                }
                Status::Skip => {
                    return Some(Action {
                        new_return_value: outcome.new_return_value.clone(),
                        rule_name,
                        raised: false,
                    });
                }
            }
        }
        None
    }
}
