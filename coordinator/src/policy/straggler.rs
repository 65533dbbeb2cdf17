use std::{collections::BTreeSet, fmt};

use tokio::time::{Duration, Instant};

use super::LatencyTracker;
use crate::WorkerId;

/// Parameters of the latency-aware closing rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyAware {
    /// The minimum time a round stays open.
    pub base_round_budget: Duration,
    /// Which percentile of the expected workers' latency estimates to wait for.
    pub percentile: f64,
    /// How much longer to wait, once, when the deadline fires on an empty round.
    pub grace: Duration,
}

/// How a round decides when to stop waiting for contributions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClosingRule {
    /// Wait for every expected worker, however long it takes.
    Barrier,
    /// Wait until a deadline derived from the workers' latency estimates.
    LatencyAware(LatencyAware),
}

impl fmt::Display for ClosingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosingRule::Barrier => f.write_str("barrier"),
            ClosingRule::LatencyAware(la) => write!(
                f,
                "latency-aware (base {:?}, p{}, grace {:?})",
                la.base_round_budget,
                la.percentile * 100.,
                la.grace
            ),
        }
    }
}

/// Decides round deadlines from the latency history of every worker.
///
/// It owns the only latency map of the coordinator, every latency update goes
/// through `record_latency` or `record_external`.
#[derive(Debug, Clone)]
pub struct StragglerPolicy {
    rule: ClosingRule,
    latencies: LatencyTracker,
}

impl StragglerPolicy {
    /// Creates a new `StragglerPolicy`.
    ///
    /// # Arguments
    /// * `rule` - The closing rule to apply.
    /// * `latencies` - The latency tracker to consult.
    pub fn new(rule: ClosingRule, latencies: LatencyTracker) -> Self {
        Self { rule, latencies }
    }

    /// A barrier policy, rounds wait for every expected worker.
    pub fn barrier() -> Self {
        Self::new(ClosingRule::Barrier, LatencyTracker::new(1., Duration::ZERO))
    }

    pub fn rule(&self) -> &ClosingRule {
        &self.rule
    }

    pub fn latencies(&self) -> &LatencyTracker {
        &self.latencies
    }

    /// Computes the deadline of a round opened at `now` for `expected`.
    ///
    /// # Returns
    /// `None` when the round must wait for every expected worker.
    pub fn deadline(&self, now: Instant, expected: &BTreeSet<WorkerId>) -> Option<Instant> {
        match self.rule {
            ClosingRule::Barrier => None,
            ClosingRule::LatencyAware(LatencyAware {
                base_round_budget,
                percentile,
                ..
            }) => {
                let tail = self
                    .latencies
                    .percentile(expected.iter().copied(), percentile)
                    .unwrap_or_default();

                Some(now + base_round_budget.max(tail))
            }
        }
    }

    /// How long to extend an empty round's deadline, `None` if it never expires.
    pub fn grace(&self) -> Option<Duration> {
        match self.rule {
            ClosingRule::Barrier => None,
            ClosingRule::LatencyAware(LatencyAware { grace, .. }) => Some(grace),
        }
    }

    /// Feeds a round trip sample for `worker`.
    pub fn record_latency(&mut self, worker: WorkerId, sample: Duration) {
        self.latencies.record_latency(worker, sample);
    }

    /// Feeds an externally measured send latency for `worker`.
    pub fn record_external(&mut self, worker: WorkerId, latency_ns: u64) {
        self.latencies.record_external(worker, latency_ns);
    }

    /// Drops everything known about `worker`.
    pub fn forget(&mut self, worker: WorkerId) {
        self.latencies.forget(worker);
    }
}
