use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tokio::time::Duration;

use super::{RoundOutcome, RoundSummary, TelemetrySink};
use crate::WorkerId;

/// Counters describing the coordinator's progress.
#[derive(Debug, Default, Clone)]
pub struct Counters {
    pub rounds: u64,
    pub no_update_rounds: u64,
    pub last_round_elapsed: Duration,
    pub total_round_elapsed: Duration,
    pub contributions: HashMap<WorkerId, u64>,
    pub misses: HashMap<WorkerId, u64>,
}

impl Counters {
    /// The mean time a round stayed open, `None` before the first round closes.
    pub fn mean_round_elapsed(&self) -> Option<Duration> {
        let rounds = u32::try_from(self.rounds).ok().filter(|r| *r > 0)?;
        Some(self.total_round_elapsed / rounds)
    }

    pub fn misses_of(&self, worker: WorkerId) -> u64 {
        self.misses.get(&worker).copied().unwrap_or_default()
    }
}

/// Shared handle over the coordinator's `Counters`.
#[derive(Debug, Default, Clone)]
pub struct Metrics {
    counters: Arc<RwLock<Counters>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a copy of the current counters.
    pub fn snapshot(&self) -> Counters {
        self.counters.read().clone()
    }

    /// The amount of closed rounds.
    pub fn rounds(&self) -> u64 {
        self.counters.read().rounds
    }
}

impl TelemetrySink for Metrics {
    fn record_latency(&mut self, _round: u64, _worker: WorkerId, _latency: Duration) {}

    fn record_round(&mut self, summary: &RoundSummary) {
        let mut counters = self.counters.write();

        counters.rounds += 1;
        if summary.outcome == RoundOutcome::NoUpdate {
            counters.no_update_rounds += 1;
        }

        counters.last_round_elapsed = summary.elapsed;
        counters.total_round_elapsed += summary.elapsed;

        for worker in &summary.contributed {
            *counters.contributions.entry(*worker).or_default() += 1;
        }

        for worker in &summary.missed {
            *counters.misses.entry(*worker).or_default() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_rounds_and_misses() {
        let mut metrics = Metrics::new();
        let handle = metrics.clone();

        metrics.record_round(&RoundSummary {
            round: 1,
            expected: vec![1, 2],
            contributed: vec![1],
            missed: vec![2],
            elapsed: Duration::from_millis(30),
            outcome: RoundOutcome::Updated,
        });
        metrics.record_round(&RoundSummary {
            round: 2,
            expected: vec![1, 2],
            contributed: vec![],
            missed: vec![1, 2],
            elapsed: Duration::from_millis(10),
            outcome: RoundOutcome::NoUpdate,
        });

        let counters = handle.snapshot();
        assert_eq!(counters.rounds, 2);
        assert_eq!(counters.no_update_rounds, 1);
        assert_eq!(counters.misses_of(2), 2);
        assert_eq!(counters.misses_of(1), 1);
        assert_eq!(counters.contributions[&1], 1);
        assert_eq!(counters.mean_round_elapsed(), Some(Duration::from_millis(20)));
    }
}
