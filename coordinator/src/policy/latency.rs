use std::collections::HashMap;

use tokio::time::Duration;

use crate::WorkerId;

/// Exponentially weighted moving average over nanosecond samples.
#[derive(Debug, Clone, Copy)]
struct Ewma {
    value: f64,
}

impl Ewma {
    fn update(slot: &mut Option<Ewma>, alpha: f64, sample: f64) {
        *slot = Some(match *slot {
            Some(Ewma { value }) => Ewma {
                value: alpha * sample + (1. - alpha) * value,
            },
            None => Ewma { value: sample },
        });
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct WorkerLatency {
    round_trip: Option<Ewma>,
    external: Option<Ewma>,
}

/// Per worker latency estimates.
///
/// Two sources feed it: round trip samples measured by the coordinator itself,
/// and an optional external feed (kernel level send latencies). When a worker has
/// external samples those win, otherwise the round trip estimate is used. A worker
/// without any sample gets the optimistic initial estimate.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    alpha: f64,
    initial: Duration,
    workers: HashMap<WorkerId, WorkerLatency>,
}

impl LatencyTracker {
    /// Creates a new `LatencyTracker`.
    ///
    /// # Arguments
    /// * `alpha` - The weight of each new sample, in `(0, 1]`.
    /// * `initial` - The estimate for workers without samples.
    pub fn new(alpha: f64, initial: Duration) -> Self {
        Self {
            alpha,
            initial,
            workers: HashMap::new(),
        }
    }

    /// Feeds a round trip sample for `worker`.
    pub fn record_latency(&mut self, worker: WorkerId, sample: Duration) {
        let entry = self.workers.entry(worker).or_default();
        Ewma::update(&mut entry.round_trip, self.alpha, sample.as_nanos() as f64);
    }

    /// Feeds an externally measured latency for `worker`.
    pub fn record_external(&mut self, worker: WorkerId, latency_ns: u64) {
        let entry = self.workers.entry(worker).or_default();
        Ewma::update(&mut entry.external, self.alpha, latency_ns as f64);
    }

    /// Drops everything known about `worker`.
    pub fn forget(&mut self, worker: WorkerId) {
        self.workers.remove(&worker);
    }

    /// Returns the current latency estimate of `worker`.
    pub fn estimate(&self, worker: WorkerId) -> Duration {
        self.workers
            .get(&worker)
            .and_then(|latency| latency.external.or(latency.round_trip))
            .map(|ewma| Duration::from_nanos(ewma.value.max(0.) as u64))
            .unwrap_or(self.initial)
    }

    /// Computes the nearest-rank percentile of the estimates of `workers`.
    ///
    /// # Arguments
    /// * `workers` - The workers to consider.
    /// * `p` - The percentile, in `(0, 1]`.
    ///
    /// # Returns
    /// The percentile, or `None` if `workers` is empty.
    pub fn percentile<I>(&self, workers: I, p: f64) -> Option<Duration>
    where
        I: IntoIterator<Item = WorkerId>,
    {
        let mut estimates: Vec<_> = workers.into_iter().map(|w| self.estimate(w)).collect();
        if estimates.is_empty() {
            return None;
        }

        estimates.sort_unstable();
        let rank = (p * estimates.len() as f64).ceil() as usize;
        let idx = rank.clamp(1, estimates.len()) - 1;
        Some(estimates[idx])
    }
}
