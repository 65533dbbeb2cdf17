//! Observability hooks of the coordinator.
//!
//! Sinks receive every latency sample and a summary of every closed round,
//! the `Metrics` sink keeps counters in memory and `CsvSink` writes samples
//! out for offline analysis.
mod csv;
mod metrics;

use tokio::time::Duration;

use crate::WorkerId;

pub use csv::CsvSink;
pub use metrics::{Counters, Metrics};

/// How a round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The model was replaced by the round's aggregate.
    Updated,
    /// The model was left unchanged.
    NoUpdate,
}

/// What happened in a closed round.
#[derive(Debug, Clone)]
pub struct RoundSummary {
    pub round: u64,
    pub expected: Vec<WorkerId>,
    pub contributed: Vec<WorkerId>,
    pub missed: Vec<WorkerId>,
    pub elapsed: Duration,
    pub outcome: RoundOutcome,
}

/// A latency measured outside the coordinator, e.g. by kernel tracing on the send path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalSample {
    pub worker: WorkerId,
    pub latency_ns: u64,
}

/// Receives the coordinator's telemetry.
pub trait TelemetrySink: Send {
    /// Called for every contribution latency sample.
    fn record_latency(&mut self, round: u64, worker: WorkerId, latency: Duration);

    /// Called once per closed round.
    fn record_round(&mut self, summary: &RoundSummary);
}
