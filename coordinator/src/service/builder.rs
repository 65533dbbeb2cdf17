use std::time::Duration;

use comms::DEFAULT_MAX_FRAME_LEN;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;

use super::{Coordinator, rounds::RoundCoordinator};
use crate::{
    aggregation::{Aggregator, Mean},
    config::CoordinatorConfig,
    error::ConfigErr,
    model::Model,
    policy::{ClosingRule, LatencyAware, LatencyTracker, StragglerPolicy},
    telemetry::{CsvSink, ExternalSample, Metrics, TelemetrySink},
};

const EVENT_QUEUE: usize = 1024;
const DEFAULT_MAX_MALFORMED: usize = 3;

/// Assembles a `Coordinator` piece by piece.
pub struct CoordinatorBuilder {
    dimension: usize,
    min_workers: usize,
    policy: StragglerPolicy,
    aggregator: Box<dyn Aggregator>,
    sinks: Vec<Box<dyn TelemetrySink>>,
    feed: Option<mpsc::Receiver<ExternalSample>>,
    max_malformed: usize,
    max_frame_len: usize,
    shutdown: CancellationToken,
}

impl CoordinatorBuilder {
    /// Creates a new `CoordinatorBuilder`.
    ///
    /// Defaults to the latency-aware rule with a 2s base budget at the 75th
    /// percentile, the mean aggregator and a single worker to start rounds.
    ///
    /// # Arguments
    /// * `dimension` - The amount of parameters of the model.
    pub fn new(dimension: usize) -> Self {
        let base_round_budget = Duration::from_secs(2);
        let rule = ClosingRule::LatencyAware(LatencyAware {
            base_round_budget,
            percentile: 0.75,
            grace: base_round_budget,
        });

        Self {
            dimension,
            min_workers: 1,
            policy: StragglerPolicy::new(rule, LatencyTracker::new(0.3, Duration::ZERO)),
            aggregator: Box::new(Mean),
            sinks: Vec::new(),
            feed: None,
            max_malformed: DEFAULT_MAX_MALFORMED,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            shutdown: CancellationToken::new(),
        }
    }

    /// Creates a builder out of a loaded configuration, opening its telemetry file if any.
    ///
    /// # Errors
    /// Returns a `ConfigErr` if the telemetry file can't be created.
    pub fn from_config(config: &CoordinatorConfig) -> Result<Self, ConfigErr> {
        let mut builder = Self::new(config.dimension)
            .min_workers(config.min_workers)
            .policy(config.straggler_policy())
            .max_malformed(config.max_malformed)
            .max_frame_len(config.max_frame_len);

        if let Some(path) = &config.telemetry_csv {
            builder = builder.sink(CsvSink::create(path)?);
        }

        Ok(builder)
    }

    /// How many sessions must exist before a round opens.
    pub fn min_workers(mut self, min_workers: usize) -> Self {
        self.min_workers = min_workers;
        self
    }

    pub fn policy(mut self, policy: StragglerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn aggregator<A: Aggregator + 'static>(mut self, aggregator: A) -> Self {
        self.aggregator = Box::new(aggregator);
        self
    }

    /// Adds a telemetry sink, every sink sees every sample and every round.
    pub fn sink<S: TelemetrySink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Feeds externally measured latencies into the policy's estimates.
    pub fn latency_feed(mut self, feed: mpsc::Receiver<ExternalSample>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// How many malformed frames in a row a session tolerates before dropping the worker.
    pub fn max_malformed(mut self, max_malformed: usize) -> Self {
        self.max_malformed = max_malformed;
        self
    }

    pub fn max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Uses `token` to trigger shutdown instead of a fresh one.
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Spawns the round task and returns the handle to it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Coordinator {
        let Self {
            dimension,
            min_workers,
            policy,
            aggregator,
            mut sinks,
            feed,
            max_malformed,
            max_frame_len,
            shutdown,
        } = self;

        let model = Model::zeros(dimension);
        let metrics = Metrics::new();
        sinks.insert(0, Box::new(metrics.clone()));

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (flushed, flushed_rx) = mpsc::channel(1);
        let rounds = RoundCoordinator::new(
            dimension,
            min_workers,
            policy,
            aggregator,
            model.clone(),
            sinks,
            events_rx,
            feed,
            shutdown.clone(),
        );

        Coordinator {
            events: events_tx,
            sessions: JoinSet::new(),
            rounds: tokio::spawn(rounds.run()),
            model,
            metrics,
            shutdown,
            stop_reading: CancellationToken::new(),
            flushed,
            flushed_rx,
            next_id: 0,
            max_malformed,
            max_frame_len,
        }
    }
}
