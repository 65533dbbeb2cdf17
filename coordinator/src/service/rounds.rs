use std::{
    collections::{BTreeMap, BTreeSet},
    future,
    sync::Arc,
};

use log::{debug, info, warn};
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use super::Event;
use crate::{
    WorkerId,
    aggregation::Aggregator,
    model::Model,
    policy::StragglerPolicy,
    round::Round,
    telemetry::{ExternalSample, RoundOutcome, RoundSummary, TelemetrySink},
};

/// The coordinator's view of a connected session.
struct Member {
    outbound: mpsc::UnboundedSender<Arc<[f32]>>,
    /// When the worker last got a model, or joined.
    since: Instant,
}

/// A response held back until the worker is invited to a round.
enum Pending {
    Contribution(Vec<f32>),
    Discarded,
}

/// Drives rounds one after the other.
///
/// It is the only owner of the open round, the membership and the latency
/// history; sessions talk to it through a queue, so depositing a contribution
/// and closing a round never interleave.
pub(crate) struct RoundCoordinator {
    dimension: usize,
    min_workers: usize,
    policy: StragglerPolicy,
    aggregator: Box<dyn Aggregator>,
    model: Model,
    sinks: Vec<Box<dyn TelemetrySink>>,
    events: mpsc::Receiver<Event>,
    feed: Option<mpsc::Receiver<ExternalSample>>,
    shutdown: CancellationToken,
    members: BTreeMap<WorkerId, Member>,
    pending: BTreeMap<WorkerId, Pending>,
    round: Option<Round>,
    next_round: u64,
    /// Set once the first round opened, `min_workers` only holds that one back.
    started: bool,
}

impl RoundCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        dimension: usize,
        min_workers: usize,
        policy: StragglerPolicy,
        aggregator: Box<dyn Aggregator>,
        model: Model,
        sinks: Vec<Box<dyn TelemetrySink>>,
        events: mpsc::Receiver<Event>,
        feed: Option<mpsc::Receiver<ExternalSample>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dimension,
            min_workers: min_workers.max(1),
            policy,
            aggregator,
            model,
            sinks,
            events,
            feed,
            shutdown,
            members: BTreeMap::new(),
            pending: BTreeMap::new(),
            round: None,
            next_round: 1,
            started: false,
        }
    }

    /// Processes events and deadlines until shutdown, then drains the open round.
    pub(super) async fn run(mut self) {
        loop {
            let deadline = self.round.as_ref().and_then(Round::deadline);

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = sleep_until(deadline) => self.on_deadline(Instant::now()),
                sample = next_sample(&mut self.feed) => match sample {
                    Some(ExternalSample { worker, latency_ns }) => {
                        self.policy.record_external(worker, latency_ns);
                    }
                    None => self.feed = None,
                },
                event = self.events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }

        self.drain();
    }

    fn handle(&mut self, event: Event) {
        let now = Instant::now();

        match event {
            Event::Joined { id, outbound } => {
                self.members.insert(id, Member { outbound, since: now });
                info!(worker = id; "worker joined, {} connected", self.members.len());
            }
            Event::Contribution { id, vector, arrived } => {
                self.contribution(id, vector, arrived);
            }
            Event::Discarded { id } => {
                if self.members.contains_key(&id) {
                    self.respond(id, Pending::Discarded);
                }
            }
            Event::Left { id } => self.leave(id),
        }

        self.advance(now);
    }

    fn contribution(&mut self, id: WorkerId, vector: Vec<f32>, arrived: Instant) {
        let Some(member) = self.members.get(&id) else {
            debug!(worker = id; "contribution from unknown worker");
            return;
        };

        let latency = arrived.saturating_duration_since(member.since);
        self.policy.record_latency(id, latency);

        let round = match &self.round {
            Some(round) if Self::accepts(round, id) => round.id(),
            _ => self.next_round,
        };
        for sink in &mut self.sinks {
            sink.record_latency(round, id, latency);
        }

        self.respond(id, Pending::Contribution(vector));
    }

    /// Hands `response` to the open round, or parks it until `id` is invited.
    fn respond(&mut self, id: WorkerId, response: Pending) {
        if let Some(round) = self.round.as_mut() {
            if Self::accepts(round, id) {
                Self::apply(round, id, response);
                return;
            }
        }

        if self.pending.contains_key(&id) {
            warn!(worker = id; "worker already has a parked response, dropping the new one");
            return;
        }

        debug!(worker = id; "parking response until the next round");
        self.pending.insert(id, response);
    }

    /// Whether `round` takes a response from `id` right now, otherwise it is parked.
    fn accepts(round: &Round, id: WorkerId) -> bool {
        round.is_invited(id) && !round.has_responded(id)
    }

    fn apply(round: &mut Round, id: WorkerId, response: Pending) {
        let res = match response {
            Pending::Contribution(vector) => round.deposit(id, vector),
            Pending::Discarded => round.discard(id),
        };

        match res {
            Ok(()) => debug!(worker = id, round = round.id(); "response accepted"),
            Err(e) => warn!(worker = id, round = round.id(); "contribution discarded: {e}"),
        }
    }

    fn leave(&mut self, id: WorkerId) {
        if self.members.remove(&id).is_none() {
            return;
        }

        self.pending.remove(&id);
        self.policy.forget(id);

        if let Some(round) = self.round.as_mut() {
            round.depart(id);
        }

        info!(worker = id; "worker left, {} connected", self.members.len());
    }

    /// Closes complete rounds and opens new ones until nothing else can happen right now.
    fn advance(&mut self, now: Instant) {
        loop {
            match self.round.as_ref().map(Round::is_complete) {
                None if !self.open_round(now) => return,
                None => {}
                Some(true) => self.close_round(now),
                Some(false) => return,
            }
        }
    }

    /// Opens a round inviting the whole current membership.
    ///
    /// The first round waits for `min_workers` sessions, later ones only need one.
    ///
    /// # Returns
    /// Whether a round was opened.
    fn open_round(&mut self, now: Instant) -> bool {
        let needed = if self.started { 1 } else { self.min_workers };
        if self.members.len() < needed {
            return false;
        }

        self.started = true;

        let expected: BTreeSet<_> = self.members.keys().copied().collect();
        let deadline = self.policy.deadline(now, &expected);

        let id = self.next_round;
        self.next_round += 1;

        debug!(
            round = id;
            "round opened for {} workers, deadline in {:?}",
            expected.len(),
            deadline.map(|d| d - now)
        );

        let mut round = Round::open(id, expected, self.dimension, now, deadline);

        let invited: Vec<_> = self
            .pending
            .keys()
            .copied()
            .filter(|worker| round.is_invited(*worker))
            .collect();

        for worker in invited {
            if let Some(response) = self.pending.remove(&worker) {
                Self::apply(&mut round, worker, response);
            }
        }

        self.round = Some(round);
        true
    }

    fn on_deadline(&mut self, now: Instant) {
        let Some(round) = self.round.as_mut() else {
            return;
        };

        if round.is_empty() {
            if let Some(grace) = self.policy.grace() {
                if round.extend_deadline(now, grace) {
                    warn!(round = round.id(); "deadline reached with no contributions, waiting {grace:?} more");
                    return;
                }
            }
        }

        self.close_round(now);
        self.advance(now);
    }

    /// Aggregates the open round, publishes the model and dispatches it to the round's responders.
    fn close_round(&mut self, now: Instant) {
        let Some(mut round) = self.round.take() else {
            return;
        };

        round.begin_closing();
        let outcome = self.aggregate(&round);

        let responders: Vec<_> = round.responders().collect();
        let missed: Vec<_> = round.missed().collect();
        let summary = RoundSummary {
            round: round.id(),
            expected: round.expected().iter().copied().collect(),
            contributed: round.contributions().keys().copied().collect(),
            missed,
            elapsed: now.saturating_duration_since(round.opened_at()),
            outcome,
        };

        round.finish();

        let snapshot = self.model.snapshot();
        for worker in &responders {
            if let Some(member) = self.members.get_mut(worker) {
                member.since = now;
                if member.outbound.send(Arc::clone(&snapshot)).is_err() {
                    debug!(worker = *worker; "session is gone, model not delivered");
                }
            }
        }

        for worker in &summary.missed {
            if let Some(member) = self.members.get(worker) {
                let waited = now.saturating_duration_since(member.since);
                self.policy.record_latency(*worker, waited);
            }
        }

        info!(
            round = summary.round;
            "round closed after {:?}: {}/{} contributions, {} missed, {:?}",
            summary.elapsed,
            summary.contributed.len(),
            summary.expected.len(),
            summary.missed.len(),
            summary.outcome
        );

        for sink in &mut self.sinks {
            sink.record_round(&summary);
        }
    }

    fn aggregate(&self, round: &Round) -> RoundOutcome {
        if round.is_empty() {
            warn!(round = round.id(); "no contributions, model unchanged");
            return RoundOutcome::NoUpdate;
        }

        match self.aggregator.aggregate(round.contributions(), self.dimension) {
            Ok(vector) => {
                self.model.publish(round.id(), vector);
                RoundOutcome::Updated
            }
            Err(e) => {
                warn!(round = round.id(); "aggregation failed, model unchanged: {e}");
                RoundOutcome::NoUpdate
            }
        }
    }

    /// Closes the open round with whatever arrived and releases every session.
    ///
    /// Events still queued are handled first, so a contribution that reached the
    /// coordinator before shutdown still makes it into the final model.
    fn drain(&mut self) {
        self.events.close();
        while let Ok(event) = self.events.try_recv() {
            self.handle(event);
        }

        if let Some(round) = &self.round {
            info!(round = round.id(); "shutting down, closing the open round");
            self.close_round(Instant::now());
        }

        self.members.clear();
        self.pending.clear();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn next_sample(feed: &mut Option<mpsc::Receiver<ExternalSample>>) -> Option<ExternalSample> {
    match feed {
        Some(feed) => feed.recv().await,
        None => future::pending().await,
    }
}
