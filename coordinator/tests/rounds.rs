use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use comms::{FrameErr, FrameReceiver, FrameSender};
use coordinator::{
    Coordinator, WorkerId,
    policy::{ClosingRule, LatencyAware, LatencyTracker, StragglerPolicy},
    telemetry::{ExternalSample, RoundOutcome, RoundSummary, TelemetrySink},
};
use tokio::{
    io::{self, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf},
    sync::mpsc,
    time,
};

type Rx = FrameReceiver<ReadHalf<DuplexStream>>;
type Tx = FrameSender<WriteHalf<DuplexStream>>;

/// Binds an in-memory worker to `coordinator`, returning the worker's end.
fn connect(coordinator: &mut Coordinator) -> (Rx, Tx) {
    let (server, client) = io::duplex(4096);
    let (rx, tx) = io::split(server);
    let (rx, tx) = comms::channel(rx, tx);
    coordinator.spawn(rx, tx);

    let (rx, tx) = io::split(client);
    comms::channel(rx, tx)
}

fn latency_aware(base_ms: u64, grace_ms: u64) -> StragglerPolicy {
    let rule = ClosingRule::LatencyAware(LatencyAware {
        base_round_budget: Duration::from_millis(base_ms),
        percentile: 0.75,
        grace: Duration::from_millis(grace_ms),
    });
    StragglerPolicy::new(rule, LatencyTracker::new(0.3, Duration::ZERO))
}

#[derive(Clone, Default)]
struct Recorder {
    latencies: Arc<Mutex<Vec<(u64, WorkerId)>>>,
    rounds: Arc<Mutex<Vec<RoundSummary>>>,
}

impl TelemetrySink for Recorder {
    fn record_latency(&mut self, round: u64, worker: WorkerId, _latency: Duration) {
        self.latencies.lock().unwrap().push((round, worker));
    }

    fn record_round(&mut self, summary: &RoundSummary) {
        self.rounds.lock().unwrap().push(summary.clone());
    }
}

#[tokio::test]
async fn three_workers_average_to_the_mean() {
    let mut coordinator = Coordinator::builder(3)
        .policy(StragglerPolicy::barrier())
        .min_workers(3)
        .build();

    let mut workers: Vec<_> = (0..3).map(|_| connect(&mut coordinator)).collect();

    for ((_, tx), value) in workers.iter_mut().zip([1., 2., 3.]) {
        tx.send(&[value; 3]).await.unwrap();
    }

    for (rx, _) in &mut workers {
        assert_eq!(rx.recv().await.unwrap(), vec![2., 2., 2.]);
    }

    let model = coordinator.model();
    assert_eq!(&*model.snapshot(), &[2., 2., 2.]);
    assert_eq!(model.round(), 1);

    let final_model = coordinator.shutdown().await;
    assert_eq!(&*final_model, &[2., 2., 2.]);
}

#[tokio::test]
async fn successive_rounds_keep_going() {
    let mut coordinator = Coordinator::builder(2)
        .policy(StragglerPolicy::barrier())
        .min_workers(2)
        .build();

    let (mut rx1, mut tx1) = connect(&mut coordinator);
    let (mut rx2, mut tx2) = connect(&mut coordinator);

    for round in 1..=3 {
        let base = round as f32;
        tx1.send(&[base, 0.]).await.unwrap();
        tx2.send(&[base + 2., 0.]).await.unwrap();

        let expected = vec![base + 1., 0.];
        assert_eq!(rx1.recv().await.unwrap(), expected);
        assert_eq!(rx2.recv().await.unwrap(), expected);
    }

    assert_eq!(coordinator.model().round(), 3);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn disconnect_mid_round_does_not_block_the_barrier() {
    let recorder = Recorder::default();
    let mut coordinator = Coordinator::builder(2)
        .policy(StragglerPolicy::barrier())
        .min_workers(3)
        .sink(recorder.clone())
        .build();

    let (mut rx1, mut tx1) = connect(&mut coordinator);
    let (mut rx2, mut tx2) = connect(&mut coordinator);
    let leaving = connect(&mut coordinator);

    tx1.send(&[1., 1.]).await.unwrap();
    tx2.send(&[3., 3.]).await.unwrap();
    drop(leaving);

    assert_eq!(rx1.recv().await.unwrap(), vec![2., 2.]);
    assert_eq!(rx2.recv().await.unwrap(), vec![2., 2.]);

    // the next round only invites the workers still connected
    tx1.send(&[5., 5.]).await.unwrap();
    tx2.send(&[7., 7.]).await.unwrap();

    assert_eq!(rx1.recv().await.unwrap(), vec![6., 6.]);
    assert_eq!(rx2.recv().await.unwrap(), vec![6., 6.]);

    let rounds = recorder.rounds.lock().unwrap().clone();
    assert_eq!(rounds.len(), 2);
    assert_eq!(rounds[0].expected.len(), 3);
    assert_eq!(rounds[0].contributed.len(), 2);
    assert_eq!(rounds[0].outcome, RoundOutcome::Updated);
    assert_eq!(rounds[1].expected, vec![0, 1]);
    assert_eq!(rounds[1].contributed, vec![0, 1]);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn min_workers_only_holds_back_the_first_round() {
    let mut coordinator = Coordinator::builder(1)
        .policy(StragglerPolicy::barrier())
        .min_workers(3)
        .build();

    let (mut rx1, mut tx1) = connect(&mut coordinator);
    let (mut rx2, mut tx2) = connect(&mut coordinator);
    let leaving = connect(&mut coordinator);

    tx1.send(&[1.]).await.unwrap();
    tx2.send(&[3.]).await.unwrap();
    drop(leaving);

    assert_eq!(rx1.recv().await.unwrap(), vec![2.]);
    assert_eq!(rx2.recv().await.unwrap(), vec![2.]);

    tx1.send(&[5.]).await.unwrap();
    tx2.send(&[5.]).await.unwrap();

    let reply = time::timeout(Duration::from_secs(3600), rx1.recv()).await;
    assert_eq!(reply.unwrap().unwrap(), vec![5.]);
    assert_eq!(rx2.recv().await.unwrap(), vec![5.]);
    assert_eq!(coordinator.metrics().rounds(), 2);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn parked_contribution_is_labelled_with_the_round_it_lands_in() {
    let recorder = Recorder::default();
    let mut coordinator = Coordinator::builder(1)
        .policy(StragglerPolicy::barrier())
        .sink(recorder.clone())
        .build();

    let (mut rx1, mut tx1) = connect(&mut coordinator);
    time::sleep(Duration::from_millis(1)).await;

    // joins while round 1 is open, so its vector waits for round 2
    let (mut rx2, mut tx2) = connect(&mut coordinator);
    tx2.send(&[3.]).await.unwrap();
    time::sleep(Duration::from_millis(1)).await;

    tx1.send(&[1.]).await.unwrap();
    assert_eq!(rx1.recv().await.unwrap(), vec![1.]);

    tx1.send(&[5.]).await.unwrap();
    assert_eq!(rx1.recv().await.unwrap(), vec![4.]);
    assert_eq!(rx2.recv().await.unwrap(), vec![4.]);

    let latencies = recorder.latencies.lock().unwrap().clone();
    assert_eq!(latencies, vec![(2, 1), (1, 0), (2, 0)]);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_counts_as_a_response() {
    let mut coordinator = Coordinator::builder(2)
        .policy(StragglerPolicy::barrier())
        .min_workers(2)
        .build();

    let (server, mut raw) = io::duplex(4096);
    let (srx, stx) = io::split(server);
    let (srx, stx) = comms::channel(srx, stx);
    coordinator.spawn(srx, stx);
    let (mut rx, mut tx) = connect(&mut coordinator);

    let mut bad = 6u64.to_be_bytes().to_vec();
    bad.extend_from_slice(&[0xff; 6]);
    raw.write_all(&bad).await.unwrap();
    tx.send(&[4., 4.]).await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), vec![4., 4.]);
    assert_eq!(comms::decode(&mut raw).await.unwrap(), vec![4., 4.]);

    // the stream stayed aligned, the next round accepts this worker again
    raw.write_all(&comms::encode(&[0., 0.])).await.unwrap();
    tx.send(&[2., 2.]).await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), vec![1., 1.]);
    assert_eq!(comms::decode(&mut raw).await.unwrap(), vec![1., 1.]);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn wrong_dimension_is_discarded_but_answered() {
    let mut coordinator = Coordinator::builder(2)
        .policy(StragglerPolicy::barrier())
        .min_workers(2)
        .build();

    let (mut rx1, mut tx1) = connect(&mut coordinator);
    let (mut rx2, mut tx2) = connect(&mut coordinator);

    tx1.send(&[9., 9., 9.]).await.unwrap();
    tx2.send(&[5., 5.]).await.unwrap();

    assert_eq!(rx1.recv().await.unwrap(), vec![5., 5.]);
    assert_eq!(rx2.recv().await.unwrap(), vec![5., 5.]);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn barrier_never_closes_on_time() {
    let mut coordinator = Coordinator::builder(1)
        .policy(StragglerPolicy::barrier())
        .min_workers(2)
        .build();

    let (mut rx1, mut tx1) = connect(&mut coordinator);
    let (mut rx2, mut tx2) = connect(&mut coordinator);

    tx1.send(&[1.]).await.unwrap();
    time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(coordinator.model().round(), 0);
    assert_eq!(coordinator.metrics().rounds(), 0);

    tx2.send(&[3.]).await.unwrap();

    assert_eq!(rx1.recv().await.unwrap(), vec![2.]);
    assert_eq!(rx2.recv().await.unwrap(), vec![2.]);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn latency_aware_closes_at_the_deadline() {
    let mut coordinator = Coordinator::builder(2)
        .policy(latency_aware(100, 100))
        .min_workers(2)
        .build();
    let metrics = coordinator.metrics();

    let (mut fast_rx, mut fast_tx) = connect(&mut coordinator);
    let (_slow_rx, _slow_tx) = connect(&mut coordinator);

    let start = time::Instant::now();
    fast_tx.send(&[8., 8.]).await.unwrap();

    assert_eq!(fast_rx.recv().await.unwrap(), vec![8., 8.]);
    assert!(start.elapsed() >= Duration::from_millis(100));

    let counters = metrics.snapshot();
    assert_eq!(counters.rounds, 1);
    assert_eq!(counters.misses_of(1), 1);
    assert_eq!(counters.misses_of(0), 0);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn external_latency_stretches_the_deadline() {
    let rule = ClosingRule::LatencyAware(LatencyAware {
        base_round_budget: Duration::from_millis(50),
        percentile: 1.,
        grace: Duration::from_millis(50),
    });
    let policy = StragglerPolicy::new(rule, LatencyTracker::new(0.3, Duration::ZERO));
    let (feed_tx, feed_rx) = mpsc::channel(8);

    let mut coordinator = Coordinator::builder(1)
        .policy(policy)
        .min_workers(2)
        .latency_feed(feed_rx)
        .build();
    let metrics = coordinator.metrics();

    let sample = ExternalSample {
        worker: 1,
        latency_ns: 300_000_000,
    };
    feed_tx.send(sample).await.unwrap();
    time::sleep(Duration::from_millis(1)).await;

    let (mut fast_rx, mut fast_tx) = connect(&mut coordinator);
    let _slow = connect(&mut coordinator);

    let start = time::Instant::now();
    fast_tx.send(&[1.]).await.unwrap();

    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(metrics.rounds(), 0);

    assert_eq!(fast_rx.recv().await.unwrap(), vec![1.]);
    assert!(start.elapsed() >= Duration::from_millis(300));

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn straggler_joins_a_later_round() {
    let mut coordinator = Coordinator::builder(1)
        .policy(latency_aware(100, 100))
        .min_workers(2)
        .build();

    let (mut fast_rx, mut fast_tx) = connect(&mut coordinator);
    let (mut slow_rx, mut slow_tx) = connect(&mut coordinator);

    fast_tx.send(&[2.]).await.unwrap();
    assert_eq!(fast_rx.recv().await.unwrap(), vec![2.]);

    // the straggler's late vector goes to the round that is open now
    slow_tx.send(&[6.]).await.unwrap();
    fast_tx.send(&[4.]).await.unwrap();

    assert_eq!(fast_rx.recv().await.unwrap(), vec![5.]);
    assert_eq!(slow_rx.recv().await.unwrap(), vec![5.]);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn empty_round_extends_once_then_leaves_the_model_alone() {
    let recorder = Recorder::default();
    let mut coordinator = Coordinator::builder(2)
        .policy(latency_aware(100, 50))
        .sink(recorder.clone())
        .build();

    let _idle = connect(&mut coordinator);

    time::sleep(Duration::from_millis(120)).await;
    assert!(recorder.rounds.lock().unwrap().is_empty());

    time::sleep(Duration::from_millis(80)).await;
    let rounds = recorder.rounds.lock().unwrap().clone();
    assert_eq!(rounds.len(), 1);
    assert_eq!(rounds[0].outcome, RoundOutcome::NoUpdate);
    assert_eq!(rounds[0].missed, vec![0]);

    let model = coordinator.model();
    assert_eq!(model.round(), 0);
    assert_eq!(&*model.snapshot(), &[0., 0.]);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_the_open_round_and_releases_workers() {
    let mut coordinator = Coordinator::builder(2)
        .policy(StragglerPolicy::barrier())
        .min_workers(2)
        .build();

    let (mut rx1, mut tx1) = connect(&mut coordinator);
    let (mut rx2, _tx2) = connect(&mut coordinator);

    // shut down right away, the vector already sent still counts
    tx1.send(&[6., 6.]).await.unwrap();

    let final_model = coordinator.shutdown().await;
    assert_eq!(&*final_model, &[6., 6.]);

    assert_eq!(rx1.recv().await.unwrap(), vec![6., 6.]);
    assert!(matches!(rx1.recv().await, Err(FrameErr::PeerClosed)));
    assert!(matches!(rx2.recv().await, Err(FrameErr::PeerClosed)));
}

#[tokio::test]
async fn too_many_malformed_frames_drop_the_worker() {
    let mut coordinator = Coordinator::builder(1)
        .policy(StragglerPolicy::barrier())
        .max_malformed(2)
        .build();

    let (server, mut raw) = io::duplex(4096);
    let (srx, stx) = io::split(server);
    let (srx, stx) = comms::channel(srx, stx);
    coordinator.spawn(srx, stx);

    let mut bad = 2u64.to_be_bytes().to_vec();
    bad.extend_from_slice(&[0; 2]);

    raw.write_all(&bad).await.unwrap();
    // first malformed frame is answered with the unchanged model
    assert_eq!(comms::decode(&mut raw).await.unwrap(), vec![0.]);

    raw.write_all(&bad).await.unwrap();
    assert!(matches!(
        comms::decode(&mut raw).await,
        Err(FrameErr::PeerClosed)
    ));

    coordinator.shutdown().await;
}
