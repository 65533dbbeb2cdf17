use std::sync::Arc;

use comms::{FrameReceiver, FrameSender};
use log::{info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    task::{JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;

use super::{CoordinatorBuilder, Event};
use crate::{WorkerId, model::Model, session::WorkerSession, telemetry::Metrics};

/// The handle to a running coordinator, it owns every session task and the round task.
pub struct Coordinator {
    pub(super) events: mpsc::Sender<Event>,
    pub(super) sessions: JoinSet<()>,
    pub(super) rounds: JoinHandle<()>,
    pub(super) model: Model,
    pub(super) metrics: Metrics,
    pub(super) shutdown: CancellationToken,
    pub(super) stop_reading: CancellationToken,
    pub(super) flushed: mpsc::Sender<()>,
    pub(super) flushed_rx: mpsc::Receiver<()>,
    pub(super) next_id: WorkerId,
    pub(super) max_malformed: usize,
    pub(super) max_frame_len: usize,
}

impl Coordinator {
    /// Returns a builder for a coordinator holding a model of `dimension` parameters.
    pub fn builder(dimension: usize) -> CoordinatorBuilder {
        CoordinatorBuilder::new(dimension)
    }

    /// Binds a new worker to this coordinator and spawns its session task.
    ///
    /// The worker takes part starting with the next round that opens.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the communication.
    /// * `tx` - The sending end of the communication.
    ///
    /// # Returns
    /// The id assigned to the worker.
    pub fn spawn<R, W>(&mut self, mut rx: FrameReceiver<R>, tx: FrameSender<W>) -> WorkerId
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;

        rx.set_max_len(self.max_frame_len);
        let session = WorkerSession::new(id, rx, tx, self.max_malformed);
        let events = self.events.clone();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let stop_reading = self.stop_reading.clone();
        let flushed = self.flushed.clone();

        self.sessions.spawn(async move {
            let joined = Event::Joined {
                id,
                outbound: outbound_tx,
            };

            if events.send(joined).await.is_ok() {
                session.run(events, outbound_rx, stop_reading, flushed).await;
            }
        });

        while let Some(res) = self.sessions.try_join_next() {
            if let Err(e) = res {
                warn!("session task failed: {e}");
            }
        }

        id
    }

    /// The shared model, readable at any time.
    pub fn model(&self) -> Model {
        self.model.clone()
    }

    /// The in-memory counters of closed rounds.
    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    /// Cancelling this token stops the round task right away, prefer `shutdown`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Closes the open round with what it has, releases every worker and waits for all tasks.
    ///
    /// Sessions first forward whatever their workers already sent, so those
    /// contributions are part of the final model.
    ///
    /// # Returns
    /// The final model.
    pub async fn shutdown(self) -> Arc<[f32]> {
        let Self {
            events,
            mut sessions,
            rounds,
            model,
            shutdown,
            stop_reading,
            flushed,
            mut flushed_rx,
            ..
        } = self;

        stop_reading.cancel();
        drop(flushed);
        // closes once every session dropped its sender
        while flushed_rx.recv().await.is_some() {}

        shutdown.cancel();
        drop(events);

        if let Err(e) = rounds.await {
            warn!("round task failed: {e}");
        }

        while let Some(res) = sessions.join_next().await {
            if let Err(e) = res {
                warn!("session task failed: {e}");
            }
        }

        info!("coordinator stopped after round {}", model.round());
        model.snapshot()
    }
}
