use std::sync::Arc;

use comms::{FrameErr, FrameReceiver, FrameSender};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    time::{self, Duration, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{WorkerId, service::Event};

/// Where a `WorkerSession` is in the stop-and-wait cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    AwaitingContribution,
    ContributionReceived,
    /// Terminal, a disconnected session is never reused.
    Disconnected,
}

/// The outcome of waiting for a worker's contribution.
#[derive(Debug, PartialEq)]
pub enum Received {
    Contribution(Vec<f32>),
    /// The worker sent a malformed frame, it was dropped and the stream is still usable.
    Discarded,
    Timeout,
    Disconnected,
}

/// Drives one worker connection through repeated rounds.
pub struct WorkerSession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    id: WorkerId,
    rx: FrameReceiver<R>,
    tx: FrameSender<W>,
    state: SessionState,
    closed: bool,
    malformed_streak: usize,
    max_malformed: usize,
}

impl<R, W> WorkerSession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new `WorkerSession`.
    ///
    /// # Arguments
    /// * `id` - The session's identifier.
    /// * `rx` - The receiving end of the worker's connection.
    /// * `tx` - The sending end of the worker's connection.
    /// * `max_malformed` - How many malformed frames in a row the worker may send before being dropped.
    pub fn new(id: WorkerId, rx: FrameReceiver<R>, tx: FrameSender<W>, max_malformed: usize) -> Self {
        Self {
            id,
            rx,
            tx,
            state: SessionState::Connected,
            closed: false,
            malformed_streak: 0,
            max_malformed,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Waits for the worker's next contribution.
    ///
    /// # Arguments
    /// * `timeout` - How long to wait, `None` to wait until something arrives.
    ///
    /// # Returns
    /// The contribution, or why there isn't one. Partially received frames are
    /// kept across timeouts.
    pub async fn receive_contribution(&mut self, timeout: Option<Duration>) -> Received {
        if self.state == SessionState::Disconnected {
            return Received::Disconnected;
        }

        self.state = SessionState::AwaitingContribution;

        let res = match timeout {
            Some(timeout) => match time::timeout(timeout, self.rx.recv()).await {
                Ok(res) => res,
                Err(_) => return Received::Timeout,
            },
            None => self.rx.recv().await,
        };

        match res {
            Ok(vector) => {
                self.malformed_streak = 0;
                self.state = SessionState::ContributionReceived;
                Received::Contribution(vector)
            }
            Err(e @ FrameErr::Malformed { .. }) => {
                self.malformed_streak += 1;
                warn!(
                    worker = self.id;
                    "{e} ({} of {} tolerated)",
                    self.malformed_streak,
                    self.max_malformed
                );

                if self.malformed_streak >= self.max_malformed {
                    self.state = SessionState::Disconnected;
                    return Received::Disconnected;
                }

                self.state = SessionState::ContributionReceived;
                Received::Discarded
            }
            Err(FrameErr::PeerClosed) => {
                info!(worker = self.id; "worker closed the connection");
                self.state = SessionState::Disconnected;
                Received::Disconnected
            }
            Err(e) => {
                warn!(worker = self.id; "dropping worker: {e}");
                self.state = SessionState::Disconnected;
                Received::Disconnected
            }
        }
    }

    /// Sends `model` to the worker.
    ///
    /// # Returns
    /// The write error, in which case the session is now `Disconnected`.
    pub async fn send_model(&mut self, model: &[f32]) -> comms::Result<()> {
        if self.state == SessionState::Disconnected {
            return Err(FrameErr::PeerClosed);
        }

        if let Err(e) = self.tx.send(model).await {
            warn!(worker = self.id; "failed to send model: {e}");
            self.state = SessionState::Disconnected;
            return Err(e);
        }

        self.state = SessionState::AwaitingContribution;
        Ok(())
    }

    /// Closes the connection, the session becomes `Disconnected`.
    ///
    /// Only the first call touches the connection.
    pub async fn close(&mut self) {
        self.state = SessionState::Disconnected;
        if self.closed {
            return;
        }

        self.closed = true;
        if let Err(e) = self.tx.shutdown().await {
            debug!(worker = self.id; "shutdown failed: {e}");
        }
    }

    /// Forwards every frame already buffered on the connection, without waiting for more.
    ///
    /// # Returns
    /// `false` if the session can't go on, the connection or the coordinator is gone.
    async fn flush(&mut self, events: &mpsc::Sender<Event>) -> bool {
        let id = self.id;

        loop {
            let event = match self.receive_contribution(Some(Duration::ZERO)).await {
                Received::Contribution(vector) => Event::Contribution {
                    id,
                    vector,
                    arrived: Instant::now(),
                },
                Received::Discarded => Event::Discarded { id },
                Received::Timeout => return true,
                Received::Disconnected => return false,
            };

            if events.send(event).await.is_err() {
                return false;
            }
        }
    }

    /// Runs the session until either side goes away.
    ///
    /// Contributions are forwarded to the round coordinator through `events`, models
    /// arriving on `outbound` are written back to the worker. The session ends when
    /// the connection fails or when the coordinator drops its end of `outbound`.
    ///
    /// Once `stop_reading` is cancelled the session forwards what the worker already
    /// sent, drops `flushed` and from then on only delivers models.
    ///
    /// # Arguments
    /// * `events` - The coordinator's event queue.
    /// * `outbound` - The models to deliver to this worker.
    /// * `stop_reading` - Cancelled when the coordinator starts shutting down.
    /// * `flushed` - Held until nothing more will be read from the worker.
    pub(crate) async fn run(
        mut self,
        events: mpsc::Sender<Event>,
        mut outbound: mpsc::UnboundedReceiver<Arc<[f32]>>,
        stop_reading: CancellationToken,
        flushed: mpsc::Sender<()>,
    ) {
        let id = self.id;
        let mut flushed = Some(flushed);

        loop {
            tokio::select! {
                received = self.receive_contribution(None), if flushed.is_some() => {
                    let event = match received {
                        Received::Contribution(vector) => Event::Contribution {
                            id,
                            vector,
                            arrived: Instant::now(),
                        },
                        Received::Discarded => Event::Discarded { id },
                        Received::Timeout => continue,
                        Received::Disconnected => break,
                    };

                    if events.send(event).await.is_err() {
                        break;
                    }
                }
                _ = stop_reading.cancelled(), if flushed.is_some() => {
                    if !self.flush(&events).await {
                        break;
                    }

                    debug!(worker = id; "session flushed, waiting for the last model");
                    flushed = None;
                }
                model = outbound.recv() => {
                    let Some(model) = model else {
                        debug!(worker = id; "coordinator released the session");
                        break;
                    };

                    if self.send_model(&model).await.is_err() {
                        break;
                    }
                }
            }
        }

        drop(flushed);
        self.close().await;
        let _ = events.send(Event::Left { id }).await;
    }
}
