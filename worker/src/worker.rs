use std::time::Duration;

use comms::{FrameErr, FrameReceiver, FrameSender};
use log::{debug, info, warn};
use rand::Rng;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::{self, Instant},
};

use crate::{Contributor, Result, WorkerConfig, WorkerErr, contributor::Constant, metrics::WorkerMetrics};

/// What a worker run ended with.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// Rounds completed, a round completes when the model comes back.
    pub rounds: usize,
    pub elapsed: Duration,
    /// The last model received, zeros if none was.
    pub last_model: Vec<f32>,
    /// Whether the run ended because the coordinator closed the connection.
    pub closed_by_peer: bool,
    pub metrics: WorkerMetrics,
}

/// A stop-and-wait worker: compute, send a contribution, wait for the model, repeat.
pub struct Worker {
    worker_id: usize,
    config: WorkerConfig,
    contributor: Box<dyn Contributor>,
}

impl Worker {
    /// Creates a worker that sends `config.value()` in every position.
    ///
    /// # Args
    /// * `worker_id` - Identifier used for observability.
    /// * `config` - The worker's execution bounds.
    ///
    /// # Returns
    /// A new worker instance.
    pub fn new(worker_id: usize, config: WorkerConfig) -> Self {
        let contributor = Box::new(Constant(config.value()));
        Self {
            worker_id,
            config,
            contributor,
        }
    }

    /// Replaces how contributions are produced.
    pub fn with_contributor<C: Contributor + 'static>(mut self, contributor: C) -> Self {
        self.contributor = Box::new(contributor);
        self
    }

    /// Runs rounds against the coordinator until the configured steps are done
    /// or the coordinator closes the connection.
    ///
    /// # Args
    /// * `rx` - Receiving end of the coordinator channel.
    /// * `tx` - Sending end of the coordinator channel.
    ///
    /// # Returns
    /// A report of the run on graceful completion.
    ///
    /// # Errors
    /// Returns `WorkerErr` on I/O failures or if the model comes back with the wrong length.
    pub async fn run<R, W>(
        &mut self,
        mut rx: FrameReceiver<R>,
        mut tx: FrameSender<W>,
    ) -> Result<WorkerReport>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let worker_id = self.worker_id;
        let dimension = self.config.dimension();
        let started = Instant::now();

        let mut metrics = WorkerMetrics::default();
        let mut model = vec![0.; dimension];
        let mut closed_by_peer = false;
        let mut step = 0;

        while self.config.steps().is_none_or(|steps| step < steps) {
            let now = Instant::now();
            time::sleep(self.config.delay() + self.jitter()).await;
            let contribution = self.contributor.contribute(step, &model);
            metrics.compute_time += now.elapsed();

            let now = Instant::now();
            match tx.send(&contribution).await {
                Ok(()) => {}
                Err(FrameErr::Io(e)) if is_peer_gone(&e) => {
                    info!(worker_id = worker_id; "coordinator went away while sending: {e}");
                    closed_by_peer = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            metrics.send_time += now.elapsed();
            debug!(worker_id = worker_id, step = step; "contribution sent");

            let now = Instant::now();
            let Some(received) = Self::recv_model(worker_id, &mut rx, &mut metrics).await? else {
                info!(worker_id = worker_id; "coordinator closed the connection");
                closed_by_peer = true;
                break;
            };
            metrics.wait_time += now.elapsed();

            if received.len() != dimension {
                return Err(WorkerErr::ModelLengthMismatch {
                    step,
                    got: received.len(),
                    expected: dimension,
                });
            }

            model = received;
            metrics.bump_step();
            step += 1;
        }

        if !closed_by_peer {
            if let Err(e) = tx.shutdown().await {
                debug!(worker_id = worker_id; "shutdown failed: {e}");
            }
        }

        info!(worker_id = worker_id; "worker finished after {step} rounds");

        Ok(WorkerReport {
            rounds: step,
            elapsed: started.elapsed(),
            last_model: model,
            closed_by_peer,
            metrics,
        })
    }

    /// Waits for the next model, skipping malformed frames.
    ///
    /// # Returns
    /// `None` if the coordinator closed the connection.
    async fn recv_model<R>(
        worker_id: usize,
        rx: &mut FrameReceiver<R>,
        metrics: &mut WorkerMetrics,
    ) -> Result<Option<Vec<f32>>>
    where
        R: AsyncRead + Unpin + Send,
    {
        loop {
            match rx.recv().await {
                Ok(model) => return Ok(Some(model)),
                Err(FrameErr::PeerClosed) => return Ok(None),
                Err(FrameErr::Io(e)) if is_peer_gone(&e) => return Ok(None),
                Err(e) if e.is_recoverable() => {
                    warn!(worker_id = worker_id; "discarding frame: {e}");
                    metrics.bump_discarded();
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn jitter(&self) -> Duration {
        let max = self.config.jitter();
        if max.is_zero() {
            return Duration::ZERO;
        }

        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

fn is_peer_gone(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        e.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}
