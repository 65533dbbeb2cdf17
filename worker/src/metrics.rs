use std::time::Duration;

/// Where a worker spent its time.
#[derive(Debug, Default, Clone)]
pub struct WorkerMetrics {
    pub compute_time: Duration,
    pub send_time: Duration,
    /// From the contribution being sent until the model came back.
    pub wait_time: Duration,

    pub steps: u64,
    pub discarded_frames: u64,
}

impl WorkerMetrics {
    #[inline]
    pub fn bump_step(&mut self) {
        self.steps += 1;
    }

    #[inline]
    pub fn bump_discarded(&mut self) {
        self.discarded_frames += 1;
    }

    /// The mean time between sending a contribution and receiving the next model.
    pub fn mean_wait(&self) -> Option<Duration> {
        let steps = u32::try_from(self.steps).ok().filter(|&n| n > 0)?;
        Some(self.wait_time / steps)
    }
}
