use std::sync::Arc;

use tokio::{sync::mpsc, time::Instant};

use crate::WorkerId;

/// Everything a session reports to the round coordinator.
#[derive(Debug)]
pub(crate) enum Event {
    /// A new session wants to take part, starting with the next round.
    Joined {
        id: WorkerId,
        outbound: mpsc::UnboundedSender<Arc<[f32]>>,
    },
    /// A decoded contribution, stamped with its arrival time.
    Contribution {
        id: WorkerId,
        vector: Vec<f32>,
        arrived: Instant,
    },
    /// The worker sent a malformed frame, it counts as its response but carries no data.
    Discarded { id: WorkerId },
    /// The session ended, its connection is closed.
    Left { id: WorkerId },
}
