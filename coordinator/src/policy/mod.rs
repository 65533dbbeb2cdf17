mod latency;
mod straggler;

pub use latency::LatencyTracker;
pub use straggler::{ClosingRule, LatencyAware, StragglerPolicy};
