use std::collections::BTreeMap;

use crate::{WorkerId, error::AggregationErr};

/// Combines the contributions collected in a round into the next model.
///
/// Implementations must only depend on the set of contributions, never on the
/// order in which they arrived.
pub trait Aggregator: Send {
    /// Aggregates `contributions` into a new model.
    ///
    /// # Arguments
    /// * `contributions` - Every accepted contribution of the round, keyed by worker.
    /// * `dimension` - The length of the model, contributions of any other length are skipped.
    ///
    /// # Returns
    /// The new model, or an `AggregationErr` if no usable model could be produced.
    fn aggregate(
        &self,
        contributions: &BTreeMap<WorkerId, Vec<f32>>,
        dimension: usize,
    ) -> Result<Vec<f32>, AggregationErr>;
}
