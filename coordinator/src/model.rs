use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Debug)]
struct Published {
    round: u64,
    vector: Arc<[f32]>,
}

/// The aggregated model shared between the coordinator and every session.
///
/// Writers swap in a whole new vector, so readers always observe either the
/// previous or the next model and never a partially updated one.
#[derive(Debug, Clone)]
pub struct Model {
    inner: Arc<RwLock<Published>>,
    dimension: usize,
}

impl Model {
    /// Creates a new `Model` filled with zeros.
    ///
    /// # Arguments
    /// * `dimension` - The amount of parameters of the model.
    pub fn zeros(dimension: usize) -> Self {
        Self::from_vec(vec![0.; dimension])
    }

    /// Creates a new `Model` from an initial vector.
    ///
    /// # Arguments
    /// * `vector` - The initial parameters.
    pub fn from_vec(vector: Vec<f32>) -> Self {
        let dimension = vector.len();
        let published = Published {
            round: 0,
            vector: Arc::from(vector),
        };

        Self {
            inner: Arc::new(RwLock::new(published)),
            dimension,
        }
    }

    /// Returns the size of the model.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Takes a read-only snapshot of the current parameters.
    pub fn snapshot(&self) -> Arc<[f32]> {
        Arc::clone(&self.inner.read().vector)
    }

    /// Returns the id of the round that produced the current parameters, `0` for the initial model.
    pub fn round(&self) -> u64 {
        self.inner.read().round
    }

    /// Replaces the current parameters with the outcome of `round`.
    ///
    /// # Arguments
    /// * `round` - The round that produced `vector`.
    /// * `vector` - The new parameters, must be `dimension` long.
    pub(crate) fn publish(&self, round: u64, vector: Vec<f32>) {
        debug_assert_eq!(vector.len(), self.dimension);

        let vector = Arc::from(vector);
        let mut published = self.inner.write();
        published.round = round;
        published.vector = vector;
    }
}
