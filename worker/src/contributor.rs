/// Produces the vector a worker sends each round.
pub trait Contributor: Send {
    /// # Arguments
    /// * `step` - How many rounds this worker completed so far.
    /// * `model` - The last model received, zeros before the first round.
    ///
    /// # Returns
    /// The contribution, it must have the model's dimensionality.
    fn contribute(&mut self, step: usize, model: &[f32]) -> Vec<f32>;
}

/// Always sends the same value in every position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant(pub f32);

impl Contributor for Constant {
    fn contribute(&mut self, _step: usize, model: &[f32]) -> Vec<f32> {
        vec![self.0; model.len()]
    }
}
