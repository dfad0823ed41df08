use ndarray::{Array2, ArrayView2};

use crate::Result;

/// A classification loss over a batch of logits, one row per example.
pub trait LossFn {
    /// Returns the mean loss over the batch.
    fn loss(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<f32>;

    /// Returns the gradient of `loss` with respect to `logits`.
    fn loss_prime(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<Array2<f32>>;

    /// Returns the summed loss over the batch and the amount of examples whose highest logit is
    /// their label.
    fn evaluate(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<(f32, usize)>;
}
