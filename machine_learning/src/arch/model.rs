use comms::Collective;
use ndarray::{Array2, ArrayView2};

use crate::{error::Result, params::ParamStore};

/// Whether a forward pass is part of a training step or only evaluates the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Layers cache what their backward pass needs, normalization layers synchronize their
    /// statistics with the rest of the group.
    Train,
    /// No caching and no communication.
    Eval,
}

pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Returns the model's parameters and gradients.
    fn params(&self) -> &ParamStore;

    fn params_mut(&mut self) -> &mut ParamStore;

    /// Makes a forward pass through the model.
    ///
    /// # Arguments
    /// * `x` - A batch of inputs, one row per example.
    /// * `mode` - Whether this pass will be followed by a backward pass.
    /// * `comm` - The process group, only used in `Mode::Train`.
    ///
    /// # Returns
    /// The output for every example in `x`.
    fn forward(
        &mut self,
        x: ArrayView2<f32>,
        mode: Mode,
        comm: &mut dyn Collective,
    ) -> Result<Array2<f32>>;

    /// Makes a backward pass, writing the parameters' gradients into the model's `ParamStore`.
    ///
    /// # Arguments
    /// * `d` - The gradient of the loss with respect to the output of the last training forward
    ///         pass.
    /// * `comm` - The process group.
    ///
    /// # Returns
    /// The gradient of the loss with respect to the input of the model.
    fn backward(&mut self, d: Array2<f32>, comm: &mut dyn Collective) -> Result<Array2<f32>>;
}
