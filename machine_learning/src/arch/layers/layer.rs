use comms::Collective;
use ndarray::{Array2, ArrayView2};

use super::{BatchNormState, CallId, Dense, Relu, SyncBatchNorm};
use crate::{MlErr, Result, arch::Mode, params::ParamStore};

/// A synchronized batch normalization together with its state and the id of the forward pass
/// awaiting its backward pass.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    layer: SyncBatchNorm,
    state: BatchNormState,
    call: Option<CallId>,
}

impl BatchNorm {
    pub fn new(layer: SyncBatchNorm) -> Self {
        Self {
            state: layer.init_state(),
            layer,
            call: None,
        }
    }

    /// Returns the amount of normalized features.
    pub fn dim(&self) -> usize {
        self.layer.dim()
    }

    pub fn state(&self) -> &BatchNormState {
        &self.state
    }
}

#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
    Relu(Relu),
    BatchNorm(BatchNorm),
}
use Layer::*;

impl Layer {
    pub fn relu() -> Self {
        Self::Relu(Relu::new())
    }

    pub fn sync_batch_norm(dim: usize) -> Self {
        Self::BatchNorm(BatchNorm::new(SyncBatchNorm::new(dim)))
    }

    pub fn forward(
        &mut self,
        store: &ParamStore,
        x: ArrayView2<f32>,
        mode: Mode,
        comm: &mut dyn Collective,
    ) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.forward(store, x, mode),
            Relu(l) => Ok(l.forward(x, mode)),
            BatchNorm(l) => {
                let (y, call) = l.layer.forward(&mut l.state, x, mode, comm)?;
                if call.is_some() {
                    l.call = call;
                }

                Ok(y)
            }
        }
    }

    pub fn backward(
        &mut self,
        store: &mut ParamStore,
        d: Array2<f32>,
        comm: &mut dyn Collective,
    ) -> Result<Array2<f32>> {
        match self {
            Dense(l) => l.backward(store, d.view()),
            Relu(l) => l.backward(d),
            BatchNorm(l) => {
                let call = l.call.take().ok_or(MlErr::UnpairedBackward {
                    layer: "sync_batch_norm",
                    got: None,
                    expected: l.state.pending().map(CallId::get),
                })?;

                l.layer.backward(&mut l.state, call, d.view(), comm)
            }
        }
    }
}
