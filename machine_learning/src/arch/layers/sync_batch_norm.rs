//! Batch normalization over the union of every worker's local batch.
//!
//! Each worker only ever sends per-feature sums: one reduction in the forward pass for the
//! statistics and one in the backward pass for the two gradient contractions. The layer itself
//! holds no mutable state, everything that survives a call lives in a `BatchNormState` owned by
//! the caller.

use comms::Collective;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};

use crate::{MlErr, Result, arch::Mode};

pub const DEFAULT_EPS: f32 = 1e-5;
pub const DEFAULT_MOMENTUM: f32 = 0.1;

/// Lower bound for the global variance, it can underflow below zero when computed from sums.
pub const MIN_VARIANCE: f32 = 1e-5;

/// Pairs a training forward pass with its backward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallId(u64);

impl CallId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// What a training forward pass leaves behind for its backward pass.
#[derive(Debug, Clone)]
struct Pending {
    call: CallId,
    count: f32,
    inv_std: Array1<f32>,
    centered: Array2<f32>,
}

/// The state of one normalization layer: running statistics for evaluation and the slot for the
/// pending backward pass.
#[derive(Debug, Clone)]
pub struct BatchNormState {
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
    pending: Option<Pending>,
    next_call: u64,
}

impl BatchNormState {
    /// Creates the initial state for `dim` features: zero mean and unit variance.
    pub fn new(dim: usize) -> Self {
        Self {
            running_mean: Array1::zeros(dim),
            running_var: Array1::ones(dim),
            pending: None,
            next_call: 0,
        }
    }

    pub fn running_mean(&self) -> ArrayView1<'_, f32> {
        self.running_mean.view()
    }

    pub fn running_var(&self) -> ArrayView1<'_, f32> {
        self.running_var.view()
    }

    /// Returns the call awaiting its backward pass, if any.
    pub fn pending(&self) -> Option<CallId> {
        self.pending.as_ref().map(|p| p.call)
    }
}

/// Synchronized batch normalization, without affine parameters.
#[derive(Debug, Clone, Copy)]
pub struct SyncBatchNorm {
    dim: usize,
    eps: f32,
    momentum: f32,
}

impl SyncBatchNorm {
    /// Creates a new `SyncBatchNorm` over `dim` features with the default epsilon and momentum.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            eps: DEFAULT_EPS,
            momentum: DEFAULT_MOMENTUM,
        }
    }

    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    /// Sets the weight of the newest statistics in the running averages.
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Creates a fresh state for this layer.
    pub fn init_state(&self) -> BatchNormState {
        BatchNormState::new(self.dim)
    }

    /// Normalizes `x` according to `mode`.
    ///
    /// # Returns
    /// The normalized batch and, in `Mode::Train`, the id its backward pass must present.
    pub fn forward(
        &self,
        state: &mut BatchNormState,
        x: ArrayView2<f32>,
        mode: Mode,
        comm: &mut dyn Collective,
    ) -> Result<(Array2<f32>, Option<CallId>)> {
        match mode {
            Mode::Train => {
                let (y, call) = self.forward_train(state, x, comm)?;
                Ok((y, Some(call)))
            }
            Mode::Eval => Ok((self.forward_eval(state, x)?, None)),
        }
    }

    /// Normalizes `x` with the statistics of the global batch and updates the running averages.
    ///
    /// Issues exactly one `reduce_sum` of `1 + 2 * dim` numbers: the local example count
    /// followed by the per-feature sums and sums of squares.
    pub fn forward_train(
        &self,
        state: &mut BatchNormState,
        x: ArrayView2<f32>,
        comm: &mut dyn Collective,
    ) -> Result<(Array2<f32>, CallId)> {
        self.check_width(x.ncols())?;

        if let Some(pending) = &state.pending {
            return Err(MlErr::PendingBackward {
                call: pending.call.get(),
            });
        }

        let dim = self.dim;
        let mut stats = Vec::with_capacity(1 + 2 * dim);
        stats.push(x.nrows() as f32);
        stats.extend(x.sum_axis(Axis(0)));
        stats.extend(x.mapv(|v| v * v).sum_axis(Axis(0)));

        comm.reduce_sum(&mut stats)?;

        let count = stats[0];
        if count == 0.0 {
            return Err(MlErr::EmptyBatch);
        }

        let stats = ArrayView1::from(&stats[1..]);
        let mean = stats.slice(s![..dim]).mapv(|sum| sum / count);
        let mut var = stats.slice(s![dim..]).mapv(|sum_sq| sum_sq / count);
        // NaN must go through the floor untouched.
        var.zip_mut_with(&mean, |v, &m| {
            let raw = *v - m * m;
            *v = if raw < MIN_VARIANCE { MIN_VARIANCE } else { raw };
        });

        let eps = self.eps;
        let inv_std = var.mapv(|v| 1.0 / (v + eps).sqrt());
        let centered = &x - &mean;
        let y = &centered * &inv_std;

        let momentum = self.momentum;
        state
            .running_mean
            .zip_mut_with(&mean, |r, &m| *r = (1.0 - momentum) * *r + momentum * m);
        state
            .running_var
            .zip_mut_with(&var, |r, &v| *r = (1.0 - momentum) * *r + momentum * v);

        let call = CallId(state.next_call);
        state.next_call += 1;
        state.pending = Some(Pending {
            call,
            count,
            inv_std,
            centered,
        });

        Ok((y, call))
    }

    /// Normalizes `x` with the running statistics. Never communicates.
    pub fn forward_eval(&self, state: &BatchNormState, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_width(x.ncols())?;

        let eps = self.eps;
        let inv_std = state.running_var.mapv(|v| 1.0 / (v + eps).sqrt());
        Ok((&x - &state.running_mean) * &inv_std)
    }

    /// Computes the gradient with respect to the input of the forward pass identified by `call`.
    ///
    /// With `N` the global count, `c = x - mean` and `k = 1 / sqrt(var + eps)`:
    ///
    /// `dx = k * (dy - sum(dy) / N - c * k^2 * sum(dy * c) / N)`
    ///
    /// where both sums run over the global batch, so they are reduced across the group with
    /// one `reduce_sum` of `2 * dim` numbers.
    pub fn backward(
        &self,
        state: &mut BatchNormState,
        call: CallId,
        dy: ArrayView2<f32>,
        comm: &mut dyn Collective,
    ) -> Result<Array2<f32>> {
        let pending = match state.pending.take() {
            Some(pending) if pending.call == call => pending,
            other => {
                let expected = other.as_ref().map(|p| p.call.get());
                state.pending = other;

                return Err(MlErr::UnpairedBackward {
                    layer: "sync_batch_norm",
                    got: Some(call.get()),
                    expected,
                });
            }
        };

        let Pending {
            count,
            inv_std,
            centered,
            ..
        } = pending;

        if dy.dim() != centered.dim() {
            return Err(MlErr::SizeMismatch {
                what: "sync_batch_norm gradient rows",
                got: dy.nrows(),
                expected: centered.nrows(),
            });
        }

        let dim = self.dim;
        let mut sums = Vec::with_capacity(2 * dim);
        sums.extend(dy.sum_axis(Axis(0)));
        sums.extend((&dy * &centered).sum_axis(Axis(0)));

        comm.reduce_sum(&mut sums)?;

        let sums = ArrayView1::from(&sums[..]);
        let mean_dy = sums.slice(s![..dim]).mapv(|v| v / count);
        let proj = (&sums.slice(s![dim..]) * &inv_std * &inv_std).mapv(|v| v / count);

        let dx = (&dy - &mean_dy - &centered * &proj) * &inv_std;
        Ok(dx)
    }

    fn check_width(&self, got: usize) -> Result<()> {
        if got != self.dim {
            return Err(MlErr::SizeMismatch {
                what: "sync_batch_norm features",
                got,
                expected: self.dim,
            });
        }

        Ok(())
    }
}
