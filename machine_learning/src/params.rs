use std::{mem, ops::Range};

use crate::{MlErr, Result, optimization::Optimizer};

/// Identifies a trainable tensor inside a `ParamStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamId(usize);

/// A trainable tensor: a named range of the store's flat buffers.
#[derive(Debug, Clone)]
pub struct ParamEntry {
    name: String,
    range: Range<usize>,
    has_grad: bool,
}

impl ParamEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Whether the last backward pass produced a gradient for this tensor.
    pub fn has_grad(&self) -> bool {
        self.has_grad
    }
}

/// Owns every trainable parameter of a model and its gradient.
///
/// Parameters and gradients live in two flat buffers of the same length. The ordered list of
/// entries describing which range belongs to which tensor is built once, while the model is
/// assembled, and every traversal (gradient synchronization, optimization, broadcasting) follows
/// that order.
#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    params: Vec<f32>,
    grads: Vec<f32>,
    entries: Vec<ParamEntry>,
}

impl ParamStore {
    /// Creates a new empty `ParamStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new tensor to the store.
    ///
    /// # Arguments
    /// * `name` - A human readable name, used for diagnostics.
    /// * `values` - The initial values of the tensor.
    ///
    /// # Returns
    /// The id used to access the tensor afterwards.
    pub fn register(&mut self, name: impl Into<String>, values: Vec<f32>) -> ParamId {
        let start = self.params.len();
        self.params.extend(values);
        self.grads.resize(self.params.len(), 0.0);

        self.entries.push(ParamEntry {
            name: name.into(),
            range: start..self.params.len(),
            has_grad: false,
        });

        ParamId(self.entries.len() - 1)
    }

    /// Returns the amount of registered tensors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the total amount of parameters.
    pub fn size(&self) -> usize {
        self.params.len()
    }

    pub fn entries(&self) -> &[ParamEntry] {
        &self.entries
    }

    pub fn param(&self, id: ParamId) -> &[f32] {
        &self.params[self.entries[id.0].range()]
    }

    /// Returns the gradient of a tensor, `None` if the last backward pass didn't produce one.
    pub fn grad(&self, id: ParamId) -> Option<&[f32]> {
        let entry = &self.entries[id.0];
        entry.has_grad.then(|| &self.grads[entry.range()])
    }

    /// Returns the gradient buffer of a tensor for writing, marking it as defined.
    pub fn grad_mut(&mut self, id: ParamId) -> &mut [f32] {
        let entry = &mut self.entries[id.0];
        entry.has_grad = true;
        &mut self.grads[entry.range.clone()]
    }

    /// Returns every parameter as one flat slice.
    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    /// Returns every gradient as one flat slice, undefined gradients read as zero.
    pub fn grads(&self) -> &[f32] {
        &self.grads
    }

    /// Resets every gradient to zero and marks them all as undefined.
    pub fn zero_grad(&mut self) {
        self.grads.fill(0.0);
        self.entries.iter_mut().for_each(|e| e.has_grad = false);
    }

    /// Iterates the defined gradients in registration order.
    pub fn defined_grads_mut(&mut self) -> impl Iterator<Item = (&ParamEntry, &mut [f32])> {
        let mut rest = self.grads.as_mut_slice();
        let mut offset = 0;

        self.entries.iter().filter_map(move |entry| {
            let (grad, tail) = mem::take(&mut rest).split_at_mut(entry.range.end - offset);
            rest = tail;
            offset = entry.range.end;
            entry.has_grad.then_some((entry, grad))
        })
    }

    /// Applies the defined gradients onto the parameters, tensors without a gradient are left
    /// untouched.
    ///
    /// # Arguments
    /// * `optimizers` - One optimizer per registered tensor, in registration order.
    pub fn optimize<O: Optimizer>(&mut self, optimizers: &mut [O]) -> Result<()> {
        if optimizers.len() != self.entries.len() {
            return Err(MlErr::SizeMismatch {
                what: "optimizers",
                got: optimizers.len(),
                expected: self.entries.len(),
            });
        }

        for (entry, optimizer) in self.entries.iter().zip(optimizers) {
            if !entry.has_grad {
                continue;
            }

            let range = entry.range();
            optimizer.update_params(&mut self.params[range.clone()], &self.grads[range]);
        }

        Ok(())
    }
}
