use comms::Collective;
use ndarray::{Array2, ArrayView2};
use rand::{SeedableRng, rngs::StdRng};

use super::{
    Mode, Model,
    layers::{Dense, Layer},
};
use crate::{Result, params::ParamStore};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the gradients of its layers.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
    store: ParamStore,
}

impl Sequential {
    /// Starts building a `Sequential` whose input has `features` columns.
    pub fn builder(features: usize) -> SequentialBuilder {
        SequentialBuilder {
            width: features,
            specs: Vec::new(),
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.store.size()
    }

    fn params(&self) -> &ParamStore {
        &self.store
    }

    fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.store
    }

    fn forward(
        &mut self,
        x: ArrayView2<f32>,
        mode: Mode,
        comm: &mut dyn Collective,
    ) -> Result<Array2<f32>> {
        let mut layers = self.layers.iter_mut();
        let Some(first) = layers.next() else {
            return Ok(x.to_owned());
        };

        let mut x = first.forward(&self.store, x, mode, comm)?;
        for layer in layers {
            x = layer.forward(&self.store, x.view(), mode, comm)?;
        }

        Ok(x)
    }

    fn backward(&mut self, mut d: Array2<f32>, comm: &mut dyn Collective) -> Result<Array2<f32>> {
        for layer in self.layers.iter_mut().rev() {
            d = layer.backward(&mut self.store, d, comm)?;
        }

        Ok(d)
    }
}

#[derive(Debug, Clone, Copy)]
enum LayerSpec {
    Dense(usize, usize),
    Relu,
    SyncBatchNorm(usize),
}

/// Describes a `Sequential` layer by layer, keeping track of the width flowing through it.
#[derive(Debug, Clone)]
pub struct SequentialBuilder {
    width: usize,
    specs: Vec<LayerSpec>,
}

impl SequentialBuilder {
    /// Appends a fully connected layer with `out` output features.
    pub fn dense(mut self, out: usize) -> Self {
        self.specs.push(LayerSpec::Dense(self.width, out));
        self.width = out;
        self
    }

    pub fn relu(mut self) -> Self {
        self.specs.push(LayerSpec::Relu);
        self
    }

    /// Appends a synchronized batch normalization over the current width.
    pub fn sync_batch_norm(mut self) -> Self {
        self.specs.push(LayerSpec::SyncBatchNorm(self.width));
        self
    }

    /// Initializes every layer from a generator seeded with `seed`, so that building with the
    /// same seed yields the same parameters.
    ///
    /// # Returns
    /// The built model or an error if a layer couldn't be initialized.
    pub fn build(self, seed: u64) -> Result<Sequential> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut store = ParamStore::new();
        let mut layers = Vec::with_capacity(self.specs.len());

        for (i, spec) in self.specs.into_iter().enumerate() {
            let layer = match spec {
                LayerSpec::Dense(fan_in, fan_out) => Layer::Dense(Dense::new(
                    &mut store,
                    &format!("layers.{i}"),
                    (fan_in, fan_out),
                    &mut rng,
                )?),
                LayerSpec::Relu => Layer::relu(),
                LayerSpec::SyncBatchNorm(dim) => Layer::sync_batch_norm(dim),
            };

            layers.push(layer);
        }

        Ok(Sequential { layers, store })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_tracks_widths_and_names() {
        let model = Sequential::builder(4)
            .dense(8)
            .sync_batch_norm()
            .relu()
            .dense(3)
            .build(0)
            .unwrap();

        let names: Vec<_> = model.params().entries().iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            ["layers.0.weight", "layers.0.bias", "layers.3.weight", "layers.3.bias"]
        );
        assert_eq!(model.size(), 4 * 8 + 8 + 8 * 3 + 3);
        assert_eq!(model.layers().len(), 4);

        let widths: Vec<_> = model
            .layers()
            .iter()
            .filter_map(|layer| match layer {
                Layer::Dense(d) => Some(d.dim()),
                Layer::BatchNorm(bn) => Some((bn.dim(), bn.dim())),
                Layer::Relu(_) => None,
            })
            .collect();
        assert_eq!(widths, [(4, 8), (8, 8), (8, 3)]);
    }

    #[test]
    fn same_seed_same_parameters() {
        let build = |seed| Sequential::builder(5).dense(6).relu().dense(2).build(seed).unwrap();

        assert_eq!(build(3).params().params(), build(3).params().params());
        assert_ne!(build(3).params().params(), build(4).params().params());
    }
}
