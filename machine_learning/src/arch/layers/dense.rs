use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, linalg};
use rand::Rng;
use rand_distr::{Distribution, Uniform};

use crate::{
    MlErr, Result,
    arch::Mode,
    params::{ParamId, ParamStore},
};

/// A fully connected layer, `z = x . w + b`.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    w: ParamId,
    b: ParamId,

    // Forward metadata
    x: Option<Array2<f32>>,
}

impl Dense {
    /// Creates a new `Dense` layer, registering its weights and biases in `store`.
    ///
    /// Weights are drawn from the Xavier uniform distribution `U(-a, a)` with
    /// `a = sqrt(6 / (fan_in + fan_out))`, biases start at zero.
    ///
    /// # Arguments
    /// * `store` - Where the parameters of the layer are kept.
    /// * `name` - The prefix for the names of the parameters.
    /// * `dim` - The amount of input and output features.
    /// * `rng` - The source of randomness of the initialization.
    ///
    /// # Returns
    /// A new `Dense` instance or an error if the dimensions are degenerate.
    pub fn new<R: Rng>(
        store: &mut ParamStore,
        name: &str,
        dim: (usize, usize),
        rng: &mut R,
    ) -> Result<Self> {
        let (fan_in, fan_out) = dim;
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        let dist = Uniform::new_inclusive(-limit, limit)
            .map_err(|e| MlErr::InvalidDistribution(e.to_string()))?;

        let weights = dist.sample_iter(rng).take(fan_in * fan_out).collect();
        let w = store.register(format!("{name}.weight"), weights);
        let b = store.register(format!("{name}.bias"), vec![0.0; fan_out]);

        Ok(Self { dim, w, b, x: None })
    }

    /// Returns the amount of input and output features.
    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn forward(
        &mut self,
        store: &ParamStore,
        x: ArrayView2<f32>,
        mode: Mode,
    ) -> Result<Array2<f32>> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense input features",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(store)?;
        let z = x.dot(&w) + &b;

        self.x = match mode {
            Mode::Train => Some(x.to_owned()),
            Mode::Eval => None,
        };

        Ok(z)
    }

    /// Accumulates the gradients of the weights and biases into `store`.
    ///
    /// # Returns
    /// The gradient with respect to the input of the last training forward pass.
    pub fn backward(&mut self, store: &mut ParamStore, d: ArrayView2<f32>) -> Result<Array2<f32>> {
        let x = self.x.take().ok_or(MlErr::UnpairedBackward {
            layer: "dense",
            got: None,
            expected: None,
        })?;

        if d.nrows() != x.nrows() {
            return Err(MlErr::SizeMismatch {
                what: "dense gradient rows",
                got: d.nrows(),
                expected: x.nrows(),
            });
        }

        let mut dw = ArrayViewMut2::from_shape(self.dim, store.grad_mut(self.w))?;
        linalg::general_mat_mul(1.0, &x.t(), &d, 1.0, &mut dw);

        let mut db = ArrayViewMut1::from(store.grad_mut(self.b));
        db += &d.sum_axis(Axis(0));

        let (w, _) = self.view_params(store)?;
        Ok(d.dot(&w.t()))
    }

    /// Gives a view of the layer's raw parameters as its weights and biases.
    fn view_params<'a>(
        &self,
        store: &'a ParamStore,
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        let weights = ArrayView2::from_shape(self.dim, store.param(self.w))?;
        let biases = ArrayView1::from(store.param(self.b));
        Ok((weights, biases))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn dense(store: &mut ParamStore) -> Dense {
        let mut rng = StdRng::seed_from_u64(7);
        let layer = Dense::new(store, "dense", (2, 3), &mut rng).unwrap();

        store.params_mut()[..6].copy_from_slice(&[1.0, 0.0, -1.0, 2.0, 1.0, 0.5]);
        store.params_mut()[6..].copy_from_slice(&[0.1, 0.2, 0.3]);
        layer
    }

    #[test]
    fn init_is_seeded_and_bounded() {
        let (mut a, mut b) = (ParamStore::new(), ParamStore::new());
        Dense::new(&mut a, "d", (4, 5), &mut StdRng::seed_from_u64(1)).unwrap();
        Dense::new(&mut b, "d", (4, 5), &mut StdRng::seed_from_u64(1)).unwrap();

        let limit = (6.0f32 / 9.0).sqrt();
        assert_eq!(a.params(), b.params());
        assert!(a.params()[..20].iter().all(|w| w.abs() <= limit));
        assert_eq!(&a.params()[20..], &[0.0; 5]);
        assert_eq!(a.entries()[0].name(), "d.weight");
    }

    #[test]
    fn forward_is_an_affine_map() {
        let mut store = ParamStore::new();
        let mut layer = dense(&mut store);

        let z = layer
            .forward(&store, array![[1.0, 1.0]].view(), Mode::Eval)
            .unwrap();

        let expected = array![[3.1, 1.2, -0.2]];
        assert!(z.iter().zip(&expected).all(|(a, b)| (a - b).abs() < 1e-6));
    }

    #[test]
    fn backward_accumulates_gradients() {
        let mut store = ParamStore::new();
        let mut layer = dense(&mut store);
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let d = array![[1.0, 0.0, 1.0], [0.0, 1.0, 0.0]];

        layer.forward(&store, x.view(), Mode::Train).unwrap();
        let dx = layer.backward(&mut store, d.view()).unwrap();

        assert_eq!(dx, array![[0.0, 2.5], [0.0, 1.0]]);
        assert_eq!(&store.grads()[..6], &[1.0, 3.0, 1.0, 2.0, 4.0, 2.0]);
        assert_eq!(&store.grads()[6..], &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn backward_after_eval_forward_fails() {
        let mut store = ParamStore::new();
        let mut layer = dense(&mut store);
        let x = array![[1.0, 2.0]];

        layer.forward(&store, x.view(), Mode::Eval).unwrap();
        assert!(layer.backward(&mut store, x.view()).is_err());
    }
}
