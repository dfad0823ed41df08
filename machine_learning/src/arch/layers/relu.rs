use ndarray::{Array2, ArrayView2, Zip};

use crate::{MlErr, Result, arch::Mode};

/// Rectified linear unit, `max(0, z)`.
#[derive(Debug, Clone, Default)]
pub struct Relu {
    z: Option<Array2<f32>>,
}

impl Relu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, z: ArrayView2<f32>, mode: Mode) -> Array2<f32> {
        if mode == Mode::Train {
            self.z = Some(z.to_owned());
        }

        z.mapv(|z| z.max(0.0))
    }

    pub fn backward(&mut self, mut d: Array2<f32>) -> Result<Array2<f32>> {
        let z = self.z.take().ok_or(MlErr::UnpairedBackward {
            layer: "relu",
            got: None,
            expected: None,
        })?;

        if d.dim() != z.dim() {
            return Err(MlErr::SizeMismatch {
                what: "relu gradient rows",
                got: d.nrows(),
                expected: z.nrows(),
            });
        }

        Zip::from(&mut d).and(&z).for_each(|d, &z| {
            if z <= 0.0 {
                *d = 0.0;
            }
        });

        Ok(d)
    }
}
