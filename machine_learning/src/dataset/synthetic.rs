//! Seeded stand-in datasets.

use ndarray::Array2;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};

use super::Dataset;
use crate::{MlErr, Result};

/// Distance scale of the class centers from the origin.
const CENTER_SCALE: f32 = 3.0;

/// Generates `len` examples of `features` features split among `classes` gaussian clusters.
///
/// The class centers only depend on `seed`, so datasets generated with the same seed share them
/// regardless of `len`. Examples are drawn around their class center with standard deviation
/// `spread`, labels are uniform.
pub fn gaussian_blobs(
    len: usize,
    features: usize,
    classes: usize,
    spread: f32,
    seed: u64,
) -> Result<Dataset> {
    if classes == 0 {
        return Err(MlErr::InvalidDistribution(
            "gaussian blobs need at least one class".into(),
        ));
    }

    if !spread.is_finite() || spread < 0.0 {
        return Err(MlErr::InvalidDistribution(format!(
            "spread must be finite and non negative, got {spread}"
        )));
    }

    let center = Normal::new(0.0, CENTER_SCALE)
        .map_err(|e| MlErr::InvalidDistribution(e.to_string()))?;
    let noise =
        Normal::new(0.0, spread).map_err(|e| MlErr::InvalidDistribution(e.to_string()))?;

    let mut center_rng = StdRng::seed_from_u64(seed);
    let centers = Array2::from_shape_simple_fn((classes, features), || {
        center.sample(&mut center_rng)
    });

    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(len as u64).rotate_left(17));
    let labels: Vec<usize> = (0..len).map(|_| rng.random_range(0..classes)).collect();
    let x = Array2::from_shape_fn((len, features), |(i, j)| {
        centers[[labels[i], j]] + noise.sample(&mut rng)
    });

    Dataset::new(x, labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_dataset() {
        let a = gaussian_blobs(30, 4, 3, 0.5, 11).unwrap();
        let b = gaussian_blobs(30, 4, 3, 0.5, 11).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, gaussian_blobs(30, 4, 3, 0.5, 12).unwrap());
    }

    #[test]
    fn labels_are_in_range() {
        let ds = gaussian_blobs(100, 2, 5, 1.0, 0).unwrap();
        assert_eq!(ds.len(), 100);
        assert_eq!(ds.features(), 2);
        assert!(ds.labels().iter().all(|&label| label < 5));
    }

    #[test]
    fn negative_spread_is_rejected() {
        assert!(gaussian_blobs(10, 2, 2, -1.0, 0).is_err());
        assert!(gaussian_blobs(10, 2, 2, f32::NAN, 0).is_err());
        assert!(gaussian_blobs(10, 2, 2, f32::INFINITY, 0).is_err());
        assert!(gaussian_blobs(10, 2, 0, 1.0, 0).is_err());
        assert!(gaussian_blobs(10, 2, 2, 0.0, 0).is_ok());
    }
}
