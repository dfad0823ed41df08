mod sampler;
mod shard;
pub mod synthetic;

use std::ops::Range;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis, s};

pub use sampler::DistributedSampler;
pub use shard::{shard_lens, shard_range};

use crate::{MlErr, Result};

/// An in-memory classification dataset: one row of features per example and its class index.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    x: Array2<f32>,
    labels: Vec<usize>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Returns
    /// The dataset or an error if there isn't exactly one label per row.
    pub fn new(x: Array2<f32>, labels: Vec<usize>) -> Result<Self> {
        if x.nrows() != labels.len() {
            return Err(MlErr::SizeMismatch {
                what: "dataset labels",
                got: labels.len(),
                expected: x.nrows(),
            });
        }

        Ok(Self { x, labels })
    }

    /// Creates an empty dataset with `features` columns.
    pub fn empty(features: usize) -> Self {
        Self {
            x: Array2::zeros((0, features)),
            labels: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns the amount of features of each example.
    pub fn features(&self) -> usize {
        self.x.ncols()
    }

    pub fn x(&self) -> ArrayView2<'_, f32> {
        self.x.view()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Returns the example at `idx` (panics if out of bounds).
    pub fn sample(&self, idx: usize) -> (ArrayView1<'_, f32>, usize) {
        (self.x.row(idx), self.labels[idx])
    }

    /// Gathers the examples at `indices`, in that order, into a new dataset.
    pub fn select(&self, indices: &[usize]) -> Dataset {
        Self {
            x: self.x.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    /// Copies a contiguous range of examples into a new dataset.
    pub fn slice(&self, range: Range<usize>) -> Dataset {
        Self {
            x: self.x.slice(s![range.clone(), ..]).to_owned(),
            labels: self.labels[range].to_vec(),
        }
    }

    /// Iterates over consecutive batches of at most `size` examples, the last one may be
    /// smaller.
    pub fn batches(&self, size: usize) -> impl Iterator<Item = (ArrayView2<'_, f32>, &[usize])> {
        let size = size.max(1);
        self.x
            .axis_chunks_iter(Axis(0), size)
            .zip(self.labels.chunks(size))
    }

    /// Flattens the dataset into rows of its features followed by the label.
    pub fn to_rows(&self) -> Vec<f32> {
        let mut rows = Vec::with_capacity(self.len() * (self.features() + 1));

        for (x, &label) in self.x.rows().into_iter().zip(&self.labels) {
            rows.extend(x.iter());
            rows.push(label as f32);
        }

        rows
    }

    /// Rebuilds a dataset from rows laid out by `to_rows`.
    ///
    /// # Arguments
    /// * `rows` - The flattened rows.
    /// * `features` - The amount of features of each example.
    /// * `classes` - The amount of classes, labels must lie below it.
    pub fn from_rows(rows: &[f32], features: usize, classes: usize) -> Result<Self> {
        let width = features + 1;
        if rows.len() % width != 0 {
            return Err(MlErr::SizeMismatch {
                what: "dataset rows",
                got: rows.len() % width,
                expected: 0,
            });
        }

        let table = ArrayView2::from_shape((rows.len() / width, width), rows)?;
        let x = table.slice(s![.., ..features]).to_owned();
        let labels = table
            .column(features)
            .iter()
            .map(|&label| {
                if label >= 0.0 && label.fract() == 0.0 && (label as usize) < classes {
                    Ok(label as usize)
                } else {
                    Err(MlErr::InvalidLabel { label, classes })
                }
            })
            .collect::<Result<_>>()?;

        Ok(Self { x, labels })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn dataset() -> Dataset {
        let x = array![[0.0, 1.0], [2.0, 3.0], [4.0, 5.0], [6.0, 7.0], [8.0, 9.0]];
        Dataset::new(x, vec![0, 1, 2, 1, 0]).unwrap()
    }

    #[test]
    fn new_requires_a_label_per_row() {
        assert!(Dataset::new(Array2::zeros((3, 2)), vec![0, 1]).is_err());
    }

    #[test]
    fn select_and_slice_keep_labels_aligned() {
        let ds = dataset();

        let picked = ds.select(&[4, 1]);
        assert_eq!(picked.x(), array![[8.0, 9.0], [2.0, 3.0]]);
        assert_eq!(picked.labels(), &[0, 1]);

        let sliced = ds.slice(1..3);
        assert_eq!(sliced.sample(1), (array![4.0, 5.0].view(), 2));
    }

    #[test]
    fn batches_keep_the_remainder() {
        let ds = dataset();
        let sizes: Vec<_> = ds.batches(2).map(|(x, y)| (x.nrows(), y.len())).collect();
        assert_eq!(sizes, vec![(2, 2), (2, 2), (1, 1)]);
    }

    #[test]
    fn rows_carry_the_label_last() {
        let ds = dataset().slice(0..2);
        let rows = ds.to_rows();

        assert_eq!(rows, vec![0.0, 1.0, 0.0, 2.0, 3.0, 1.0]);
        assert_eq!(Dataset::from_rows(&rows, 2, 3).unwrap(), ds);
    }

    #[test]
    fn from_rows_rejects_bad_labels() {
        let err = Dataset::from_rows(&[0.0, 1.5], 1, 3).unwrap_err();
        assert!(matches!(err, MlErr::InvalidLabel { .. }));

        let err = Dataset::from_rows(&[0.0, 3.0], 1, 3).unwrap_err();
        assert!(matches!(err, MlErr::InvalidLabel { classes: 3, .. }));

        assert!(Dataset::from_rows(&[0.0, 1.0, 2.0], 1, 3).is_err());
    }
}
