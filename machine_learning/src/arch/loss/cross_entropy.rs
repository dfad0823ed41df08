use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use super::LossFn;
use crate::{MlErr, Result};

/// Softmax followed by the negative log likelihood of the true class.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    /// Returns a new `CrossEntropy`.
    pub fn new() -> Self {
        Self
    }

    /// Computes the row-wise softmax of `logits`, shifting by the row maximum first.
    pub fn softmax(logits: ArrayView2<f32>) -> Array2<f32> {
        let mut probs = logits.to_owned();

        for mut row in probs.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row /= sum;
        }

        probs
    }

    fn check(logits: ArrayView2<f32>, labels: &[usize]) -> Result<()> {
        if logits.nrows() != labels.len() {
            return Err(MlErr::SizeMismatch {
                what: "labels",
                got: labels.len(),
                expected: logits.nrows(),
            });
        }

        let classes = logits.ncols();
        match labels.iter().find(|&&label| label >= classes) {
            Some(&label) => Err(MlErr::InvalidLabel {
                label: label as f32,
                classes,
            }),
            None => Ok(()),
        }
    }

    /// `-log(softmax(row)[label])`, computed as `logsumexp(row) - row[label]`.
    fn example_loss(row: ArrayView1<f32>, label: usize) -> f32 {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let lse = max + row.mapv(|v| (v - max).exp()).sum().ln();
        lse - row[label]
    }
}

impl LossFn for CrossEntropy {
    fn loss(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<f32> {
        let (sum, _) = self.evaluate(logits, labels)?;
        Ok(sum / labels.len().max(1) as f32)
    }

    fn loss_prime(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<Array2<f32>> {
        Self::check(logits, labels)?;

        let n = labels.len().max(1) as f32;
        let mut d = Self::softmax(logits);
        for (mut row, &label) in d.axis_iter_mut(Axis(0)).zip(labels) {
            row[label] -= 1.0;
            row /= n;
        }

        Ok(d)
    }

    fn evaluate(&self, logits: ArrayView2<f32>, labels: &[usize]) -> Result<(f32, usize)> {
        Self::check(logits, labels)?;

        let mut sum = 0.0;
        let mut correct = 0;

        for (row, &label) in logits.axis_iter(Axis(0)).zip(labels) {
            sum += Self::example_loss(row, label);

            let predicted = row
                .indexed_iter()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
                    if v > best.1 { (i, v) } else { best }
                })
                .0;

            if predicted == label {
                correct += 1;
            }
        }

        Ok((sum, correct))
    }
}
