use comms::Collective;
use log::{debug, info};
use ndarray::ArrayView2;

use crate::{
    MlErr, Result,
    arch::loss::LossFn,
    dataset::{Dataset, shard_lens},
};

/// This worker's share of a validation set that only the main worker holds.
#[derive(Debug, Clone)]
pub struct ValidationShard {
    data: Dataset,
    total: usize,
}

impl ValidationShard {
    /// Splits the validation set held by `src` among the group.
    ///
    /// The source first broadcasts the total amount of examples so that every worker derives the
    /// same shard sizes with `shard_range`, then the examples are scattered as rows of their
    /// features followed by the label.
    ///
    /// # Arguments
    /// * `comm` - The process group.
    /// * `full` - The whole validation set, `Some` only on `src`.
    /// * `src` - The rank holding the validation set.
    /// * `features` - The amount of features of each example.
    /// * `classes` - The amount of classes.
    ///
    /// # Returns
    /// This worker's contiguous shard.
    pub fn scatter(
        comm: &mut dyn Collective,
        full: Option<&Dataset>,
        src: usize,
        features: usize,
        classes: usize,
    ) -> Result<Self> {
        if let Some(got) = full.map(Dataset::features).filter(|&got| got != features) {
            return Err(MlErr::SizeMismatch {
                what: "validation features",
                got,
                expected: features,
            });
        }

        let mut header = encode_total(full.map_or(0, Dataset::len));
        comm.broadcast(&mut header, src)?;
        let total = decode_total(header);

        let lens = shard_lens(total, comm.world_size());
        let width = features + 1;
        let len = lens[comm.rank()] * width;

        let rows = full.map(Dataset::to_rows);
        let shard = comm.scatter(rows.as_deref(), len, src)?;
        let data = Dataset::from_rows(&shard, features, classes)?;

        debug!(rank = comm.rank(), examples = data.len(), total = total; "received validation shard");
        Ok(Self { data, total })
    }

    pub fn data(&self) -> &Dataset {
        &self.data
    }

    /// Returns the size of the whole validation set.
    pub fn total(&self) -> usize {
        self.total
    }
}

/// Bits of a count that an `f32` holds exactly.
const EXACT_BITS: u32 = 24;

/// Splits `total` into two halves that travel exactly as `f32`, valid below `2^48`.
fn encode_total(total: usize) -> [f32; 2] {
    let low = total & ((1 << EXACT_BITS) - 1);
    [(total >> EXACT_BITS) as f32, low as f32]
}

fn decode_total([high, low]: [f32; 2]) -> usize {
    ((high as usize) << EXACT_BITS) | low as usize
}

/// Validation metrics of the whole group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalMetrics {
    /// Mean loss per example.
    pub loss: f32,
    /// Fraction of correctly classified examples.
    pub accuracy: f32,
    pub count: usize,
}

/// Accumulates the validation metrics of this worker's shard.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricAccumulator {
    loss_sum: f32,
    correct: f32,
    count: f32,
}

impl MetricAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a batch of predictions to the accumulated metrics.
    pub fn observe<L: LossFn>(
        &mut self,
        loss_fn: &L,
        logits: ArrayView2<f32>,
        labels: &[usize],
    ) -> Result<()> {
        let (loss_sum, correct) = loss_fn.evaluate(logits, labels)?;

        self.loss_sum += loss_sum;
        self.correct += correct as f32;
        self.count += labels.len() as f32;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count as usize
    }

    /// Sums the accumulated metrics across the group in a single reduction.
    ///
    /// # Returns
    /// The metrics of the whole validation set, identical on every worker, or an error if no
    /// worker saw an example.
    pub fn reduce(&self, comm: &mut dyn Collective) -> Result<GlobalMetrics> {
        let mut sums = [self.loss_sum, self.correct, self.count];
        comm.reduce_sum(&mut sums)?;

        let [loss_sum, correct, count] = sums;
        if count == 0.0 {
            return Err(MlErr::EmptyValidation);
        }

        let metrics = GlobalMetrics {
            loss: loss_sum / count,
            accuracy: correct / count,
            count: count as usize,
        };

        if comm.is_main() {
            info!(
                loss = metrics.loss, accuracy = metrics.accuracy, count = metrics.count;
                "VALIDATION"
            );
        }

        Ok(metrics)
    }
}
