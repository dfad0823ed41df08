use comms::Collective;
use log::{debug, info};
use machine_learning::{
    arch::{Mode, Model, loss::LossFn},
    dataset::{Dataset, DistributedSampler},
    distributed::{
        GlobalMetrics, MetricAccumulator, ValidationShard, average_gradients, broadcast_params,
    },
    optimization::Optimizer,
};

use crate::{config::WorkerConfig, error::Result};

/// The rank holding the initial parameters and the validation set.
const MAIN_RANK: usize = 0;

/// What an epoch of training left behind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    /// Mean of this worker's batch losses.
    pub train_loss: f32,
    /// Metrics over the whole validation set, identical on every worker.
    pub validation: GlobalMetrics,
}

/// Drives the data parallel training of one worker.
///
/// Every worker runs the same sequence of collectives: a parameter broadcast and a validation
/// scatter on construction, then for every batch the model's own reductions followed by the
/// gradient averaging, and for every epoch a final metric reduction.
pub struct Trainer<M, O, L, C> {
    model: M,
    optimizers: Vec<O>,
    loss_fn: L,
    comm: C,
    train: Dataset,
    sampler: DistributedSampler,
    validation: ValidationShard,
    config: WorkerConfig,
}

impl<M, O, L, C> Trainer<M, O, L, C>
where
    M: Model,
    O: Optimizer,
    L: LossFn,
    C: Collective,
{
    /// Creates a new `Trainer`, syncing the initial parameters and sharding the validation set.
    ///
    /// # Arguments
    /// * `model` - This worker's replica of the model.
    /// * `optimizers` - One optimizer per parameter tensor of the model.
    /// * `loss_fn` - The loss to minimize.
    /// * `comm` - The process group.
    /// * `train` - The training set, the same on every worker.
    /// * `validation` - The validation set, `Some` only on the main rank.
    /// * `config` - The hyper-parameters of the run.
    ///
    /// # Returns
    /// The trainer or an error if a collective failed.
    pub fn new(
        mut model: M,
        optimizers: Vec<O>,
        loss_fn: L,
        mut comm: C,
        train: Dataset,
        validation: Option<&Dataset>,
        config: WorkerConfig,
    ) -> Result<Self> {
        broadcast_params(model.params_mut(), &mut comm, MAIN_RANK)?;
        info!(rank = comm.rank(), params = model.size(); "initial parameters synced");

        let spec = config.spec();
        let validation =
            ValidationShard::scatter(&mut comm, validation, MAIN_RANK, spec.features, spec.classes)?;

        let sampler =
            DistributedSampler::new(train.len(), comm.rank(), comm.world_size(), spec.seed);

        Ok(Self {
            model,
            optimizers,
            loss_fn,
            comm,
            train,
            sampler,
            validation,
            config,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Trains for every configured epoch.
    ///
    /// # Returns
    /// A report per epoch, or the first error, which aborts the run.
    pub fn run(&mut self) -> Result<Vec<EpochReport>> {
        let epochs = self.config.epochs();
        let mut reports = Vec::with_capacity(epochs);

        for epoch in 0..epochs {
            let train_loss = self.train_epoch(epoch)?;
            let validation = self.validate()?;

            info!(
                rank = self.comm.rank(), epoch = epoch, train_loss = train_loss,
                val_loss = validation.loss, val_accuracy = validation.accuracy;
                "epoch finished"
            );

            reports.push(EpochReport {
                epoch,
                train_loss,
                validation,
            });
        }

        Ok(reports)
    }

    /// Makes a pass over this worker's share of the training set.
    ///
    /// # Returns
    /// The mean batch loss.
    pub fn train_epoch(&mut self, epoch: usize) -> Result<f32> {
        let rank = self.comm.rank();
        let shard = self.train.select(&self.sampler.indices(epoch as u64));
        let log_every = self.config.log_every();

        let mut epoch_loss = 0.0;
        let mut running_loss = 0.0;
        let mut batches = 0;

        for (i, (x, labels)) in shard.batches(self.config.batch_size()).enumerate() {
            self.model.params_mut().zero_grad();

            let logits = self.model.forward(x, Mode::Train, &mut self.comm)?;
            let (loss_sum, correct) = self.loss_fn.evaluate(logits.view(), labels)?;
            let d = self.loss_fn.loss_prime(logits.view(), labels)?;

            self.model.backward(d, &mut self.comm)?;
            average_gradients(self.model.params_mut(), &mut self.comm)?;
            self.model.params_mut().optimize(&mut self.optimizers)?;

            let loss = loss_sum / labels.len() as f32;
            epoch_loss += loss;
            running_loss += loss;
            batches += 1;

            debug!(rank = rank, epoch = epoch, batch = i, loss = loss; "batch done");

            if (i + 1) % log_every == 0 {
                let accuracy = correct as f32 / labels.len() as f32;
                info!(
                    rank = rank, epoch = epoch, batch = i + 1,
                    loss = running_loss / log_every as f32, accuracy = accuracy;
                    "training"
                );
                running_loss = 0.0;
            }
        }

        Ok(epoch_loss / batches.max(1) as f32)
    }

    /// Evaluates the model on this worker's validation shard and merges the metrics of the
    /// whole group.
    pub fn validate(&mut self) -> Result<GlobalMetrics> {
        let mut metrics = MetricAccumulator::new();

        for (x, labels) in self.validation.data().batches(self.config.batch_size()) {
            let logits = self.model.forward(x, Mode::Eval, &mut self.comm)?;
            metrics.observe(&self.loss_fn, logits.view(), labels)?;
        }

        Ok(metrics.reduce(&mut self.comm)?)
    }
}
