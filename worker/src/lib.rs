pub mod config;
pub mod error;
pub mod trainer;

use comms::Collective;
use log::info;
use machine_learning::{
    arch::{Model, Sequential, loss::CrossEntropy},
    dataset::synthetic::gaussian_blobs,
    optimization::GradientDescent,
};

pub use config::{ProcessSpec, TrainingSpec, WorkerConfig};
pub use error::{Result, WorkerErr};
pub use trainer::{EpochReport, Trainer};

/// Trains the classifier `dense -> sync_batch_norm -> relu -> dense` on synthetic data.
///
/// Every worker generates the same training set and initializes its model from a seed that
/// depends on its rank, the main rank's parameters are then broadcast to everyone. Only the main
/// rank generates the validation set.
///
/// # Arguments
/// * `comm` - The process group.
/// * `config` - The hyper-parameters of the run.
///
/// # Returns
/// A report per epoch, or the first error, which aborts the run.
pub fn run<C: Collective>(comm: C, config: WorkerConfig) -> Result<Vec<EpochReport>> {
    let spec = config.spec().clone();
    info!(rank = comm.rank(), world_size = comm.world_size(); "building model");

    let model = Sequential::builder(spec.features)
        .dense(spec.hidden)
        .sync_batch_norm()
        .relu()
        .dense(spec.classes)
        .build(spec.seed.wrapping_add(comm.rank() as u64))?;

    let optimizer = GradientDescent::new(spec.learning_rate).with_momentum(spec.momentum);
    let optimizers = vec![optimizer; model.params().len()];

    let train = gaussian_blobs(
        spec.train_size,
        spec.features,
        spec.classes,
        spec.spread,
        spec.seed,
    )?;

    // The validation set shares the class centers of the training set, hence the same seed.
    let validation = if comm.is_main() {
        Some(gaussian_blobs(
            spec.val_size,
            spec.features,
            spec.classes,
            spec.spread,
            spec.seed,
        )?)
    } else {
        None
    };

    let mut trainer = Trainer::new(
        model,
        optimizers,
        CrossEntropy::new(),
        comm,
        train,
        validation.as_ref(),
        config,
    )?;

    trainer.run()
}
