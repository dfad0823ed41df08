use std::io;

use log::info;

use worker::{ProcessSpec, TrainingSpec, WorkerConfig};

fn main() -> io::Result<()> {
    env_logger::init();

    let process = ProcessSpec::from_env()?;
    let config = WorkerConfig::new(TrainingSpec::from_env()?)?;

    info!(rank = process.rank, world_size = process.world_size; "joining group at {}", process.master());
    let comm = comms::bootstrap::connect(process.rank, process.world_size, process.master())
        .map_err(worker::WorkerErr::from)?;

    let reports = worker::run(comm, config)?;
    if let Some(last) = reports.last() {
        info!(
            rank = process.rank, val_loss = last.validation.loss,
            val_accuracy = last.validation.accuracy;
            "training finished"
        );
    }

    Ok(())
}
