use std::{net::TcpListener, thread};

use comms::{Collective, MemoryGroup};
use machine_learning::{
    arch::{Model, Sequential, loss::CrossEntropy},
    dataset::synthetic::gaussian_blobs,
    optimization::GradientDescent,
};
use worker::{EpochReport, Trainer, TrainingSpec, WorkerConfig, WorkerErr};

fn spec() -> TrainingSpec {
    TrainingSpec {
        epochs: 3,
        batch_size: 8,
        learning_rate: 0.1,
        momentum: 0.5,
        seed: 42,
        features: 6,
        hidden: 16,
        classes: 3,
        train_size: 96,
        val_size: 31,
        spread: 0.8,
        log_every: 2,
    }
}

/// Runs `f` once per rank, each on its own thread, and returns the results ordered by rank.
fn run_group<T, F>(world_size: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(MemoryGroup) -> T + Send + Sync + Clone + 'static,
{
    let handles: Vec<_> = comms::in_memory(world_size)
        .unwrap()
        .into_iter()
        .map(|group| {
            let f = f.clone();
            thread::spawn(move || f(group))
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn train(comm: MemoryGroup, spec: TrainingSpec) -> (Vec<EpochReport>, Vec<f32>) {
    let model = Sequential::builder(spec.features)
        .dense(spec.hidden)
        .sync_batch_norm()
        .relu()
        .dense(spec.classes)
        .build(spec.seed + comm.rank() as u64)
        .unwrap();

    let optimizers = vec![
        GradientDescent::new(spec.learning_rate).with_momentum(spec.momentum);
        model.params().len()
    ];

    let train = gaussian_blobs(spec.train_size, spec.features, spec.classes, spec.spread, 1)
        .unwrap();
    let validation = comm.is_main().then(|| {
        gaussian_blobs(spec.val_size, spec.features, spec.classes, spec.spread, 1).unwrap()
    });

    let config = WorkerConfig::new(spec).unwrap();
    let mut trainer = Trainer::new(
        model,
        optimizers,
        CrossEntropy::new(),
        comm,
        train,
        validation.as_ref(),
        config,
    )
    .unwrap();

    let reports = trainer.run().unwrap();
    (reports, trainer.model().params().params().to_vec())
}

#[test]
fn workers_stay_in_lockstep() {
    let results = run_group(3, |comm| train(comm, spec()));

    let (reports, params) = &results[0];
    assert_eq!(reports.len(), 3);

    for (other_reports, other_params) in &results[1..] {
        assert_eq!(other_params, params);

        for (a, b) in reports.iter().zip(other_reports) {
            assert_eq!(a.validation, b.validation);
        }
    }

    assert!(reports.iter().all(|r| r.validation.count == 31));
}

#[test]
fn training_improves_validation_loss() {
    let results = run_group(2, |comm| {
        let spec = TrainingSpec {
            epochs: 5,
            ..spec()
        };
        train(comm, spec)
    });
    let (reports, _) = &results[0];

    let first = reports.first().unwrap().validation;
    let last = reports.last().unwrap().validation;
    assert!(last.loss < first.loss, "{} !< {}", last.loss, first.loss);
    assert!(last.accuracy > 0.5);
}

#[test]
fn mismatched_models_abort_every_worker() {
    let results = run_group(2, |comm| {
        let mut spec = spec();
        spec.hidden += comm.rank();
        let config = WorkerConfig::new(spec).unwrap();
        worker::run(comm, config)
    });

    for result in results {
        assert!(matches!(result, Err(WorkerErr::Ml(_))));
    }
}

#[test]
fn workers_train_over_tcp() {
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let addr = format!("127.0.0.1:{port}");

    let handles: Vec<_> = (0..2)
        .map(|rank| {
            let addr = addr.clone();
            thread::spawn(move || {
                let comm = comms::bootstrap::connect(rank, 2, addr).unwrap();
                let config = WorkerConfig::new(TrainingSpec {
                    epochs: 1,
                    ..spec()
                })
                .unwrap();

                worker::run(comm, config).unwrap()
            })
        })
        .collect();

    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(reports[0][0].validation, reports[1][0].validation);
}
