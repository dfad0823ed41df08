use comms::Collective;
use log::debug;

use crate::{Result, params::ParamStore};

/// Replaces every defined gradient by its mean across the group.
///
/// Tensors are reduced one at a time in registration order, which is the same on every worker
/// since all of them build the same model. Tensors without a gradient are skipped, so every
/// worker must agree on which tensors took part in the backward pass.
///
/// # Returns
/// The amount of tensors that were reduced.
pub fn average_gradients(store: &mut ParamStore, comm: &mut dyn Collective) -> Result<usize> {
    let world_size = comm.world_size() as f32;
    let mut reduced = 0;

    for (entry, grad) in store.defined_grads_mut() {
        comm.reduce_sum(grad)?;
        grad.iter_mut().for_each(|g| *g /= world_size);

        debug!(rank = comm.rank(), tensor = entry.name(), len = grad.len(); "averaged gradient");
        reduced += 1;
    }

    Ok(reduced)
}

/// Overwrites every parameter with the ones held by `src`, used to start every worker from
/// identical weights.
pub fn broadcast_params(
    store: &mut ParamStore,
    comm: &mut dyn Collective,
    src: usize,
) -> Result<()> {
    comm.broadcast(store.params_mut(), src)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    /// A store with three tensors where only the first and the last have gradients, scaled by
    /// `rank + 1`.
    fn store(rank: usize) -> ParamStore {
        let mut store = ParamStore::new();
        let a = store.register("a", vec![rank as f32; 2]);
        store.register("b", vec![0.5; 3]);
        let c = store.register("c", vec![1.0]);

        let scale = (rank + 1) as f32;
        store.grad_mut(a).copy_from_slice(&[scale, 2.0 * scale]);
        store.grad_mut(c).copy_from_slice(&[-scale]);
        store
    }

    #[test]
    fn tensors_without_gradient_are_skipped() {
        let handles: Vec<_> = comms::in_memory(2)
            .unwrap()
            .into_iter()
            .map(|mut group| {
                thread::spawn(move || {
                    let mut store = store(group.rank());
                    let reduced = average_gradients(&mut store, &mut group).unwrap();
                    (reduced, store)
                })
            })
            .collect();

        for handle in handles {
            let (reduced, store) = handle.join().unwrap();
            assert_eq!(reduced, 2);

            let b = &store.entries()[1];
            assert!(!b.has_grad());
            assert_eq!(&store.grads()[b.range()], &[0.0; 3]);
            assert_eq!(store.grads(), &[1.5, 3.0, 0.0, 0.0, 0.0, -1.5]);
        }
    }

    #[test]
    fn every_worker_starts_from_the_source_parameters() {
        let handles: Vec<_> = comms::in_memory(3)
            .unwrap()
            .into_iter()
            .map(|mut group| {
                thread::spawn(move || {
                    let mut store = store(group.rank());
                    broadcast_params(&mut store, &mut group, 1).unwrap();
                    store.params().to_vec()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), [1.0, 1.0, 0.5, 0.5, 0.5, 1.0]);
        }
    }
}
