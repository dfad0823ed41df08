use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

/// Splits the indices of a dataset among the workers of a group, reshuffling every epoch.
///
/// Every worker builds the same permutation from `seed + epoch`, pads it by wrapping around until
/// its length is a multiple of the world size and then keeps every `world_size`-th index starting
/// at its rank. Hence every worker gets `ceil(len / world_size)` indices, the same amount of
/// batches, and the shards of an epoch cover the whole dataset.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    len: usize,
    rank: usize,
    world_size: usize,
    seed: u64,
    shuffle: bool,
}

impl DistributedSampler {
    /// Creates a new shuffling `DistributedSampler`.
    ///
    /// # Arguments
    /// * `len` - The amount of examples in the dataset.
    /// * `rank` - The rank of this worker.
    /// * `world_size` - The amount of workers in the group.
    /// * `seed` - The base seed, must be the same on every worker.
    pub fn new(len: usize, rank: usize, world_size: usize, seed: u64) -> Self {
        assert!(world_size > 0);
        assert!(rank < world_size);

        Self {
            len,
            rank,
            world_size,
            seed,
            shuffle: true,
        }
    }

    /// Keeps the dataset order instead of permuting it every epoch.
    pub fn without_shuffle(mut self) -> Self {
        self.shuffle = false;
        self
    }

    /// Returns the amount of indices each worker gets per epoch.
    pub fn num_samples(&self) -> usize {
        self.len.div_ceil(self.world_size)
    }

    /// Returns the indices of this worker for `epoch`.
    pub fn indices(&self, epoch: u64) -> Vec<usize> {
        if self.len == 0 {
            return Vec::new();
        }

        let mut order: Vec<usize> = (0..self.len).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch));
            order.shuffle(&mut rng);
        }

        let total = self.num_samples() * self.world_size;
        order
            .iter()
            .cycle()
            .take(total)
            .skip(self.rank)
            .step_by(self.world_size)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn shards_are_disjoint_and_cover_the_dataset() {
        let samplers: Vec<_> = (0..3).map(|r| DistributedSampler::new(9, r, 3, 5)).collect();

        let mut seen = HashSet::new();
        for sampler in &samplers {
            let indices = sampler.indices(0);
            assert_eq!(indices.len(), 3);
            seen.extend(indices);
        }

        assert_eq!(seen.len(), 9);
    }

    #[test]
    fn uneven_datasets_are_padded_by_wrapping() {
        let shards: Vec<_> = (0..4)
            .map(|r| DistributedSampler::new(10, r, 4, 0).without_shuffle().indices(0))
            .collect();

        assert_eq!(shards[0], vec![0, 4, 8]);
        assert_eq!(shards[1], vec![1, 5, 9]);
        assert_eq!(shards[2], vec![2, 6, 0]);
        assert_eq!(shards[3], vec![3, 7, 1]);
    }

    #[test]
    fn permutation_depends_on_seed_and_epoch_only() {
        let a = DistributedSampler::new(50, 1, 2, 9);
        let b = DistributedSampler::new(50, 1, 2, 9);

        assert_eq!(a.indices(3), b.indices(3));
        assert_ne!(a.indices(3), a.indices(4));
    }

    #[test]
    fn empty_dataset_yields_nothing() {
        assert!(DistributedSampler::new(0, 0, 2, 0).indices(0).is_empty());
    }
}
