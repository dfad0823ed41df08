use std::ops::Range;

/// Splits `total` examples among `world_size` workers and returns the shard of `rank`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)` in rank order.
/// - Sizes differ by at most 1, the first `total % world_size` shards hold the extra examples.
pub fn shard_range(total: usize, rank: usize, world_size: usize) -> Range<usize> {
    assert!(world_size > 0);
    assert!(rank < world_size);

    let base = total / world_size;
    let rem = total % world_size;

    let start = rank * base + rank.min(rem);
    let extra = if rank < rem { 1 } else { 0 };
    let end = start + base + extra;

    start..end
}

/// Returns the size of every shard of `total` examples, in rank order.
pub fn shard_lens(total: usize, world_size: usize) -> Vec<usize> {
    (0..world_size)
        .map(|rank| shard_range(total, rank, world_size).len())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_range_balanced() {
        // total 10, workers 3 => sizes 4,3,3
        assert_eq!(shard_range(10, 0, 3), 0..4);
        assert_eq!(shard_range(10, 1, 3), 4..7);
        assert_eq!(shard_range(10, 2, 3), 7..10);
    }

    #[test]
    fn shards_cover_the_set_in_order() {
        for total in 0..40 {
            for world_size in 1..7 {
                let lens = shard_lens(total, world_size);
                assert_eq!(lens.iter().sum::<usize>(), total);

                let max = lens.iter().max().unwrap();
                let min = lens.iter().min().unwrap();
                assert!(max - min <= 1);

                let mut next = 0;
                for rank in 0..world_size {
                    let range = shard_range(total, rank, world_size);
                    assert_eq!(range.start, next);
                    next = range.end;
                }
            }
        }
    }

    #[test]
    fn fewer_examples_than_workers_leaves_empty_shards() {
        assert_eq!(shard_lens(2, 4), vec![1, 1, 0, 0]);
    }
}
