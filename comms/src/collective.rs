use crate::error::Result;

/// Blocking group operations over a fixed set of participants ranked `0..world_size`.
///
/// Every operation is a barrier: it returns only once every participant has issued the matching
/// call. A participant that never does so blocks the rest of the group forever, there is no
/// timeout. All participants must issue the same operations, in the same order and with the same
/// buffer lengths.
pub trait Collective {
    /// Returns the rank of this participant.
    fn rank(&self) -> usize;

    /// Returns the amount of participants in the group.
    fn world_size(&self) -> usize;

    /// Replaces `buf` with the element-wise sum of every participant's `buf`.
    ///
    /// # Arguments
    /// * `buf` - This participant's contribution, overwritten with the sum.
    fn reduce_sum(&mut self, buf: &mut [f32]) -> Result<()>;

    /// Overwrites every participant's `buf` with the one held by `src`.
    ///
    /// # Arguments
    /// * `buf` - The data to send when this participant is `src`, the destination otherwise.
    /// * `src` - The rank that owns the data.
    fn broadcast(&mut self, buf: &mut [f32], src: usize) -> Result<()>;

    /// Splits the data held by `src` into contiguous shards, one per rank in rank order.
    ///
    /// # Arguments
    /// * `full` - The data to split, `Some` only on `src`.
    /// * `len` - The length of the shard this participant expects, agreed in advance. The
    ///           lengths of all participants must add up to the length of `full`.
    /// * `src` - The rank that owns the data.
    ///
    /// # Returns
    /// This participant's shard.
    fn scatter(&mut self, full: Option<&[f32]>, len: usize, src: usize) -> Result<Vec<f32>>;

    /// Returns whether this participant is the one responsible for reporting.
    fn is_main(&self) -> bool {
        self.rank() == 0
    }
}
