//! Iteration lookup over a block/repeat schedule.
//!
//! The [`ScheduleIndexer`] trait answers the three questions asked on every trigger:
//! which block does iteration `k` fall in, which repetition step within that block, and where
//! in the coefficient store is a channel's sample for that step.
//!
//! Implementors only provide the tables (see [`crate::schedule`] for how they are derived); the
//! lookups come as default methods. For a schedule with `lengths = [2, 3]` and
//! `repeat_counts = [2, 1]` on 2 channels:
//!
//! ```
//! use shimcompiler_backend::indexer::*;
//! use shimcompiler_backend::schedule::*;
//!
//! let mut sched = ScheduleModel::new(ScheduleLimits::default());
//! sched.set_schedule(2, &[Block::new(2, 2), Block::new(3, 1)]).unwrap();
//!
//! assert_eq!(sched.block_index_for(3), Some(0));
//! assert_eq!(sched.block_index_for(4), Some(1));
//! assert_eq!(sched.block_index_for(7), None);
//! assert_eq!(sched.rep_index_for(3, 0), 1);
//! assert_eq!(sched.rep_index_for(6, 1), 2);
//! assert_eq!(sched.coefficient_offset(1, 0, 1), 3);
//! assert_eq!(sched.coefficient_offset(0, 1, 2), 8);
//! ```

use ndarray::Array2;

use crate::coefficients::CoefficientStore;

/// Where an iteration lands inside the schedule.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockPosition {
    pub block: usize,
    pub rep: usize,
}

/// Lookups over a configured block/repeat schedule.
///
/// The required methods expose the schedule tables. All slices have one entry per block;
/// `transitions` and `base` are the running totals of `length × repeat_count` and `length`.
pub trait ScheduleIndexer {
    fn channel_count(&self) -> usize;
    fn lengths(&self) -> &[usize];
    fn transitions(&self) -> &[usize];
    fn base(&self) -> &[usize];

    fn block_count(&self) -> usize {
        self.lengths().len()
    }

    /// Iterations the schedule covers. `0` when unconfigured.
    fn total_iterations(&self) -> usize {
        self.transitions().last().copied().unwrap_or(0)
    }

    /// Stored samples per channel. `0` when unconfigured.
    fn total_samples(&self) -> usize {
        self.base().last().copied().unwrap_or(0)
    }

    /// Coefficients the store must hold for this schedule.
    fn total_coefficients(&self) -> usize {
        self.total_samples() * self.channel_count()
    }

    /// Block that `iteration` falls in, or `None` once the schedule is exhausted.
    ///
    /// This is the first block whose transition exceeds `iteration`, so blocks with zero
    /// repeats are never returned.
    fn block_index_for(&self, iteration: usize) -> Option<usize> {
        let transitions = self.transitions();
        let block = transitions.partition_point(|&t| t <= iteration);
        (block < transitions.len()).then_some(block)
    }

    /// Repetition step of `iteration` within `block`.
    ///
    /// # Panics
    /// Panics if `block` is out of range or `iteration` precedes the start of `block`.
    fn rep_index_for(&self, iteration: usize, block: usize) -> usize {
        assert!(
            block < self.block_count(),
            "Block {} requested on a schedule with {} blocks",
            block,
            self.block_count()
        );
        let start = if block == 0 {
            0
        } else {
            self.transitions()[block - 1]
        };
        assert!(
            iteration >= start,
            "Iteration {} precedes block {} which starts at iteration {}",
            iteration,
            block,
            start
        );
        (iteration - start) % self.lengths()[block]
    }

    /// Block and repetition step for `iteration`, or `None` once exhausted.
    fn resolve(&self, iteration: usize) -> Option<BlockPosition> {
        let block = self.block_index_for(iteration)?;
        Some(BlockPosition {
            block,
            rep: self.rep_index_for(iteration, block),
        })
    }

    /// Sample index of step `rep` of `block` within a channel's stored samples.
    fn sample_index(&self, block: usize, rep: usize) -> usize {
        let start = if block == 0 { 0 } else { self.base()[block - 1] };
        start + rep
    }

    /// Flat store offset of `channel`'s sample for step `rep` of `block`.
    ///
    /// The store is sample-major: all channels of sample 0, then all channels of sample 1, and
    /// so on. The offset is `channel_count × (base[block-1] + rep) + channel`.
    ///
    /// # Panics
    /// Panics if `channel`, `block` or `rep` is out of range.
    fn coefficient_offset(&self, channel: usize, block: usize, rep: usize) -> usize {
        assert!(
            channel < self.channel_count(),
            "Channel {} requested on a schedule with {} channels",
            channel,
            self.channel_count()
        );
        assert!(
            block < self.block_count(),
            "Block {} requested on a schedule with {} blocks",
            block,
            self.block_count()
        );
        assert!(
            rep < self.lengths()[block],
            "Step {} requested in block {} of length {}",
            rep,
            block,
            self.lengths()[block]
        );
        self.channel_count() * self.sample_index(block, rep) + channel
    }

    /// Expands the schedule into the per-iteration waveform for iterations `start..end`.
    ///
    /// Returns an array of shape `(channel_count, n)` where column `k` holds the value every
    /// channel is driven to on iteration `start + k`. `end` is clipped to
    /// [`total_iterations`](ScheduleIndexer::total_iterations).
    ///
    /// # Panics
    /// Panics if `store` was not shaped for this schedule.
    fn render_waveform(&self, store: &CoefficientStore, start: usize, end: usize) -> Array2<f32> {
        assert!(
            store.channel_count() == self.channel_count()
                && store.total_samples() == self.total_samples(),
            "Store holds {} samples × {} channels, schedule needs {} × {}",
            store.total_samples(),
            store.channel_count(),
            self.total_samples(),
            self.channel_count()
        );
        let end = end.min(self.total_iterations());
        let n = end.saturating_sub(start);
        let mut buffer = Array2::<f32>::zeros((self.channel_count(), n));
        for (k, iteration) in (start..start + n).enumerate() {
            // Every iteration below total_iterations resolves.
            let Some(pos) = self.resolve(iteration) else {
                break;
            };
            let sample = self.sample_index(pos.block, pos.rep);
            for channel in 0..self.channel_count() {
                buffer[[channel, k]] = store.value(channel, sample);
            }
        }
        buffer
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schedule::{Block, ScheduleLimits, ScheduleModel};
    use rstest::rstest;

    fn example() -> ScheduleModel {
        let mut sched = ScheduleModel::new(ScheduleLimits::default());
        sched
            .set_schedule(2, &[Block::new(2, 2), Block::new(3, 1)])
            .unwrap();
        sched
    }

    #[rstest]
    #[case(0, Some(BlockPosition { block: 0, rep: 0 }))]
    #[case(1, Some(BlockPosition { block: 0, rep: 1 }))]
    #[case(2, Some(BlockPosition { block: 0, rep: 0 }))]
    #[case(3, Some(BlockPosition { block: 0, rep: 1 }))]
    #[case(4, Some(BlockPosition { block: 1, rep: 0 }))]
    #[case(5, Some(BlockPosition { block: 1, rep: 1 }))]
    #[case(6, Some(BlockPosition { block: 1, rep: 2 }))]
    #[case(7, None)]
    #[case(1_000_000, None)]
    fn resolves_iterations(#[case] iteration: usize, #[case] expected: Option<BlockPosition>) {
        assert_eq!(example().resolve(iteration), expected);
    }

    #[test]
    fn block_boundaries() {
        let sched = example();
        // Last iteration of block 0 and first of block 1.
        assert_eq!(sched.block_index_for(3), Some(0));
        assert_eq!(sched.block_index_for(4), Some(1));
        assert_eq!(sched.block_index_for(6), Some(1));
        assert_eq!(sched.block_index_for(7), None);
    }

    #[test]
    fn lookups_are_pure() {
        let sched = example();
        let blocks_before: Vec<Option<usize>> = (0..8).map(|i| sched.block_index_for(i)).collect();

        let first = sched.coefficient_offset(1, 1, 2);
        for iteration in 0..8 {
            let _ = sched.resolve(iteration);
        }
        let second = sched.coefficient_offset(1, 1, 2);
        assert_eq!(first, second);
        // block 1 starts at sample 2, rep 2 is sample 4: 2 × 4 + 1
        assert_eq!(second, 9);

        let blocks_after: Vec<Option<usize>> = (0..8).map(|i| sched.block_index_for(i)).collect();
        assert_eq!(blocks_before, blocks_after);
    }

    #[test]
    fn skips_zero_repeat_blocks() {
        let mut sched = ScheduleModel::new(ScheduleLimits::default());
        sched
            .set_schedule(1, &[Block::new(2, 1), Block::new(3, 0), Block::new(1, 2)])
            .unwrap();
        assert_eq!(sched.block_index_for(1), Some(0));
        assert_eq!(sched.block_index_for(2), Some(2));
        assert_eq!(sched.resolve(3), Some(BlockPosition { block: 2, rep: 0 }));
        // Block 2's samples sit after the skipped block's in the store.
        assert_eq!(sched.coefficient_offset(0, 2, 0), 5);
    }

    #[test]
    fn offsets_cover_store_exactly_once() {
        let sched = example();
        let mut seen = vec![false; sched.total_coefficients()];
        for (block, &len) in sched.lengths().iter().enumerate() {
            for rep in 0..len {
                for channel in 0..sched.channel_count() {
                    let offset = sched.coefficient_offset(channel, block, rep);
                    assert!(!seen[offset], "offset {offset} visited twice");
                    seen[offset] = true;
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn offset_examples() {
        let sched = example();
        assert_eq!(sched.coefficient_offset(1, 0, 1), 3);
        assert_eq!(sched.coefficient_offset(0, 1, 2), 8);
        assert_eq!(sched.coefficient_offset(1, 1, 2), 9);
    }

    #[test]
    #[should_panic(expected = "precedes block 1")]
    fn rep_index_rejects_iteration_before_block() {
        example().rep_index_for(3, 1);
    }

    #[test]
    #[should_panic(expected = "Step 2 requested in block 0")]
    fn offset_rejects_rep_past_length() {
        example().coefficient_offset(0, 0, 2);
    }

    #[test]
    fn renders_waveform() {
        let sched = example();
        let values: Vec<f32> = (0..10).map(|v| v as f32).collect();
        let store = CoefficientStore::from_values(2, 5, values).unwrap();
        let wave = sched.render_waveform(&store, 0, 100);
        assert_eq!(wave.shape(), &[2, 7]);
        // Channel 0 plays samples 0,1,0,1,2,3,4
        assert_eq!(
            wave.row(0).to_vec(),
            vec![0.0, 2.0, 0.0, 2.0, 4.0, 6.0, 8.0]
        );
        assert_eq!(
            wave.row(1).to_vec(),
            vec![1.0, 3.0, 1.0, 3.0, 5.0, 7.0, 9.0]
        );

        let window = sched.render_waveform(&store, 3, 5);
        assert_eq!(window.row(0).to_vec(), vec![2.0, 4.0]);
        assert_eq!(sched.render_waveform(&store, 9, 12).shape(), &[2, 0]);
    }
}
