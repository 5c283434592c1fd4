//! The block/repeat schedule and its derived lookup tables.
//!
//! A schedule is an ordered list of [`Block`]s. Block `i` holds `length[i]` distinct samples per
//! channel and plays them `repeat_count[i]` times before the next block starts. Two prefix sums
//! are derived from it whenever it changes:
//!
//! - `transitions[i]`: trigger iterations consumed up to and including block `i`
//!   (`Σ length·repeat_count`). Used to find the block an iteration falls in.
//! - `base[i]`: stored samples up to and including block `i` (`Σ length`). Used to address the
//!   coefficient store, which holds each block's samples once regardless of repeats.
//!
//! For `lengths = [2, 3]` and `repeat_counts = [2, 1]`:
//!
//! ```text
//! iteration   0 1 2 3 | 4 5 6 | 7 ...
//! block       0 0 0 0 | 1 1 1 | exhausted
//! rep         0 1 0 1 | 0 1 2 |
//! transitions = [4, 7], base = [2, 5]
//! ```
//!
//! Replacing the schedule is all or nothing: [`ScheduleModel::set_schedule`] validates the new
//! blocks and computes both tables before touching any state, so a rejected schedule leaves the
//! previous one fully intact. Lookups live in the [`ScheduleIndexer`] trait.

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConfigurationError;
use crate::indexer::ScheduleIndexer;
use crate::protocol::ScheduleConfig;

/// One schedule segment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    /// Distinct samples per repetition. At least 1.
    pub length: usize,
    /// Repetitions before the next block starts. May be 0, which skips the block.
    pub repeat_count: usize,
}

impl Block {
    pub fn new(length: usize, repeat_count: usize) -> Self {
        Self {
            length,
            repeat_count,
        }
    }
}

/// Capacity bounds enforced when a schedule is configured.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScheduleLimits {
    pub max_blocks: usize,
    pub max_channels: usize,
    /// Size of the coefficient store, `channel_count × Σ length` must fit.
    pub max_coefficients: usize,
}

impl Default for ScheduleLimits {
    fn default() -> Self {
        Self {
            max_blocks: 9,
            max_channels: 16,
            max_coefficients: 8192,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScheduleModel {
    limits: ScheduleLimits,
    channel_count: usize,
    blocks: Vec<Block>,
    lengths: Vec<usize>,
    transitions: Vec<usize>,
    base: Vec<usize>,
}

impl ScheduleModel {
    /// An empty schedule. Every iteration resolves as exhausted until one is configured.
    pub fn new(limits: ScheduleLimits) -> Self {
        Self {
            limits,
            channel_count: 0,
            blocks: Vec::new(),
            lengths: Vec::new(),
            transitions: Vec::new(),
            base: Vec::new(),
        }
    }

    pub fn limits(&self) -> &ScheduleLimits {
        &self.limits
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn is_configured(&self) -> bool {
        !self.blocks.is_empty()
    }

    /// Replaces the active schedule.
    ///
    /// # Errors
    /// Returns a [`ConfigurationError`] and leaves the current schedule untouched if
    /// - `blocks` is empty or longer than `max_blocks`,
    /// - `channel_count` is 0 or larger than `max_channels`,
    /// - any block has length 0,
    /// - the coefficients required (`channel_count × Σ length`) exceed `max_coefficients`,
    /// - the total iteration count does not fit in `usize`.
    pub fn set_schedule(
        &mut self,
        channel_count: usize,
        blocks: &[Block],
    ) -> Result<(), ConfigurationError> {
        if blocks.is_empty() {
            return Err(ConfigurationError::EmptySchedule);
        }
        if blocks.len() > self.limits.max_blocks {
            return Err(ConfigurationError::TooManyBlocks {
                count: blocks.len(),
                max: self.limits.max_blocks,
            });
        }
        if channel_count == 0 {
            return Err(ConfigurationError::ZeroChannels);
        }
        if channel_count > self.limits.max_channels {
            return Err(ConfigurationError::TooManyChannels {
                count: channel_count,
                max: self.limits.max_channels,
            });
        }
        if let Some(block) = blocks.iter().position(|b| b.length == 0) {
            return Err(ConfigurationError::ZeroLength { block });
        }

        let mut transitions = Vec::with_capacity(blocks.len());
        let mut base = Vec::with_capacity(blocks.len());
        let (mut last_transition, mut last_base) = (0usize, 0usize);
        for block in blocks {
            last_transition = block
                .length
                .checked_mul(block.repeat_count)
                .and_then(|iters| last_transition.checked_add(iters))
                .ok_or(ConfigurationError::Overflow)?;
            last_base = last_base
                .checked_add(block.length)
                .ok_or(ConfigurationError::Overflow)?;
            transitions.push(last_transition);
            base.push(last_base);
        }

        let required = last_base
            .checked_mul(channel_count)
            .ok_or(ConfigurationError::Overflow)?;
        if required > self.limits.max_coefficients {
            return Err(ConfigurationError::CapacityExceeded {
                required,
                max: self.limits.max_coefficients,
            });
        }

        self.channel_count = channel_count;
        self.blocks = blocks.to_vec();
        self.lengths = blocks.iter().map(|b| b.length).collect();
        self.transitions = transitions;
        self.base = base;

        info!(
            channels = channel_count,
            blocks = blocks.len(),
            total_iterations = last_transition,
            total_samples = last_base,
            "schedule configured"
        );
        debug!(transitions = ?self.transitions, base = ?self.base, "schedule tables");
        Ok(())
    }

    /// Applies a parsed control message. Same semantics as [`ScheduleModel::set_schedule`].
    pub fn apply(&mut self, config: &ScheduleConfig) -> Result<(), ConfigurationError> {
        self.set_schedule(config.channel_count(), config.blocks())
    }

    /// Drops the active schedule.
    pub fn clear(&mut self) {
        self.channel_count = 0;
        self.blocks.clear();
        self.lengths.clear();
        self.transitions.clear();
        self.base.clear();
    }
}

impl ScheduleIndexer for ScheduleModel {
    fn channel_count(&self) -> usize {
        self.channel_count
    }
    fn lengths(&self) -> &[usize] {
        &self.lengths
    }
    fn transitions(&self) -> &[usize] {
        &self.transitions
    }
    fn base(&self) -> &[usize] {
        &self.base
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    fn blocks(table: &[(usize, usize)]) -> Vec<Block> {
        table.iter().map(|&(l, r)| Block::new(l, r)).collect()
    }

    #[test]
    fn derives_tables() {
        let mut sched = ScheduleModel::new(ScheduleLimits::default());
        sched.set_schedule(2, &blocks(&[(2, 2), (3, 1)])).unwrap();
        assert_eq!(sched.transitions(), &[4, 7]);
        assert_eq!(sched.base(), &[2, 5]);
        assert_eq!(sched.lengths(), &[2, 3]);
        assert_eq!(sched.total_iterations(), 7);
        assert_eq!(sched.total_samples(), 5);
        assert!(sched.is_configured());
    }

    #[rstest]
    #[case(vec![(1, 1)])]
    #[case(vec![(2, 2), (3, 1)])]
    #[case(vec![(200, 100_000), (80, 1), (80, 1), (80, 1)])]
    #[case(vec![(5, 3), (1, 7), (4, 4), (2, 9), (3, 1), (6, 2), (1, 1), (2, 2), (7, 3)])]
    fn tables_are_monotone_prefix_sums(#[case] table: Vec<(usize, usize)>) {
        let limits = ScheduleLimits {
            max_coefficients: usize::MAX,
            ..ScheduleLimits::default()
        };
        let mut sched = ScheduleModel::new(limits);
        sched.set_schedule(1, &blocks(&table)).unwrap();

        assert!(sched.transitions().windows(2).all(|w| w[0] < w[1]));
        assert!(sched.base().windows(2).all(|w| w[0] < w[1]));
        let total_iters: usize = table.iter().map(|(l, r)| l * r).sum();
        let total_samps: usize = table.iter().map(|(l, _)| l).sum();
        assert_eq!(*sched.transitions().last().unwrap(), total_iters);
        assert_eq!(*sched.base().last().unwrap(), total_samps);
    }

    #[test]
    fn zero_repeat_block_keeps_tables_non_decreasing() {
        let mut sched = ScheduleModel::new(ScheduleLimits::default());
        sched.set_schedule(1, &blocks(&[(2, 1), (3, 0), (1, 2)])).unwrap();
        assert_eq!(sched.transitions(), &[2, 2, 4]);
        assert_eq!(sched.base(), &[2, 5, 6]);
    }

    #[rstest]
    #[case(1, vec![], ConfigurationError::EmptySchedule)]
    #[case(0, vec![(1, 1)], ConfigurationError::ZeroChannels)]
    #[case(17, vec![(1, 1)], ConfigurationError::TooManyChannels { count: 17, max: 16 })]
    #[case(1, vec![(1, 1), (0, 3)], ConfigurationError::ZeroLength { block: 1 })]
    #[case(1, vec![(1, 1); 10], ConfigurationError::TooManyBlocks { count: 10, max: 9 })]
    #[case(16, vec![(600, 1)], ConfigurationError::CapacityExceeded { required: 9600, max: 8192 })]
    fn rejects_invalid_schedules(
        #[case] channels: usize,
        #[case] table: Vec<(usize, usize)>,
        #[case] expected: ConfigurationError,
    ) {
        let mut sched = ScheduleModel::new(ScheduleLimits::default());
        assert_eq!(sched.set_schedule(channels, &blocks(&table)), Err(expected));
    }

    #[test]
    fn rejects_overflowing_iteration_count() {
        let limits = ScheduleLimits {
            max_coefficients: usize::MAX,
            ..ScheduleLimits::default()
        };
        let mut sched = ScheduleModel::new(limits);
        assert_eq!(
            sched.set_schedule(1, &blocks(&[(2, usize::MAX)])),
            Err(ConfigurationError::Overflow)
        );
    }

    #[test]
    fn rejected_schedule_leaves_previous_intact() {
        let mut sched = ScheduleModel::new(ScheduleLimits::default());
        sched.set_schedule(2, &blocks(&[(2, 2), (3, 1)])).unwrap();
        let err = sched.set_schedule(2, &blocks(&[(4, 1), (0, 1)]));
        assert!(err.is_err());
        assert_eq!(sched.channel_count(), 2);
        assert_eq!(sched.transitions(), &[4, 7]);
        assert_eq!(sched.base(), &[2, 5]);
        assert_eq!(sched.blocks(), &blocks(&[(2, 2), (3, 1)])[..]);
    }

    #[test]
    fn clear_exhausts_everything() {
        let mut sched = ScheduleModel::new(ScheduleLimits::default());
        sched.set_schedule(1, &blocks(&[(2, 2)])).unwrap();
        sched.clear();
        assert!(!sched.is_configured());
        assert_eq!(sched.block_index_for(0), None);
        assert_eq!(sched.total_iterations(), 0);
    }
}
