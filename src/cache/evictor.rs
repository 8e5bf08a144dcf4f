//! Global retention planning: decides which (head, position) entries survive.
//!
//! Consumes the press scores of one layer. All heads of a batch element compete
//! for a single budget of `floor(heads * seq_len * (1 - compression_ratio))`
//! slots, so heads end up with different lengths. Sentinel entries win every
//! comparison, which is how the per-head floor and the window are honoured.
//! Only the plan is produced here; compacting the buffers is the cache
//! manager's job.

use std::collections::BinaryHeap;

use ndarray::{ArrayView3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::metadata::CacheMetadata;
use crate::press::precision::ScoreElement;

/// A (head, position) slot with its score.
#[derive(Debug, Clone, Copy)]
pub struct RetentionCandidate {
    pub head: usize,
    pub position: usize,
    pub score: f32,
}

// Higher score = retained first. Ties go to the lower head, then the lower position.
impl PartialEq for RetentionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for RetentionCandidate {}

impl PartialOrd for RetentionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RetentionCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.head.cmp(&self.head))
            .then_with(|| other.position.cmp(&self.position))
    }
}

/// Surviving positions of every head after one compression event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPlan {
    /// Batch size.
    pub bsz: usize,

    /// Number of key/value heads.
    pub num_key_value_heads: usize,

    /// `kept[b][h]`: retained positions of head `h` in batch element `b`, ascending.
    pub kept: Vec<Vec<Vec<usize>>>,
}

impl RetentionPlan {
    /// Stored length of every physical head after compaction, batch-major.
    pub fn head_lens(&self) -> Vec<usize> {
        self.kept
            .iter()
            .flat_map(|heads| heads.iter().map(Vec::len))
            .collect()
    }

    /// Descriptor of the compacted cache.
    pub fn metadata(&self) -> CacheMetadata {
        CacheMetadata::new(self.bsz, self.num_key_value_heads, self.head_lens())
    }

    /// Total retained slots across batch and heads.
    pub fn total_kept(&self) -> usize {
        self.head_lens().iter().sum()
    }
}

/// Cross-head top-k over press scores.
#[derive(Debug, Clone, Copy)]
pub struct GlobalEvictor {
    compression_ratio: f64,
}

impl GlobalEvictor {
    pub fn new(compression_ratio: f64) -> Self {
        Self { compression_ratio }
    }

    /// Slots one batch element keeps out of `heads * seq_len`.
    pub fn budget(&self, heads: usize, seq_len: usize) -> usize {
        ((heads * seq_len) as f64 * (1.0 - self.compression_ratio)) as usize
    }

    /// Plan retention for `[batch, heads, seq_len]` scores.
    pub fn plan<T: ScoreElement>(&self, scores: ArrayView3<'_, T>) -> RetentionPlan {
        let (bsz, heads, seq_len) = scores.dim();
        let budget = self.budget(heads, seq_len);

        let kept = (0..bsz)
            .into_par_iter()
            .map(|b| {
                let per_batch = scores.index_axis(Axis(0), b);
                let mut heap = BinaryHeap::with_capacity(heads * seq_len);
                for ((head, position), score) in per_batch.indexed_iter() {
                    heap.push(RetentionCandidate {
                        head,
                        position,
                        score: score.to_f32(),
                    });
                }

                let mut per_head = vec![Vec::new(); heads];
                for _ in 0..budget {
                    match heap.pop() {
                        Some(candidate) => per_head[candidate.head].push(candidate.position),
                        None => break,
                    }
                }
                for positions in per_head.iter_mut() {
                    positions.sort_unstable();
                }
                per_head
            })
            .collect();

        let plan = RetentionPlan {
            bsz,
            num_key_value_heads: heads,
            kept,
        };
        debug!(budget, head_lens = ?plan.head_lens(), "Planned global retention");
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_budget() {
        assert_eq!(GlobalEvictor::new(0.5).budget(2, 6), 6);
        assert_eq!(GlobalEvictor::new(0.0).budget(3, 5), 15);
        assert_eq!(GlobalEvictor::new(0.9).budget(1, 7), 0);
    }

    #[test]
    fn test_highest_scores_survive_across_heads() {
        let scores = Array3::from_shape_vec((1, 2, 3), vec![0.9f32, 0.1, 0.8, 0.2, 0.7, 0.3]).unwrap();
        let plan = GlobalEvictor::new(0.5).plan(scores.view());

        assert_eq!(plan.kept[0][0], vec![0, 2]);
        assert_eq!(plan.kept[0][1], vec![1]);
        assert_eq!(plan.head_lens(), vec![2, 1]);
        assert_eq!(plan.total_kept(), 3);
    }

    #[test]
    fn test_sentinels_always_survive() {
        let scores = Array3::from_shape_vec((1, 2, 2), vec![f32::MAX, 5.0, 4.0, f32::MAX]).unwrap();
        let plan = GlobalEvictor::new(0.5).plan(scores.view());
        assert_eq!(plan.kept[0][0], vec![0]);
        assert_eq!(plan.kept[0][1], vec![1]);
    }

    #[test]
    fn test_ties_prefer_lower_head_then_position() {
        let scores = Array3::from_elem((1, 2, 2), 1.0f32);
        let plan = GlobalEvictor::new(0.75).plan(scores.view());
        assert_eq!(plan.kept[0], vec![vec![0], vec![]]);
    }

    #[test]
    fn test_uneven_plan_yields_recompression_metadata() {
        let scores = Array3::from_shape_vec((1, 2, 2), vec![3.0f32, 2.0, 1.0, 0.0]).unwrap();
        let meta = GlobalEvictor::new(0.5).plan(scores.view()).metadata();
        assert_eq!(meta.head_lens, vec![2, 0]);
        assert!(meta.uniform_len().is_err());
    }
}
