//! Per-head floor safeguard and sentinel marking.
//!
//! A global top-k across heads can starve heads whose scores are naturally
//! small. Each head therefore keeps its own `floor_count` best positions,
//! marked with the sentinel `T::MAX` so any downstream top-k retains them.

use ndarray::{s, Array3, ArrayViewMut1, Axis, Zip};

use crate::press::precision::ScoreElement;

#[derive(Debug, Clone, Copy)]
pub struct BudgetAllocator {
    window_size: usize,
}

impl BudgetAllocator {
    pub fn new(window_size: usize) -> Self {
        Self { window_size }
    }

    /// Mark the `floor_count` best non-window positions of every head and
    /// append the window, also marked, to the end of each head's row.
    ///
    /// `[batch, heads, seq_len - window] -> [batch, heads, seq_len]`.
    /// `floor_count` is clamped to the number of non-window positions.
    pub fn allocate<T: ScoreElement>(&self, mut scores: Array3<T>, floor_count: usize) -> Array3<T> {
        let (bsz, heads, history) = scores.dim();
        let floor_count = floor_count.min(history);

        if floor_count > 0 {
            Zip::from(scores.lanes_mut(Axis(2))).par_for_each(|row| mark_top_k(row, floor_count));
        }

        let mut out = Array3::from_elem((bsz, heads, history + self.window_size), T::MAX);
        out.slice_mut(s![.., .., ..history]).assign(&scores);
        out
    }
}

/// Overwrite the `k` highest entries of `row` with the sentinel.
///
/// Equal scores resolve towards the lower position.
fn mark_top_k<T: ScoreElement>(mut row: ArrayViewMut1<'_, T>, k: usize) {
    let mut order: Vec<usize> = (0..row.len()).collect();
    order.sort_by(|&a, &b| row[b].to_f32().total_cmp(&row[a].to_f32()).then(a.cmp(&b)));
    for &idx in order.iter().take(k) {
        row[idx] = T::MAX;
    }
}
