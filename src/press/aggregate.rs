//! Collapse window attention into one importance score per cached key.

use ndarray::{Array1, Array3, ArrayView1, ArrayView4, Axis, Zip};

use crate::error::{PressError, Result};
use crate::press::precision::ScoreElement;

#[derive(Debug, Clone, Copy)]
pub struct ScoreAggregator {
    kernel_size: usize,
}

impl ScoreAggregator {
    /// `kernel_size` must be odd; [`PressConfig`](crate::config::PressConfig) checks it.
    pub fn new(kernel_size: usize) -> Self {
        Self { kernel_size }
    }

    /// `[batch, num_heads, window, keys] -> [batch, num_key_value_heads, keys]`.
    ///
    /// 1. mean over the window's queries,
    /// 2. zero-padded moving average of width `kernel_size`,
    /// 3. mean over the query heads sharing each key/value head.
    pub fn aggregate<T: ScoreElement>(
        &self,
        attn_weights: ArrayView4<'_, T>,
        num_key_value_heads: usize,
    ) -> Result<Array3<T>> {
        let (bsz, num_heads, window, keys) = attn_weights.dim();
        if num_heads == 0
            || num_key_value_heads == 0
            || num_heads % num_key_value_heads != 0
            || window == 0
        {
            return Err(PressError::ShapeMismatch {
                what: "attention weights",
                expected: vec![bsz, num_key_value_heads, window.max(1), keys],
                actual: vec![bsz, num_heads, window, keys],
            });
        }
        let groups = num_heads / num_key_value_heads;

        let mut scores = Array3::from_elem((bsz, num_key_value_heads, keys), T::from_f32(0.0));
        Zip::from(scores.outer_iter_mut())
            .and(attn_weights.outer_iter())
            .par_for_each(|mut out_b, attn_b| {
                for kv_head in 0..num_key_value_heads {
                    let mut group_sum = Array1::<f32>::zeros(keys);
                    for g in 0..groups {
                        let head = attn_b.index_axis(Axis(0), kv_head * groups + g);
                        let per_key = head.mapv(|w| w.to_f32()).mean_axis(Axis(0));
                        if let Some(per_key) = per_key {
                            group_sum += &self.smooth(per_key.view());
                        }
                    }
                    let mut out_row = out_b.index_axis_mut(Axis(0), kv_head);
                    Zip::from(&mut out_row)
                        .and(&group_sum)
                        .for_each(|o, &s| *o = T::from_f32(s / groups as f32));
                }
            });
        Ok(scores)
    }

    /// Moving average with `kernel_size / 2` zeros on each side, stride 1.
    /// Padding counts towards the divisor.
    pub fn smooth(&self, row: ArrayView1<'_, f32>) -> Array1<f32> {
        let len = row.len() as isize;
        let pad = (self.kernel_size / 2) as isize;
        let divisor = self.kernel_size as f32;

        Array1::from_shape_fn(row.len(), |j| {
            let j = j as isize;
            let lo = (j - pad).max(0);
            let hi = (j + pad).min(len - 1);
            (lo..=hi).map(|i| row[i as usize]).sum::<f32>() / divisor
        })
    }
}
