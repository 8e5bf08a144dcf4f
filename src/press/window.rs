//! Window attention estimation.
//!
//! Recomputes attention from the trailing `window_size` queries onto every
//! earlier key, without running the full attention of the layer.

use ndarray::{s, Array4, ArrayView3, ArrayView4};
use tracing::trace;

use crate::attention::ops::{apply_causal_mask, repeat_kv, scaled_scores, softmax_widened};
use crate::attention::rotary::apply_rotary;
use crate::attention::AttentionModule;
use crate::error::{PressError, Result};
use crate::press::precision::ScoreElement;

#[derive(Debug, Clone, Copy)]
pub struct WindowAttentionEstimator {
    window_size: usize,
}

impl WindowAttentionEstimator {
    pub fn new(window_size: usize) -> Self {
        Self { window_size }
    }

    /// Attention of the last `window_size` queries onto the first
    /// `seq_len - window_size` keys.
    ///
    /// `hidden_states` is `[batch, seq_len, hidden]`, `keys` the canonical
    /// `[batch, num_kv_heads, seq_len, head_dim]` view. Returns
    /// `[batch, num_heads, window_size, seq_len - window_size]`.
    pub fn estimate<T: ScoreElement>(
        &self,
        module: &dyn AttentionModule,
        hidden_states: ArrayView3<'_, T>,
        keys: ArrayView4<'_, T>,
    ) -> Result<Array4<T>> {
        let window = self.window_size;
        let (bsz, q_len, _) = hidden_states.dim();
        let (key_bsz, num_kv_heads, k_len, key_dim) = keys.dim();
        let num_heads = module.num_heads();
        let head_dim = module.head_dim();
        let groups = module.num_key_value_groups();

        if q_len <= window {
            return Err(PressError::InvalidWindowSize {
                seq_len: q_len,
                window_size: window,
            });
        }
        if key_bsz != bsz || k_len != q_len || key_dim != head_dim || num_kv_heads * groups != num_heads {
            return Err(PressError::ShapeMismatch {
                what: "keys for window attention",
                expected: vec![bsz, num_heads / groups.max(1), q_len, head_dim],
                actual: vec![key_bsz, num_kv_heads, k_len, key_dim],
            });
        }

        // Project the window's queries: [bsz, window, heads * dim].
        let probe = hidden_states.slice(s![.., q_len - window.., ..]);
        let projected = module
            .query_projection()
            .queries(probe, num_heads * head_dim, module.name())?;

        // [bsz, window, heads, dim] -> [bsz, heads, window, dim]
        let mut queries = Array4::from_shape_fn((bsz, num_heads, window, head_dim), |(b, h, t, d)| {
            projected[[b, t, h * head_dim + d]]
        });

        let (cos, sin) = module.rotary().window_factors(q_len, window)?;
        apply_rotary(&mut queries.view_mut(), cos.view(), sin.view())?;

        let keys = repeat_kv(keys.mapv(|k| k.to_f32()).view(), groups);
        let mut scores = scaled_scores(queries.view(), keys.view(), 1.0 / (head_dim as f32).sqrt());
        apply_causal_mask(&mut scores);

        let weights: Array4<T> = softmax_widened(&scores);
        trace!(bsz, num_heads, window, q_len, "Window attention recomputed");

        Ok(weights.slice(s![.., .., .., ..q_len - window]).to_owned())
    }
}
